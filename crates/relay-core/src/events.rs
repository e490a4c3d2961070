use std::net::SocketAddr;

use relay_protocol::packets::NextState;

/// Typed records delivered to an [`EventSink`]. Delivery is best-effort:
/// a sink that would block is simply skipped rather than back-pressuring
/// the data path (see SPEC_FULL.md's "Global state" design note).
#[derive(Clone, Debug)]
pub enum Event {
    PlayerJoin {
        gateway_id: String,
        remote_addr: SocketAddr,
        vhost: String,
        protocol_version: i32,
        next_state: NextState,
    },
    NoRoute {
        gateway_id: String,
        remote_addr: SocketAddr,
        vhost: String,
    },
    HandshakeTimeout {
        gateway_id: String,
        remote_addr: SocketAddr,
    },
    DialFailed {
        server_name: String,
        backend_addr: SocketAddr,
    },
    ReloadCompleted,
}

/// A non-blocking, best-effort sink for [`Event`]s. Implementations must
/// not panic and should return quickly; a slow sink is a sink that drops
/// events, not one that stalls the pipeline.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// The default sink: discards everything. Used when no observer cares.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: Event) {}
}

/// A channel-backed sink for tests: buffers events in an unbounded
/// `flume` channel so assertions can drain and inspect them.
pub struct ChannelEventSink {
    tx: flume::Sender<Event>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, flume::Receiver<Event>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: Event) {
        // Best-effort: an unbounded channel never blocks, but a closed
        // receiver (test already finished) simply drops the event.
        let _ = self.tx.send(event);
    }
}
