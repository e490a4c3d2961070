use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use relay_protocol::packets::{Handshake, LoginStart, NextState};
use relay_protocol::FrameDecoder;

use crate::conn::{Conn, LoginStartInfo, ProcessedConn};
use crate::error::ConnError;
use crate::events::{Event, EventSink};
use crate::shutdown::{signal_pair, Signal};

/// Parses the client handshake (and, for the login path, login-start)
/// off a freshly-accepted connection. Abstract so TLS-terminating or
/// proxy-protocol-aware variants can be substituted without touching
/// the pool machinery around it.
#[async_trait]
pub trait ConnProcessor: Send + Sync {
    async fn process(
        &self,
        conn: Conn,
        handshake_timeout: Duration,
        events: &dyn EventSink,
    ) -> Result<ProcessedConn, ConnError>;
}

/// The vanilla handshake parser: reads exactly one handshake packet, and
/// for `nextState=login`, the subsequent login-start packet. Compression
/// is never enabled for this exchange, matching the real client.
pub struct StandardConnProcessor;

#[async_trait]
impl ConnProcessor for StandardConnProcessor {
    async fn process(
        &self,
        mut conn: Conn,
        handshake_timeout: Duration,
        events: &dyn EventSink,
    ) -> Result<ProcessedConn, ConnError> {
        let (handshake_pk, handshake_raw) =
            read_one_packet(&mut conn.stream, handshake_timeout).await?;
        let handshake = Handshake::decode(&handshake_pk.payload)?;

        events.emit(Event::PlayerJoin {
            gateway_id: conn.gateway_id.clone(),
            remote_addr: conn.remote_addr,
            vhost: handshake.server_address.clone(),
            protocol_version: handshake.protocol_version,
            next_state: handshake.next_state,
        });

        let login_start = if handshake.next_state == NextState::Login {
            let (login_pk, login_raw) =
                read_one_packet(&mut conn.stream, handshake_timeout).await?;
            let login = LoginStart::decode(&login_pk.payload)?;
            Some(LoginStartInfo {
                username: login.username,
                raw: login_raw,
            })
        } else {
            None
        };

        Ok(ProcessedConn {
            conn,
            handshake,
            handshake_raw,
            login_start,
        })
    }
}

async fn read_one_packet(
    stream: &mut TcpStream,
    deadline: Duration,
) -> Result<(relay_protocol::Packet, Vec<u8>), ConnError> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 512];

    timeout(deadline, async {
        loop {
            if let Some((packet, raw)) = decoder.try_next_packet()? {
                return Ok((packet, raw));
            }
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ConnError::UnexpectedEof);
            }
            decoder.queue_bytes(&buf[..n]);
        }
    })
    .await
    .map_err(|_| ConnError::HandshakeTimeout)?
}

/// A dynamically-resizable set of worker tasks sharing one template
/// (processor, channels, event sink). `set_size` grows by spawning new
/// workers and shrinks by cooperatively signalling the excess to finish
/// their current connection and exit.
pub struct CpnPool {
    processor: Arc<dyn ConnProcessor>,
    in_rx: flume::Receiver<Conn>,
    out_tx: flume::Sender<ProcessedConn>,
    events: Arc<dyn EventSink>,
    handshake_timeout: Duration,
    workers: Vec<Signal>,
    active: Arc<AtomicUsize>,
}

impl CpnPool {
    pub fn new(
        processor: Arc<dyn ConnProcessor>,
        in_rx: flume::Receiver<Conn>,
        out_tx: flume::Sender<ProcessedConn>,
        events: Arc<dyn EventSink>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            processor,
            in_rx,
            out_tx,
            events,
            handshake_timeout,
            workers: Vec::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn current_size(&self) -> usize {
        self.workers.len()
    }

    /// Grows or shrinks the worker set to exactly `n`.
    pub fn set_size(&mut self, n: usize) {
        while self.workers.len() < n {
            self.spawn_worker();
        }
        while self.workers.len() > n {
            // Signal one worker to stop after its current connection.
            if let Some(stop) = self.workers.pop() {
                let _ = stop.send(true);
            }
        }
        debug!(size = n, "cpn pool resized");
    }

    fn spawn_worker(&mut self) {
        let (stop_tx, mut stop_rx) = signal_pair();
        let processor = self.processor.clone();
        let in_rx = self.in_rx.clone();
        let out_tx = self.out_tx.clone();
        let events = self.events.clone();
        let handshake_timeout = self.handshake_timeout;
        let active = self.active.clone();

        active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    recv = in_rx.recv_async() => {
                        match recv {
                            Ok(conn) => {
                                let remote = conn.remote_addr;
                                let gateway_id = conn.gateway_id.clone();
                                match processor.process(conn, handshake_timeout, events.as_ref()).await {
                                    Ok(processed) => {
                                        if out_tx.send_async(processed).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(ConnError::HandshakeTimeout) => {
                                        events.emit(Event::HandshakeTimeout { gateway_id, remote_addr: remote });
                                        warn!(%remote, "handshake timed out");
                                    }
                                    Err(e) => {
                                        warn!(%remote, error = %e, "handshake parse failed");
                                    }
                                }
                            }
                            Err(_) => break, // channel closed
                        }
                    }
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });

        self.workers.push(stop_tx);
    }
}
