use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use relay_protocol::packets::NextState;
use relay_protocol::{write_packet, FrameDecoder, Packet};

use crate::conn::{ConnTunnel, ProcessedConn};
use crate::error::ConnError;
use crate::events::{Event, EventSink};
use crate::shutdown::{signal_pair, Observer, Signal};

#[derive(Clone, Debug, Serialize)]
pub struct OfflineStatus {
    pub version_name: String,
    pub protocol: i32,
    pub max_players: i32,
    pub online_players: i32,
    pub description: String,
}

impl OfflineStatus {
    fn to_response_json(&self) -> String {
        serde_json::json!({
            "version": { "name": self.version_name, "protocol": self.protocol },
            "players": { "max": self.max_players, "online": self.online_players, "sample": [] },
            "description": { "text": self.description },
        })
        .to_string()
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub name: String,
    pub hostnames: Vec<String>,
    pub backend_addr: SocketAddr,
    pub dial_timeout: Duration,
    pub disconnect_message: String,
    pub offline_status: Option<OfflineStatus>,
}

/// Strips a trailing dot, lower-cases, and truncates at the first NUL
/// byte (Forge/FML clients append a `\0FML...` marker to the hostname).
pub fn normalize_hostname(raw: &str) -> String {
    let truncated = raw.split('\0').next().unwrap_or("");
    truncated.trim_end_matches('.').to_ascii_lowercase()
}

fn pattern_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        host == suffix || host.ends_with(&format!(".{suffix}"))
    } else {
        pattern == host
    }
}

/// The ordered set of servers currently in effect. Insertion order is
/// match priority: the first server with a matching hostname pattern
/// wins.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    servers: Vec<ServerConfig>,
}

impl RoutingTable {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self { servers }
    }

    pub fn find(&self, vhost: &str) -> Option<&ServerConfig> {
        let host = normalize_hostname(vhost);
        self.servers
            .iter()
            .find(|s| s.hostnames.iter().any(|p| pattern_matches(p, &host)))
    }
}

/// The single consumer that routes a [`ProcessedConn`] to a backend,
/// dials it, replays the captured pre-session bytes, and either hands
/// off a tunnel or (status path, backend unreachable) answers locally.
pub struct ServerGateway {
    srv_rx: flume::Receiver<ProcessedConn>,
    pool_tx: flume::Sender<ConnTunnel>,
    routing: watch::Receiver<Arc<RoutingTable>>,
    events: Arc<dyn EventSink>,
    stop: Observer,
    next_tunnel_id: std::sync::atomic::AtomicU64,
}

impl ServerGateway {
    pub fn new(
        srv_rx: flume::Receiver<ProcessedConn>,
        pool_tx: flume::Sender<ConnTunnel>,
        routing: watch::Receiver<Arc<RoutingTable>>,
        events: Arc<dyn EventSink>,
    ) -> (Self, Signal) {
        let (stop_tx, stop_rx) = signal_pair();
        (
            Self {
                srv_rx,
                pool_tx,
                routing,
                events,
                stop: stop_rx,
                next_tunnel_id: std::sync::atomic::AtomicU64::new(0),
            },
            stop_tx,
        )
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => {
                    info!("server gateway stopping");
                    return;
                }
                recv = self.srv_rx.recv_async() => {
                    match recv {
                        Ok(processed) => self.route(processed).await,
                        Err(_) => return, // channel closed
                    }
                }
            }
        }
    }

    async fn route(&mut self, processed: ProcessedConn) {
        let remote = processed.conn.remote_addr;
        let gateway_id = processed.conn.gateway_id.clone();
        let vhost = processed.handshake.server_address.clone();

        let table = self.routing.borrow_and_update().clone();
        let server = match table.find(&vhost) {
            Some(s) => s.clone(),
            None => {
                self.events.emit(Event::NoRoute {
                    gateway_id,
                    remote_addr: remote,
                    vhost,
                });
                return;
            }
        };

        match timeout(server.dial_timeout, TcpStream::connect(server.backend_addr)).await {
            Ok(Ok(backend)) => self.forward_to_backend(processed, backend, &server).await,
            _ => {
                self.events.emit(Event::DialFailed {
                    server_name: server.name.clone(),
                    backend_addr: server.backend_addr,
                });
                match processed.next_state() {
                    NextState::Status if server.offline_status.is_some() => {
                        let status = server.offline_status.clone().unwrap();
                        if let Err(e) = serve_offline_status(processed.conn.stream, &status).await
                        {
                            warn!(%remote, error = %e, "offline status exchange failed");
                        }
                    }
                    NextState::Login => {
                        let mut stream = processed.conn.stream;
                        let _ = send_disconnect(&mut stream, &server.disconnect_message).await;
                    }
                    _ => {}
                }
            }
        }
    }

    async fn forward_to_backend(
        &self,
        processed: ProcessedConn,
        mut backend: TcpStream,
        server: &ServerConfig,
    ) {
        let ProcessedConn {
            conn,
            handshake_raw,
            login_start,
            ..
        } = processed;

        if let Err(e) = backend.write_all(&handshake_raw).await {
            warn!(server = %server.name, error = %e, "failed writing handshake to backend");
            return;
        }
        if let Some(login) = &login_start {
            if let Err(e) = backend.write_all(&login.raw).await {
                warn!(server = %server.name, error = %e, "failed writing login-start to backend");
                return;
            }
        }

        let id = self
            .next_tunnel_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let tunnel = ConnTunnel {
            id,
            client: conn.stream,
            server: backend,
            gateway_id: conn.gateway_id,
            server_name: server.name.clone(),
        };
        if self.pool_tx.send_async(tunnel).await.is_err() {
            warn!("connection pool channel closed, dropping tunnel");
        }
    }
}

async fn read_one_packet(stream: &mut TcpStream) -> Result<Packet, ConnError> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];
    loop {
        if let Some((packet, _raw)) = decoder.try_next_packet()? {
            return Ok(packet);
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(ConnError::UnexpectedEof);
        }
        decoder.queue_bytes(&buf[..n]);
    }
}

/// Answers the status/ping exchange locally when the backend is
/// unreachable: reads the (empty) status request, writes the status
/// response JSON, then echoes the ping payload verbatim.
async fn serve_offline_status(
    mut stream: TcpStream,
    status: &OfflineStatus,
) -> Result<(), ConnError> {
    let _status_request = read_one_packet(&mut stream).await?;

    let response = relay_protocol::packets::StatusResponse {
        json: status.to_response_json(),
    };
    let response_pk = Packet::new(0x00, response.encode());
    stream.write_all(&write_packet(&response_pk, 0)?).await?;

    let ping_pk = read_one_packet(&mut stream).await?;
    let pong_pk = Packet::new(0x01, ping_pk.payload);
    stream.write_all(&write_packet(&pong_pk, 0)?).await?;

    Ok(())
}

async fn send_disconnect(stream: &mut TcpStream, message: &str) -> Result<(), ConnError> {
    let json = serde_json::json!({ "text": message }).to_string();
    let mut payload = Vec::new();
    relay_protocol::fields::write_string(&mut payload, &json);
    let pk = Packet::new(0x00, payload);
    stream.write_all(&write_packet(&pk, 0)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_normalization_strips_dot_and_fml_marker() {
        assert_eq!(normalize_hostname("Play.Example.com."), "play.example.com");
        assert_eq!(
            normalize_hostname("play.example.com\0FML\03.2.1\0"),
            "play.example.com"
        );
    }

    #[test]
    fn wildcard_pattern_matches_any_subdomain() {
        assert!(pattern_matches("*.example.com", "play.example.com"));
        assert!(pattern_matches("*.example.com", "example.com"));
        assert!(!pattern_matches("*.example.com", "example.org"));
    }

    #[test]
    fn first_match_wins_by_insertion_order() {
        let a = ServerConfig {
            name: "a".into(),
            hostnames: vec!["*.foo.com".into()],
            backend_addr: "127.0.0.1:1".parse().unwrap(),
            dial_timeout: Duration::from_secs(1),
            disconnect_message: String::new(),
            offline_status: None,
        };
        let b = ServerConfig {
            name: "b".into(),
            hostnames: vec!["bar.foo.com".into()],
            backend_addr: "127.0.0.1:2".parse().unwrap(),
            dial_timeout: Duration::from_secs(1),
            disconnect_message: String::new(),
            offline_status: None,
        };
        let table = RoutingTable::new(vec![a, b]);
        assert_eq!(table.find("bar.foo.com").unwrap().name, "a");
    }
}
