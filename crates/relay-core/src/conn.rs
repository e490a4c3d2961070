use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;

use relay_protocol::packets::{Handshake, NextState};

/// An accepted TCP connection plus the metadata captured at accept time.
/// Owned by exactly one task at a time: a Gateway creates it, a CPN
/// worker consumes it, and it either dies there (parse failure, timeout)
/// or is folded into a [`ProcessedConn`].
pub struct Conn {
    pub stream: TcpStream,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub gateway_id: String,
    pub accepted_at: Instant,
}

impl Conn {
    pub fn new(stream: TcpStream, gateway_id: String) -> std::io::Result<Self> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        Ok(Self {
            stream,
            remote_addr,
            local_addr,
            gateway_id,
            accepted_at: Instant::now(),
        })
    }
}

/// The login-start payload, captured alongside its raw wire bytes so the
/// Server Gateway can replay it verbatim to the backend.
#[derive(Clone, Debug)]
pub struct LoginStartInfo {
    pub username: String,
    pub raw: Vec<u8>,
}

/// A `Conn` plus its parsed handshake (and, for the login path, the
/// parsed login-start). Single owner: the Server Gateway, once it's
/// pulled this off the CPN→SG channel.
pub struct ProcessedConn {
    pub conn: Conn,
    pub handshake: Handshake,
    pub handshake_raw: Vec<u8>,
    pub login_start: Option<LoginStartInfo>,
}

impl ProcessedConn {
    pub fn next_state(&self) -> NextState {
        self.handshake.next_state
    }
}

/// Two TCP connections bridged for the remainder of a session, plus the
/// tunnel id used for tracking and graceful shutdown.
pub struct ConnTunnel {
    pub id: u64,
    pub client: TcpStream,
    pub server: TcpStream,
    pub gateway_id: String,
    pub server_name: String,
}
