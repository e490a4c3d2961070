use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while processing a single connection. These are always
/// local to one connection: the caller closes the socket and moves on,
/// never propagating a [`ConnError`] past the worker that hit it.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("handshake read timed out")]
    HandshakeTimeout,

    #[error("malformed handshake: {0}")]
    Codec(#[from] relay_protocol::CodecError),

    #[error("client disconnected before completing the handshake")]
    UnexpectedEof,

    #[error("no server matches hostname {vhost:?}")]
    NoRoute { vhost: String },

    #[error("dialing backend {addr} failed: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the supervisor itself: construction, reload, and
/// shutdown. These are not per-connection; a `Reload` failure leaves the
/// running proxy on its previous configuration.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind gateway {id:?} on {addr}: {source}")]
    GatewayBind {
        id: String,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("config loader failed: {0}")]
    Config(#[from] anyhow::Error),
}
