//! The staged connection pipeline (Gateway -> Connection Processor ->
//! Server Gateway -> Connection Pool) and the Proxy supervisor that owns
//! hot reload across it.

pub mod conn;
pub mod config;
pub mod connpool;
pub mod cpn;
pub mod error;
pub mod events;
pub mod gateway;
pub mod proxy;
pub mod server_gateway;
mod shutdown;

pub use config::{ChannelCaps, ProxyConfig, ProxySettings};
pub use conn::{Conn, ConnTunnel, LoginStartInfo, ProcessedConn};
pub use cpn::{ConnProcessor, CpnPool, StandardConnProcessor};
pub use error::{ConnError, ProxyError};
pub use events::{ChannelEventSink, Event, EventSink, NoopEventSink};
pub use gateway::{Gateway, GatewayConfig};
pub use proxy::Proxy;
pub use server_gateway::{normalize_hostname, OfflineStatus, RoutingTable, ServerConfig, ServerGateway};
