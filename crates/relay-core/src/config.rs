use std::sync::Arc;

use crate::cpn::ConnProcessor;
use crate::gateway::GatewayConfig;
use crate::server_gateway::ServerConfig;

/// Bounded capacities for the three pipeline channels. A capacity of 0
/// is legal and means unbuffered (every send rendezvous with a recv).
#[derive(Clone, Copy, Debug)]
pub struct ChannelCaps {
    pub conn_processor: usize,
    pub server: usize,
    pub conn_pool: usize,
}

impl Default for ChannelCaps {
    fn default() -> Self {
        Self {
            conn_processor: 128,
            server: 64,
            conn_pool: 128,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProxySettings {
    pub channel_caps: ChannelCaps,
    pub cpn_count: usize,
    pub handshake_timeout: std::time::Duration,
    pub drain_timeout: std::time::Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            channel_caps: ChannelCaps::default(),
            cpn_count: 4,
            handshake_timeout: std::time::Duration::from_secs(5),
            drain_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// The four loader methods the original implementation's `ProxyConfig`
/// interface exposes, preserved here as the shape of this trait: a
/// fully-constructed config is loaded once at startup and again, in
/// full, on every reload. The supervisor never partially re-queries it.
pub trait ProxyConfig: Send + Sync {
    fn load_gateways(&self) -> anyhow::Result<Vec<GatewayConfig>>;
    fn load_servers(&self) -> anyhow::Result<Vec<ServerConfig>>;
    fn load_conn_processor(&self) -> anyhow::Result<Arc<dyn ConnProcessor>>;
    fn load_proxy_settings(&self) -> anyhow::Result<ProxySettings>;
}
