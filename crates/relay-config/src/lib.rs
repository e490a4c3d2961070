//! A [`relay_core::ProxyConfig`] implementation backed by a TOML file,
//! plus the CLI argument shape for the `relay` binary.

pub mod cli;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use relay_core::{
    ChannelCaps, ConnProcessor, GatewayConfig, OfflineStatus, ProxyConfig, ProxySettings,
    ServerConfig, StandardConnProcessor,
};

#[derive(Debug, Deserialize)]
struct FileGateway {
    id: String,
    bind_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
struct FileOfflineStatus {
    version_name: String,
    protocol: i32,
    max_players: i32,
    online_players: i32,
    description: String,
}

#[derive(Debug, Deserialize)]
struct FileServer {
    hostnames: Vec<String>,
    backend_addr: SocketAddr,
    #[serde(default = "default_dial_timeout_ms")]
    dial_timeout_ms: u64,
    #[serde(default)]
    disconnect_message: String,
    offline_status: Option<FileOfflineStatus>,
}

#[derive(Debug, Deserialize)]
struct FileChannelCaps {
    #[serde(default = "default_conn_processor_cap")]
    conn_processor: usize,
    #[serde(default = "default_server_cap")]
    server: usize,
    #[serde(default = "default_conn_pool_cap")]
    conn_pool: usize,
}

impl Default for FileChannelCaps {
    fn default() -> Self {
        Self {
            conn_processor: default_conn_processor_cap(),
            server: default_server_cap(),
            conn_pool: default_conn_pool_cap(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileSettings {
    #[serde(default = "default_cpn_count")]
    cpn_count: usize,
    #[serde(default = "default_handshake_timeout_ms")]
    handshake_timeout_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    drain_timeout_ms: u64,
    #[serde(default)]
    channel_caps: FileChannelCaps,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            cpn_count: default_cpn_count(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            channel_caps: FileChannelCaps::default(),
        }
    }
}

fn default_cpn_count() -> usize {
    4
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_drain_timeout_ms() -> u64 {
    10_000
}
fn default_dial_timeout_ms() -> u64 {
    5_000
}
fn default_conn_processor_cap() -> usize {
    128
}
fn default_server_cap() -> usize {
    64
}
fn default_conn_pool_cap() -> usize {
    128
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    settings: FileSettings,
    #[serde(default)]
    gateways: Vec<FileGateway>,
    #[serde(default)]
    servers: Vec<FileServer>,
}

/// Loads (and, on every call, re-loads) a [`relay_core::ProxyConfig`]
/// from a TOML file on disk. Re-reading on every `load_*` call is what
/// lets the binary's SIGHUP handler simply call `Proxy::reload` with the
/// same `TomlProxyConfig` and pick up whatever is currently on disk.
pub struct TomlProxyConfig {
    path: PathBuf,
}

impl TomlProxyConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load_file(&self) -> anyhow::Result<FileConfig> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading config file {}", self.path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", self.path.display()))
    }
}

impl ProxyConfig for TomlProxyConfig {
    fn load_gateways(&self) -> anyhow::Result<Vec<GatewayConfig>> {
        Ok(self
            .load_file()?
            .gateways
            .into_iter()
            .map(|g| GatewayConfig {
                id: g.id,
                bind_addr: g.bind_addr,
            })
            .collect())
    }

    fn load_servers(&self) -> anyhow::Result<Vec<ServerConfig>> {
        Ok(self
            .load_file()?
            .servers
            .into_iter()
            .map(|s| {
                let name = s.hostnames.first().cloned().unwrap_or_default();
                ServerConfig {
                    name,
                    hostnames: s.hostnames,
                    backend_addr: s.backend_addr,
                    dial_timeout: Duration::from_millis(s.dial_timeout_ms),
                    disconnect_message: s.disconnect_message,
                    offline_status: s.offline_status.map(|o| OfflineStatus {
                        version_name: o.version_name,
                        protocol: o.protocol,
                        max_players: o.max_players,
                        online_players: o.online_players,
                        description: o.description,
                    }),
                }
            })
            .collect())
    }

    fn load_conn_processor(&self) -> anyhow::Result<Arc<dyn ConnProcessor>> {
        Ok(Arc::new(StandardConnProcessor))
    }

    fn load_proxy_settings(&self) -> anyhow::Result<ProxySettings> {
        let file = self.load_file()?;
        Ok(ProxySettings {
            channel_caps: ChannelCaps {
                conn_processor: file.settings.channel_caps.conn_processor,
                server: file.settings.channel_caps.server,
                conn_pool: file.settings.channel_caps.conn_pool,
            },
            cpn_count: file.settings.cpn_count,
            handshake_timeout: Duration::from_millis(file.settings.handshake_timeout_ms),
            drain_timeout: Duration::from_millis(file.settings.drain_timeout_ms),
        })
    }
}
