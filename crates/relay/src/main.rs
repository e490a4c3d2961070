use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relay_config::cli::Cli;
use relay_config::TomlProxyConfig;
use relay_core::{Event, EventSink, Proxy, ProxyConfig};

struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        match event {
            Event::PlayerJoin {
                gateway_id,
                remote_addr,
                vhost,
                protocol_version,
                next_state,
            } => info!(
                gateway = %gateway_id, %remote_addr, %vhost, protocol_version, ?next_state,
                "player join"
            ),
            Event::NoRoute {
                gateway_id,
                remote_addr,
                vhost,
            } => warn!(gateway = %gateway_id, %remote_addr, %vhost, "no route"),
            Event::HandshakeTimeout {
                gateway_id,
                remote_addr,
            } => warn!(gateway = %gateway_id, %remote_addr, "handshake timeout"),
            Event::DialFailed {
                server_name,
                backend_addr,
            } => warn!(server = %server_name, %backend_addr, "backend dial failed"),
            Event::ReloadCompleted => info!("reload completed"),
        }
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "relay=info,relay_core=info,relay_config=info",
        1 => "relay=debug,relay_core=debug,relay_config=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config: Arc<dyn ProxyConfig> = Arc::new(TomlProxyConfig::new(cli.config.clone()));
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    let mut proxy = Proxy::start(config.clone(), events).await?;
    info!(config = %cli.config.display(), "proxy listening");

    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                break;
            }
            Some(()) = hangup.recv() => {
                info!("received SIGHUP, reloading configuration");
                if let Err(e) = proxy.reload(config.clone()).await {
                    error!(error = %e, "reload failed, keeping previous configuration");
                }
            }
        }
    }

    proxy.close().await;
    Ok(())
}
