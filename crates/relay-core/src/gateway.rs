use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::conn::Conn;
use crate::shutdown::{signal_pair, Observer, Signal};

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub id: String,
    pub bind_addr: SocketAddr,
}

/// A listening endpoint. `listen_and_serve` loops accepting connections
/// and pushing them onto `out` until the paired [`Signal`] fires, at
/// which point the loop exits without closing `out` — that channel
/// belongs to the Proxy, not the gateway.
pub struct Gateway {
    pub config: GatewayConfig,
    listener: TcpListener,
    stop: Observer,
}

impl Gateway {
    pub async fn bind(config: GatewayConfig) -> std::io::Result<(Self, Signal)> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (stop_tx, stop_rx) = signal_pair();
        Ok((
            Self {
                config,
                listener,
                stop: stop_rx,
            },
            stop_tx,
        ))
    }

    /// Accepts connections until the [`Signal`] returned by [`Self::bind`]
    /// fires. On transient accept errors the loop logs and backs off
    /// briefly; on a stop signal it exits cleanly.
    pub async fn listen_and_serve(mut self, out: flume::Sender<Conn>) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => {
                    info!(gateway = %self.config.id, "gateway closing");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => self.handle_accept(stream, &out).await,
                        Err(e) => {
                            warn!(gateway = %self.config.id, error = %e, "transient accept error");
                            sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_accept(&self, stream: TcpStream, out: &flume::Sender<Conn>) {
        let conn = match Conn::new(stream, self.config.id.clone()) {
            Ok(c) => c,
            Err(e) => {
                warn!(gateway = %self.config.id, error = %e, "failed to read peer/local addr");
                return;
            }
        };
        // A full `out` channel is the back-pressure mechanism: this send
        // blocks the accept loop, which in turn leaves new connections
        // queued in the kernel's accept backlog rather than dropped.
        if out.send_async(conn).await.is_err() {
            warn!(gateway = %self.config.id, "cpn channel closed, dropping accepted connection");
        }
    }
}
