use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::conn::ConnTunnel;
use crate::shutdown::{signal_pair, Observer, Signal};

const COPY_BUF_SIZE: usize = 32 * 1024;

pub(crate) struct ActiveTunnel {
    done: Observer,
}

/// Consumes [`ConnTunnel`]s and spawns two unidirectional byte-copy tasks
/// per tunnel. Tracks active tunnels by id so `close` can wait (up to a
/// deadline) for in-flight pumps to finish before force-closing.
pub struct ConnPool {
    pool_rx: flume::Receiver<ConnTunnel>,
    active: Arc<Mutex<HashMap<u64, ActiveTunnel>>>,
    stop: Observer,
}

impl ConnPool {
    pub fn new(pool_rx: flume::Receiver<ConnTunnel>) -> (Self, Signal) {
        let (stop_tx, stop_rx) = signal_pair();
        (
            Self {
                pool_rx,
                active: Arc::new(Mutex::new(HashMap::new())),
                stop: stop_rx,
            },
            stop_tx,
        )
    }

    /// Reuses the tracker across a reload so already-running tunnels are
    /// unaffected by the dispatcher restarting on a new channel.
    pub fn with_tracker(
        pool_rx: flume::Receiver<ConnTunnel>,
        active: Arc<Mutex<HashMap<u64, ActiveTunnel>>>,
    ) -> (Self, Signal) {
        let (stop_tx, stop_rx) = signal_pair();
        (
            Self {
                pool_rx,
                active,
                stop: stop_rx,
            },
            stop_tx,
        )
    }

    pub fn tracker(&self) -> Arc<Mutex<HashMap<u64, ActiveTunnel>>> {
        self.active.clone()
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => {
                    info!("connection pool dispatcher stopping");
                    return;
                }
                recv = self.pool_rx.recv_async() => {
                    match recv {
                        Ok(tunnel) => self.spawn_tunnel(tunnel).await,
                        Err(_) => return,
                    }
                }
            }
        }
    }

    async fn spawn_tunnel(&self, tunnel: ConnTunnel) {
        let id = tunnel.id;
        let (done_tx, done_rx) = signal_pair();
        self.active
            .lock()
            .await
            .insert(id, ActiveTunnel { done: done_rx });

        let active = self.active.clone();
        tokio::spawn(async move {
            pump_tunnel(tunnel).await;
            active.lock().await.remove(&id);
            let _ = done_tx.send(true);
        });
    }

    /// Signals the dispatcher to stop accepting new tunnels and waits up
    /// to `drain_timeout` for currently-tracked ones to finish on their
    /// own; does not forcibly close sockets (the pumps themselves close
    /// on EOF/error).
    pub async fn close(&self, stop: &Signal, drain_timeout: Duration) {
        let _ = stop.send(true);
        wait_for_drain(&self.active, drain_timeout).await;
    }
}

/// Waits up to `drain_timeout` for every tunnel currently tracked in
/// `active` to finish. Shared between [`ConnPool::close`] and the
/// supervisor's own shutdown path, since the tracker outlives any one
/// `ConnPool` instance across a reload.
pub(crate) async fn wait_for_drain(
    active: &Arc<Mutex<HashMap<u64, ActiveTunnel>>>,
    drain_timeout: Duration,
) {
    let mut waiters: Vec<Observer> = active.lock().await.values().map(|t| t.done.clone()).collect();
    if waiters.is_empty() {
        return;
    }
    debug!(remaining = waiters.len(), "waiting for tunnels to drain");
    let _ = timeout(drain_timeout, async {
        for w in &mut waiters {
            // `wait_for` checks the currently-held value before waiting,
            // so a tunnel that already finished is observed immediately
            // instead of only on a future change.
            let _ = w.wait_for(|done| *done).await;
        }
    })
    .await;
}

async fn pump_tunnel(tunnel: ConnTunnel) {
    let ConnTunnel {
        id,
        client,
        server,
        gateway_id,
        server_name,
    } = tunnel;

    let (mut client_r, mut client_w) = split(client);
    let (mut server_r, mut server_w) = split(server);

    let client_to_server = async {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match client_r.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if server_w.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
        let _ = server_w.shutdown().await;
    };

    let server_to_client = async {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match server_r.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if client_w.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
        let _ = client_w.shutdown().await;
    };

    tokio::join!(client_to_server, server_to_client);
    debug!(tunnel_id = id, gateway = %gateway_id, server = %server_name, "tunnel closed");
}
