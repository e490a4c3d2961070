use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{ProxyConfig, ProxySettings};
use crate::conn::{Conn, ConnTunnel, ProcessedConn};
use crate::connpool::{wait_for_drain, ActiveTunnel, ConnPool};
use crate::cpn::CpnPool;
use crate::error::ProxyError;
use crate::events::{Event, EventSink};
use crate::gateway::{Gateway, GatewayConfig};
use crate::server_gateway::{RoutingTable, ServerGateway};
use crate::shutdown::Signal;

struct GatewayHandle {
    config: GatewayConfig,
    stop: Signal,
    task: JoinHandle<()>,
}

fn bounded<T>(cap: usize) -> (flume::Sender<T>, flume::Receiver<T>) {
    flume::bounded(cap)
}

/// Owns the three pipeline channels, the worker pools, and the gateway
/// listeners, and implements atomic reload: see SPEC_FULL.md §4.6 for
/// the five-step sequence this follows. The only step that can fail is
/// binding the new gateway listeners, so `reload` does that first and
/// rolls back to the old gateway addresses on failure, before touching
/// the Server Gateway, Connection Pool, or CPN pool.
pub struct Proxy {
    config: Arc<dyn ProxyConfig>,
    events: Arc<dyn EventSink>,
    settings: ProxySettings,

    cpn_tx: flume::Sender<Conn>,
    cpn_rx: flume::Receiver<Conn>,
    srv_tx: flume::Sender<ProcessedConn>,
    srv_rx: flume::Receiver<ProcessedConn>,
    pool_tx: flume::Sender<ConnTunnel>,
    pool_rx: flume::Receiver<ConnTunnel>,

    cpn_pool: CpnPool,
    gateways: Vec<GatewayHandle>,

    server_gateway_stop: Signal,
    server_gateway_task: Option<JoinHandle<()>>,
    pool_stop: Signal,
    pool_task: Option<JoinHandle<()>>,
    tracker: Arc<tokio::sync::Mutex<std::collections::HashMap<u64, ActiveTunnel>>>,
}

impl Proxy {
    pub async fn start(
        config: Arc<dyn ProxyConfig>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ProxyError> {
        let settings = config.load_proxy_settings()?;
        let gateway_cfgs = config.load_gateways()?;
        let server_cfgs = config.load_servers()?;
        let processor = config.load_conn_processor()?;

        let (cpn_tx, cpn_rx) = bounded(settings.channel_caps.conn_processor);
        let (srv_tx, srv_rx) = bounded(settings.channel_caps.server);
        let (pool_tx, pool_rx) = bounded(settings.channel_caps.conn_pool);
        let (_routing_tx, routing_rx) =
            watch::channel(Arc::new(RoutingTable::new(server_cfgs)));

        let mut cpn_pool = CpnPool::new(
            processor,
            cpn_rx.clone(),
            srv_tx.clone(),
            events.clone(),
            settings.handshake_timeout,
        );
        cpn_pool.set_size(settings.cpn_count);

        let (server_gateway, server_gateway_stop) = ServerGateway::new(
            srv_rx.clone(),
            pool_tx.clone(),
            routing_rx,
            events.clone(),
        );
        let server_gateway_task = Some(tokio::spawn(server_gateway.run()));

        let (conn_pool, pool_stop) = ConnPool::new(pool_rx.clone());
        let tracker = conn_pool.tracker();
        let pool_task = Some(tokio::spawn(conn_pool.run()));

        let mut gateways = Vec::new();
        for gw_cfg in gateway_cfgs {
            gateways.push(Self::spawn_gateway(gw_cfg, cpn_tx.clone()).await?);
        }

        info!(gateways = gateways.len(), cpn_count = settings.cpn_count, "proxy started");

        Ok(Self {
            config,
            events,
            settings,
            cpn_tx,
            cpn_rx,
            srv_tx,
            srv_rx,
            pool_tx,
            pool_rx,
            cpn_pool,
            gateways,
            server_gateway_stop,
            server_gateway_task,
            pool_stop,
            pool_task,
            tracker,
        })
    }

    async fn spawn_gateway(
        gw_cfg: GatewayConfig,
        cpn_tx: flume::Sender<Conn>,
    ) -> Result<GatewayHandle, ProxyError> {
        let (gateway, stop) = Gateway::bind(gw_cfg.clone())
            .await
            .map_err(|source| ProxyError::GatewayBind {
                id: gw_cfg.id.clone(),
                addr: gw_cfg.bind_addr,
                source,
            })?;
        let task = tokio::spawn(gateway.listen_and_serve(cpn_tx));
        Ok(GatewayHandle {
            config: gw_cfg,
            stop,
            task,
        })
    }

    /// Swaps in a freshly-loaded configuration without dropping in-flight
    /// connections. See SPEC_FULL.md §4.6; steps below are numbered to
    /// match that sequence.
    pub async fn reload(&mut self, config: Arc<dyn ProxyConfig>) -> Result<(), ProxyError> {
        let settings = config.load_proxy_settings()?;
        let gateway_cfgs = config.load_gateways()?;
        let server_cfgs = config.load_servers()?;
        let processor = config.load_conn_processor()?;

        let (cpn_tx2, cpn_rx2) = bounded(settings.channel_caps.conn_processor);
        let (srv_tx2, srv_rx2) = bounded(settings.channel_caps.server);
        let (pool_tx2, pool_rx2) = bounded(settings.channel_caps.conn_pool);
        let (_routing_tx2, routing_rx2) =
            watch::channel(Arc::new(RoutingTable::new(server_cfgs)));

        let old_gateway_cfgs: Vec<GatewayConfig> =
            self.gateways.iter().map(|gw| gw.config.clone()).collect();

        // Step 1: close old gateway listeners so no new connections land
        // on their addresses while the replacements are bound.
        for gw in &self.gateways {
            let _ = gw.stop.send(true);
        }
        for gw in self.gateways.drain(..) {
            let _ = gw.task.await;
        }

        // Bind every new gateway before touching the Server Gateway,
        // Connection Pool, or CPN pool. This is the only step in reload
        // that can still fail; if it does, reopen the old addresses and
        // return with everything downstream untouched (SPEC_FULL.md §7:
        // a gateway bind failure at reload time is reported and the old
        // listener stays up).
        let mut new_gateways = Vec::new();
        let mut bind_error = None;
        for gw_cfg in gateway_cfgs {
            match Self::spawn_gateway(gw_cfg, cpn_tx2.clone()).await {
                Ok(handle) => new_gateways.push(handle),
                Err(e) => {
                    bind_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = bind_error {
            for gw in new_gateways.drain(..) {
                let _ = gw.stop.send(true);
                let _ = gw.task.await;
            }
            let mut restored = Vec::new();
            for gw_cfg in old_gateway_cfgs {
                match Self::spawn_gateway(gw_cfg, self.cpn_tx.clone()).await {
                    Ok(handle) => restored.push(handle),
                    Err(restore_err) => {
                        error!(error = %restore_err, "failed to reopen gateway after aborted reload");
                    }
                }
            }
            self.gateways = restored;
            return Err(e);
        }

        // Step 2: stop the old Server Gateway and Connection Pool
        // dispatcher, awaiting whatever single item each was mid-routing.
        let _ = self.server_gateway_stop.send(true);
        if let Some(task) = self.server_gateway_task.take() {
            let _ = task.await;
        }
        let _ = self.pool_stop.send(true);
        if let Some(task) = self.pool_task.take() {
            let _ = task.await;
        }

        // Step 3: drain the CPN pool to zero, then rebuild it bound to
        // the new channels at the new size.
        self.cpn_pool.set_size(0);
        self.cpn_pool = CpnPool::new(
            processor,
            cpn_rx2.clone(),
            srv_tx2.clone(),
            self.events.clone(),
            settings.handshake_timeout,
        );
        self.cpn_pool.set_size(settings.cpn_count);

        // Step 4: drain whatever is left on the old channels onto the
        // new ones. By this point nothing is still sending into the old
        // channels, so `try_recv` draining is race-free.
        while let Ok(conn) = self.cpn_rx.try_recv() {
            let _ = cpn_tx2.send_async(conn).await;
        }
        while let Ok(processed) = self.srv_rx.try_recv() {
            let _ = srv_tx2.send_async(processed).await;
        }
        while let Ok(tunnel) = self.pool_rx.try_recv() {
            let _ = pool_tx2.send_async(tunnel).await;
        }

        // Step 5: start the new Server Gateway and Connection Pool
        // dispatcher (the latter reusing the existing tunnel tracker so
        // already-running tunnels are unaffected). The new gateway
        // listeners were already bound above, before step 1 tore down
        // anything that a bind failure couldn't otherwise roll back.
        let (server_gateway, server_gateway_stop) = ServerGateway::new(
            srv_rx2.clone(),
            pool_tx2.clone(),
            routing_rx2,
            self.events.clone(),
        );
        let server_gateway_task = Some(tokio::spawn(server_gateway.run()));

        let (conn_pool, pool_stop) =
            ConnPool::with_tracker(pool_rx2.clone(), self.tracker.clone());
        let pool_task = Some(tokio::spawn(conn_pool.run()));

        self.cpn_tx = cpn_tx2;
        self.cpn_rx = cpn_rx2;
        self.srv_tx = srv_tx2;
        self.srv_rx = srv_rx2;
        self.pool_tx = pool_tx2;
        self.pool_rx = pool_rx2;
        self.server_gateway_stop = server_gateway_stop;
        self.server_gateway_task = server_gateway_task;
        self.pool_stop = pool_stop;
        self.pool_task = pool_task;
        self.gateways = new_gateways;
        self.settings = settings;
        self.config = config;

        self.events.emit(Event::ReloadCompleted);
        info!("reload completed");
        Ok(())
    }

    /// Closes every gateway listener, stops the Server Gateway and
    /// Connection Pool, and waits up to `drain_timeout` for active
    /// tunnels before returning.
    pub async fn close(mut self) {
        for gw in &self.gateways {
            let _ = gw.stop.send(true);
        }
        for gw in self.gateways.drain(..) {
            let _ = gw.task.await;
        }

        let _ = self.server_gateway_stop.send(true);
        if let Some(task) = self.server_gateway_task.take() {
            let _ = task.await;
        }
        let _ = self.pool_stop.send(true);
        if let Some(task) = self.pool_task.take() {
            let _ = task.await;
        }

        wait_for_drain(&self.tracker, self.settings.drain_timeout).await;
        info!("proxy closed");
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }
}
