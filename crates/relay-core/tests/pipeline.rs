use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use relay_core::{
    ChannelCaps, ChannelEventSink, ConnProcessor, Event, GatewayConfig, NoopEventSink,
    OfflineStatus, Proxy, ProxyConfig, ProxySettings, ServerConfig, StandardConnProcessor,
};
use relay_protocol::packets::{Handshake, NextState, Ping};
use relay_protocol::{write_packet, Packet};

struct TestConfig {
    gateways: Vec<GatewayConfig>,
    servers: Vec<ServerConfig>,
    settings: ProxySettings,
}

impl ProxyConfig for TestConfig {
    fn load_gateways(&self) -> anyhow::Result<Vec<GatewayConfig>> {
        Ok(self.gateways.clone())
    }
    fn load_servers(&self) -> anyhow::Result<Vec<ServerConfig>> {
        Ok(self.servers.clone())
    }
    fn load_conn_processor(&self) -> anyhow::Result<Arc<dyn ConnProcessor>> {
        Ok(Arc::new(StandardConnProcessor))
    }
    fn load_proxy_settings(&self) -> anyhow::Result<ProxySettings> {
        Ok(self.settings.clone())
    }
}

async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn write_handshake(buf: &mut Vec<u8>, vhost: &str, next: NextState, threshold: i32) {
    let hs = Handshake {
        protocol_version: 760,
        server_address: vhost.to_owned(),
        server_port: 25565,
        next_state: next,
    };
    let pk = Packet::new(0x00, hs.encode());
    buf.extend_from_slice(&write_packet(&pk, threshold).unwrap());
}

fn write_login_start(buf: &mut Vec<u8>, username: &str, threshold: i32) {
    let mut payload = Vec::new();
    relay_protocol::fields::write_string(&mut payload, username);
    let pk = Packet::new(0x00, payload);
    buf.extend_from_slice(&write_packet(&pk, threshold).unwrap());
}

#[tokio::test]
async fn login_passthrough_relays_large_payload_both_ways() {
    let backend_addr = free_addr().await;
    let backend_listener = TcpListener::bind(backend_addr).await.unwrap();

    let gateway_addr = free_addr().await;
    let config = Arc::new(TestConfig {
        gateways: vec![GatewayConfig {
            id: "public".into(),
            bind_addr: gateway_addr,
        }],
        servers: vec![ServerConfig {
            name: "main".into(),
            hostnames: vec!["play.example.com".into()],
            backend_addr,
            dial_timeout: Duration::from_secs(2),
            disconnect_message: "offline".into(),
            offline_status: None,
        }],
        settings: ProxySettings {
            channel_caps: ChannelCaps {
                conn_processor: 8,
                server: 8,
                conn_pool: 8,
            },
            cpn_count: 2,
            handshake_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
        },
    });

    let proxy = Proxy::start(config, Arc::new(NoopEventSink)).await.unwrap();

    let backend_task = tokio::spawn(async move {
        let (mut server_side, _) = backend_listener.accept().await.unwrap();
        let mut header = vec![0u8; 0];
        // Read exactly the handshake + login-start frames the client sent.
        let mut buf = [0u8; 4096];
        // Drain whatever arrives for a brief moment (handshake + login-start).
        tokio::time::sleep(Duration::from_millis(100)).await;
        loop {
            match tokio::time::timeout(Duration::from_millis(200), server_side.read(&mut buf))
                .await
            {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => header.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => break,
            }
        }
        assert!(!header.is_empty());

        // Echo a 1 MiB payload back, and read a matching payload from the
        // client side, to prove the tunnel relays both directions intact.
        let payload = vec![0x42u8; 1024 * 1024];
        server_side.write_all(&payload).await.unwrap();

        let mut received = vec![0u8; payload.len()];
        server_side.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);
    });

    let mut client = TcpStream::connect(gateway_addr).await.unwrap();
    let mut out = Vec::new();
    write_handshake(&mut out, "play.example.com", NextState::Login, 0);
    write_login_start(&mut out, "Alice", 0);
    client.write_all(&out).await.unwrap();

    let mut from_backend = vec![0u8; 1024 * 1024];
    client.read_exact(&mut from_backend).await.unwrap();
    assert_eq!(from_backend, vec![0x42u8; 1024 * 1024]);

    client.write_all(&vec![0x99u8; 1024 * 1024]).await.unwrap();

    backend_task.await.unwrap();
    proxy.close().await;
}

#[tokio::test]
async fn status_falls_back_to_offline_response_when_backend_is_down() {
    // Nothing is listening on this address: dial will fail/refuse fast.
    let backend_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

    let gateway_addr = free_addr().await;
    let config = Arc::new(TestConfig {
        gateways: vec![GatewayConfig {
            id: "public".into(),
            bind_addr: gateway_addr,
        }],
        servers: vec![ServerConfig {
            name: "main".into(),
            hostnames: vec!["play.example.com".into()],
            backend_addr,
            dial_timeout: Duration::from_millis(300),
            disconnect_message: "offline".into(),
            offline_status: Some(OfflineStatus {
                version_name: "1.20.1".into(),
                protocol: 763,
                max_players: 20,
                online_players: 0,
                description: "Server is offline.".into(),
            }),
        }],
        settings: ProxySettings {
            channel_caps: ChannelCaps::default(),
            cpn_count: 2,
            handshake_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
        },
    });

    let proxy = Proxy::start(config, Arc::new(NoopEventSink)).await.unwrap();

    let mut client = TcpStream::connect(gateway_addr).await.unwrap();
    let mut out = Vec::new();
    write_handshake(&mut out, "play.example.com", NextState::Status, 0);
    // Status request: empty-payload packet id 0x00.
    let status_request = Packet::new(0x00, Vec::new());
    out.extend_from_slice(&write_packet(&status_request, 0).unwrap());
    let ping = Ping { payload: 123456789 };
    out.extend_from_slice(&write_packet(&Packet::new(0x01, ping.encode()), 0).unwrap());
    client.write_all(&out).await.unwrap();

    let mut decoder = relay_protocol::FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut packets = Vec::new();
    while packets.len() < 2 {
        let n = client.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before both packets arrived");
        decoder.queue_bytes(&buf[..n]);
        while let Some((pk, _raw)) = decoder.try_next_packet().unwrap() {
            packets.push(pk);
        }
    }

    // The status response payload is a varint-length-prefixed JSON string.
    let mut r: &[u8] = &packets[0].payload;
    let json = relay_protocol::fields::read_string(&mut r, 32_767).unwrap();
    assert!(json.contains("Server is offline."));

    assert_eq!(Ping::decode(&packets[1].payload).unwrap(), ping);

    proxy.close().await;
}

#[tokio::test]
async fn unrouted_hostname_closes_connection_and_emits_no_route() {
    let gateway_addr = free_addr().await;
    let (sink, rx) = ChannelEventSink::new();
    let config = Arc::new(TestConfig {
        gateways: vec![GatewayConfig {
            id: "public".into(),
            bind_addr: gateway_addr,
        }],
        servers: vec![ServerConfig {
            name: "main".into(),
            hostnames: vec!["play.example.com".into()],
            backend_addr: "127.0.0.1:1".parse().unwrap(),
            dial_timeout: Duration::from_millis(100),
            disconnect_message: "offline".into(),
            offline_status: None,
        }],
        settings: ProxySettings {
            channel_caps: ChannelCaps::default(),
            cpn_count: 1,
            handshake_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
        },
    });

    let proxy = Proxy::start(config, Arc::new(sink)).await.unwrap();

    let mut client = TcpStream::connect(gateway_addr).await.unwrap();
    let mut out = Vec::new();
    write_handshake(&mut out, "nope.example", NextState::Status, 0);
    client.write_all(&out).await.unwrap();

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "proxy should close the connection with no matching server");

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv_async())
        .await
        .expect("NoRoute event should fire")
        .unwrap();
    match event {
        Event::NoRoute { vhost, .. } => assert_eq!(vhost, "nope.example"),
        other => panic!("expected NoRoute, got {other:?}"),
    }

    proxy.close().await;
}

#[tokio::test]
async fn handshake_timeout_closes_idle_connection() {
    let gateway_addr = free_addr().await;
    let config = Arc::new(TestConfig {
        gateways: vec![GatewayConfig {
            id: "public".into(),
            bind_addr: gateway_addr,
        }],
        servers: vec![],
        settings: ProxySettings {
            channel_caps: ChannelCaps::default(),
            cpn_count: 1,
            handshake_timeout: Duration::from_millis(200),
            drain_timeout: Duration::from_secs(2),
        },
    });

    let proxy = Proxy::start(config, Arc::new(NoopEventSink)).await.unwrap();

    let mut client = TcpStream::connect(gateway_addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
        .await
        .expect("read should not itself hang")
        .unwrap();
    assert_eq!(n, 0, "connection should be closed after the handshake deadline");

    proxy.close().await;
}

#[tokio::test]
async fn reload_mid_flight_completes_all_clients_and_routes_new_ones_to_new_backend() {
    let backend_a_addr = free_addr().await;
    let backend_b_addr = free_addr().await;
    let backend_a = TcpListener::bind(backend_a_addr).await.unwrap();
    let backend_b = TcpListener::bind(backend_b_addr).await.unwrap();

    let gateway_addr = free_addr().await;

    let old_config = Arc::new(TestConfig {
        gateways: vec![GatewayConfig {
            id: "public".into(),
            bind_addr: gateway_addr,
        }],
        servers: vec![ServerConfig {
            name: "main".into(),
            hostnames: vec!["play.example.com".into()],
            backend_addr: backend_a_addr,
            dial_timeout: Duration::from_secs(2),
            disconnect_message: "offline".into(),
            offline_status: None,
        }],
        settings: ProxySettings {
            // Deliberately tight caps and a single CPN worker so several
            // of the connections below are still queued mid-pipeline
            // (not yet routed) at the moment reload is invoked.
            channel_caps: ChannelCaps {
                conn_processor: 2,
                server: 1,
                conn_pool: 4,
            },
            cpn_count: 1,
            handshake_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
        },
    });

    let mut proxy = Proxy::start(old_config, Arc::new(NoopEventSink))
        .await
        .unwrap();

    // Each backend tags every connection it receives with a single byte so
    // a client can tell which server table routed it.
    fn serve_tag(listener: TcpListener, tag: u8) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    let _ = tokio::time::timeout(
                        Duration::from_millis(200),
                        stream.read(&mut buf),
                    )
                    .await;
                    let _ = stream.write_all(&[tag]).await;
                });
            }
        })
    }

    let backend_a_task = serve_tag(backend_a, b'A');

    const N: usize = 20;
    let mut clients = Vec::with_capacity(N);
    for _ in 0..N {
        clients.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(gateway_addr).await.unwrap();
            let mut out = Vec::new();
            write_handshake(&mut out, "play.example.com", NextState::Login, 0);
            write_login_start(&mut out, "Mid", 0);
            client.write_all(&out).await.unwrap();
            let mut tag = [0u8; 1];
            tokio::time::timeout(Duration::from_secs(3), client.read_exact(&mut tag))
                .await
                .expect("client should receive a tag before timing out")
                .unwrap();
            tag[0]
        }));
    }

    // Give the gateway/CPN pool a moment to start accepting into the
    // bounded channels, so some of the above are genuinely queued when
    // reload runs below, without waiting for any of them to finish.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let backend_b_task = serve_tag(backend_b, b'B');
    let new_config = Arc::new(TestConfig {
        gateways: vec![GatewayConfig {
            id: "public".into(),
            bind_addr: gateway_addr,
        }],
        servers: vec![ServerConfig {
            name: "main".into(),
            hostnames: vec!["play.example.com".into()],
            backend_addr: backend_b_addr,
            dial_timeout: Duration::from_secs(2),
            disconnect_message: "offline".into(),
            offline_status: None,
        }],
        settings: ProxySettings {
            channel_caps: ChannelCaps {
                conn_processor: 16,
                server: 16,
                conn_pool: 16,
            },
            cpn_count: 8,
            handshake_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
        },
    });

    proxy.reload(new_config).await.unwrap();

    let mut tags = Vec::with_capacity(N);
    for c in clients {
        tags.push(
            tokio::time::timeout(Duration::from_secs(5), c)
                .await
                .expect("every mid-flight client must finish routing, none dropped")
                .unwrap(),
        );
    }
    assert_eq!(tags.len(), N);

    // A connection made once reload has returned must land on the new
    // server table, not the one that was replaced.
    let mut late_client = TcpStream::connect(gateway_addr).await.unwrap();
    let mut out = Vec::new();
    write_handshake(&mut out, "play.example.com", NextState::Login, 0);
    write_login_start(&mut out, "Late", 0);
    late_client.write_all(&out).await.unwrap();
    let mut tag = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(3), late_client.read_exact(&mut tag))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        tag[0], b'B',
        "connections accepted after reload must route via the new server table"
    );

    backend_a_task.abort();
    backend_b_task.abort();
    proxy.close().await;
}

#[tokio::test]
async fn malformed_varint_closes_only_the_offending_connection() {
    let gateway_addr = free_addr().await;
    let backend_addr = free_addr().await;
    let backend_listener = TcpListener::bind(backend_addr).await.unwrap();

    let config = Arc::new(TestConfig {
        gateways: vec![GatewayConfig {
            id: "public".into(),
            bind_addr: gateway_addr,
        }],
        servers: vec![ServerConfig {
            name: "main".into(),
            hostnames: vec!["play.example.com".into()],
            backend_addr,
            dial_timeout: Duration::from_secs(2),
            disconnect_message: "offline".into(),
            offline_status: None,
        }],
        settings: ProxySettings {
            channel_caps: ChannelCaps::default(),
            cpn_count: 2,
            handshake_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
        },
    });

    let proxy = Proxy::start(config, Arc::new(NoopEventSink)).await.unwrap();

    // Connection A: six continuation bytes, an invalid VarInt.
    let mut bad = TcpStream::connect(gateway_addr).await.unwrap();
    bad.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])
        .await
        .unwrap();
    let mut buf = [0u8; 8];
    let n = bad.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "malformed varint should close the connection");

    let backend_task = tokio::spawn(async move {
        let (_server_side, _) = backend_listener.accept().await.unwrap();
    });

    // Connection B: a legitimate handshake, unaffected by A's failure.
    let mut good = TcpStream::connect(gateway_addr).await.unwrap();
    let mut out = Vec::new();
    write_handshake(&mut out, "play.example.com", NextState::Login, 0);
    write_login_start(&mut out, "Bob", 0);
    good.write_all(&out).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), backend_task)
        .await
        .expect("backend should still receive the good connection")
        .unwrap();

    proxy.close().await;
}
