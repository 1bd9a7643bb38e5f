//! Drives a real `HubServer` over loopback TCP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vigil_hub::HubServer;
use vigil_kernel::{AlertMode, LivenessRegistry, MonitorConfig};
use vigil_middleware::{EventBus, Topic};
use vigil_types::{ClientId, EventPayload, VigilError};

struct RunningHub {
    addr: SocketAddr,
    registry: Arc<LivenessRegistry>,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<(), VigilError>>,
}

impl RunningHub {
    async fn shutdown(self) {
        self.stop.send(true).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

async fn start(server: HubServer) -> RunningHub {
    let hub = server
        .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_port(0)
        .bind()
        .await
        .expect("bind");
    let addr = hub.local_addr();
    let registry = hub.registry();
    let (stop, rx) = watch::channel(false);
    let task = tokio::spawn(hub.serve(rx));
    RunningHub {
        addr,
        registry,
        stop,
        task,
    }
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn pulse_over_tcp_reaches_registry() {
    let hub = start(HubServer::default()).await;

    let mut conn = TcpStream::connect(hub.addr).await.unwrap();
    conn.write_all(b"PULSE:Store-A\n").await.unwrap();

    let registry = Arc::clone(&hub.registry);
    wait_until("Store-A record", || {
        registry.last_seen(&ClientId::from("Store-A")).is_some()
    })
    .await;
    assert_eq!(registry.len(), 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn malformed_lines_keep_connection_open_and_registry_untouched() {
    let bus = EventBus::default();
    let mut alerts = bus.subscribe_to(Topic::Alerts);
    let hub = start(HubServer::new(bus.clone())).await;

    let mut conn = TcpStream::connect(hub.addr).await.unwrap();
    conn.write_all(b"ORDER:Store-A:Widget\nORDER:Store-A:Widget:ten\nORDER:a:b:c:d\n")
        .await
        .unwrap();

    let mut malformed = 0;
    while malformed < 3 {
        let event = tokio::time::timeout(Duration::from_secs(5), alerts.recv())
            .await
            .expect("alert in time")
            .unwrap();
        if matches!(event.payload, EventPayload::Malformed { .. }) {
            malformed += 1;
        }
    }
    assert!(hub.registry.is_empty());

    // Same connection still accepted.
    conn.write_all(b"PULSE:Store-A\n").await.unwrap();
    let registry = Arc::clone(&hub.registry);
    wait_until("pulse after malformed lines", || registry.len() == 1).await;

    hub.shutdown().await;
}

#[tokio::test]
async fn many_concurrent_connections() {
    const N: usize = 200;
    let hub = start(HubServer::default()).await;

    let mut clients = Vec::with_capacity(N);
    for n in 0..N {
        let addr = hub.addr;
        clients.push(tokio::spawn(async move {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            conn.write_all(format!("PULSE:unit-{n}\n").as_bytes())
                .await
                .unwrap();
            conn
        }));
    }
    let mut conns = Vec::with_capacity(N);
    for c in clients {
        conns.push(c.await.unwrap());
    }

    let registry = Arc::clone(&hub.registry);
    wait_until("all records", || registry.len() == N).await;
    for n in 0..N {
        assert!(registry.last_seen(&ClientId::new(format!("unit-{n}"))).is_some());
    }

    drop(conns);
    hub.shutdown().await;
}

#[tokio::test]
async fn silent_client_raises_repeated_alerts() {
    let bus = EventBus::default();
    let mut alerts = bus.subscribe_to(Topic::Alerts);
    let hub = start(HubServer::new(bus.clone()).with_monitor(MonitorConfig {
        deadline: Duration::from_millis(150),
        poll_interval: Duration::from_millis(50),
        mode: AlertMode::Repeat,
    }))
    .await;

    let mut conn = TcpStream::connect(hub.addr).await.unwrap();
    conn.write_all(b"PULSE:Car-9\n").await.unwrap();
    drop(conn);

    let mut stale = 0;
    while stale < 3 {
        let event = tokio::time::timeout(Duration::from_secs(5), alerts.recv())
            .await
            .expect("alert in time")
            .unwrap();
        if let EventPayload::StaleClient(alert) = event.payload {
            assert_eq!(alert.client.as_str(), "Car-9");
            assert!(alert.elapsed > Duration::from_millis(150));
            stale += 1;
        }
    }

    // The monitor never evicts.
    assert_eq!(hub.registry.len(), 1);
    hub.shutdown().await;
}

#[tokio::test]
async fn connections_over_the_cap_are_closed() {
    let hub = start(HubServer::default().with_max_connections(1)).await;

    let mut first = TcpStream::connect(hub.addr).await.unwrap();
    first.write_all(b"PULSE:first\n").await.unwrap();
    let registry = Arc::clone(&hub.registry);
    wait_until("first client", || registry.len() == 1).await;

    let mut second = TcpStream::connect(hub.addr).await.unwrap();
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf))
        .await
        .expect("hub closes the excess connection");
    assert!(matches!(read, Ok(0) | Err(_)));

    hub.shutdown().await;
}
