//! End-to-end tests over loopback TCP

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use strandline::crypto::sha256;
use strandline::metrics::{self, CONNECTIONS_ACCEPTED_TOTAL, CONNECTIONS_DIALED_TOTAL};
use strandline::{
    Acceptor, Config, Connection, ConnectionState, Connector, Error, TcpAcceptor, TcpConnection,
    TcpConnector,
};

const GUARD: Duration = Duration::from_secs(5);
const PAYLOAD_LEN: usize = 64 * 1024;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Reads `PAYLOAD_LEN` bytes and answers with their SHA-256 digest
async fn serve_digest(cnx: TcpConnection) -> strandline::Result<()> {
    let mut payload = vec![0u8; PAYLOAD_LEN];
    cnx.read_exact(&mut payload).await?;
    let digest = sha256(&payload);
    cnx.write(&digest).await?;
    cnx.close().await
}

fn spawn_accept_loop(acceptor: Arc<TcpAcceptor>) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut served = 0;
        loop {
            match acceptor.accept().await {
                Ok(cnx) => {
                    served += 1;
                    tokio::spawn(async move {
                        if let Err(e) = serve_digest(cnx).await {
                            tracing::warn!("digest session failed: {}", e);
                        }
                    });
                }
                Err(e) if e.is_listener_closed() => break,
                Err(e) => panic!("accept failed: {}", e),
            }
        }
        served
    })
}

fn payload(seed: u8) -> Vec<u8> {
    (0..PAYLOAD_LEN).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[tokio::test]
async fn test_digest_round_trip() {
    init_tracing();
    let acceptor = Arc::new(TcpAcceptor::bind("127.0.0.1:0").await.unwrap());
    assert_ne!(acceptor.end_point().port(), 0);
    let server = spawn_accept_loop(Arc::clone(&acceptor));

    let connector = TcpConnector::new(Some(*acceptor.end_point())).unwrap();
    let client = connector.connect_default().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let data = payload(7);
    assert_eq!(client.write(&data).await.unwrap(), PAYLOAD_LEN);

    let mut digest = [0u8; 32];
    timeout(GUARD, client.read_exact(&mut digest)).await.unwrap().unwrap();
    assert_eq!(digest, sha256(&data));

    client.close().await.unwrap();
    client.close().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(client.read(&mut digest).await, Err(Error::ConnectionClosed)));

    acceptor.close().await.unwrap();
    let served = timeout(GUARD, server).await.unwrap().unwrap();
    assert_eq!(served, 1);
}

#[tokio::test]
async fn test_concurrent_dials_get_distinct_ports() {
    init_tracing();
    const DIALS: usize = 16;

    let acceptor = Arc::new(TcpAcceptor::bind("127.0.0.1:0").await.unwrap());
    let server = spawn_accept_loop(Arc::clone(&acceptor));
    let connector = Arc::new(TcpConnector::new(Some(*acceptor.end_point())).unwrap());

    let mut tasks = Vec::new();
    for seed in 0..DIALS {
        let connector = Arc::clone(&connector);
        tasks.push(tokio::spawn(async move {
            let cnx = connector.connect_default().await.unwrap();
            let data = payload(seed as u8);
            cnx.write(&data).await.unwrap();
            let mut digest = [0u8; 32];
            cnx.read_exact(&mut digest).await.unwrap();
            assert_eq!(digest, sha256(&data));
            let port = cnx.near_end().map(|ep| ep.port()).unwrap();
            cnx.close().await.unwrap();
            port
        }));
    }

    let mut ports = HashSet::new();
    for task in tasks {
        let port = timeout(GUARD, task).await.unwrap().unwrap();
        assert!(ports.insert(port), "near port {} reused", port);
    }
    assert_eq!(ports.len(), DIALS);

    acceptor.close().await.unwrap();
    assert_eq!(timeout(GUARD, server).await.unwrap().unwrap(), DIALS);
}

#[tokio::test]
async fn test_close_unblocks_pending_accept() {
    init_tracing();
    let acceptor = Arc::new(TcpAcceptor::bind("127.0.0.1:0").await.unwrap());

    let waiting = {
        let acceptor = Arc::clone(&acceptor);
        tokio::spawn(async move { acceptor.accept().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    acceptor.close().await.unwrap();
    assert!(acceptor.is_closed());

    let result = timeout(GUARD, waiting).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::ListenerClosed)));
}

#[tokio::test]
async fn test_dial_closed_port() {
    init_tracing();
    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let target = *acceptor.end_point();
    acceptor.close().await.unwrap();

    let connector = TcpConnector::new(None).unwrap();
    let result = timeout(GUARD, connector.connect(&target)).await.unwrap();
    assert!(matches!(result, Err(Error::ConnectFailed(_))));
}

#[tokio::test]
async fn test_configured_pair() {
    init_tracing();
    let config = Config::from_json(
        r#"{
            "listen": "127.0.0.1:0",
            "acceptor": { "nodelay": false },
            "connector": { "connect_timeout_ms": 2000 }
        }"#,
    )
    .unwrap();
    let acceptor = TcpAcceptor::from_config(&config).await.unwrap();

    let config = Config {
        target: Some(format!(":{}", acceptor.end_point().port())),
        ..config
    };
    let connector = TcpConnector::from_config(&config).await.unwrap();
    assert_eq!(connector.default_target(), Some(acceptor.end_point()));

    let (client, server) = tokio::join!(connector.connect_default(), acceptor.accept());
    let (client, server) = (client.unwrap(), server.unwrap());
    assert_eq!(client.far_end(), server.near_end());

    client.close().await.unwrap();
    server.close().await.unwrap();
    acceptor.close().await.unwrap();
}

#[tokio::test]
async fn test_metrics_follow_traffic() {
    init_tracing();
    metrics::init_metrics();
    let accepted = CONNECTIONS_ACCEPTED_TOTAL.get();
    let dialed = CONNECTIONS_DIALED_TOTAL.get();

    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let connector = TcpConnector::new(None).unwrap();
    let (client, server) = tokio::join!(connector.connect(acceptor.end_point()), acceptor.accept());
    let (client, server) = (client.unwrap(), server.unwrap());

    assert!(CONNECTIONS_ACCEPTED_TOTAL.get() > accepted);
    assert!(CONNECTIONS_DIALED_TOTAL.get() > dialed);
    assert!(metrics::gather_text().contains("strandline_connections_active"));

    client.close().await.unwrap();
    server.close().await.unwrap();
    acceptor.close().await.unwrap();
}
