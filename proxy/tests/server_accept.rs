// Listener and session construction over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use tier2_proxy::session::{Session, SessionOptions};
use tier2_proxy::store::{CorrelationStore, MemoryStore};
use tier2_proxy::stratum::Connection;
use tier2_proxy::{Config, ProxyError, Server};

/// A loopback address nothing listens on.
async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("tcp://{}", addr)
}

fn store() -> Arc<dyn CorrelationStore> {
    Arc::new(MemoryStore::new())
}

fn miner_pipe() -> Connection {
    let (local, _remote) = tokio::io::duplex(1024);
    Connection::new(local, "miner")
}

#[tokio::test]
async fn test_connect_rejects_unsupported_coin() {
    let options = SessionOptions {
        coin: "DOGE".into(),
        ..Default::default()
    };

    let result = Session::connect(miner_pipe(), &closed_port().await, options, store()).await;
    assert!(matches!(result, Err(ProxyError::UnsupportedCoin(t)) if t == "DOGE"));
}

#[tokio::test]
async fn test_connect_rejects_bad_origin_scheme() {
    let result = Session::connect(
        miner_pipe(),
        "stratum+tcp://127.0.0.1:3333",
        SessionOptions::default(),
        store(),
    )
    .await;
    assert!(matches!(result, Err(ProxyError::UnsupportedScheme(_))));
}

#[tokio::test]
async fn test_connect_fails_when_origin_refuses() {
    let result = Session::connect(miner_pipe(), &closed_port().await, SessionOptions::default(), store()).await;
    assert!(matches!(result, Err(ProxyError::Io(_))));
}

#[tokio::test]
async fn test_server_drops_miner_when_origin_unreachable() {
    let cfg = Config::from_json(&format!(
        r#"{{"server":{{"address":"127.0.0.1:0","timeout":5}},"pool":{{"default":"{}"}}}}"#,
        closed_port().await
    ))
    .unwrap();
    cfg.validate().unwrap();

    let server = Server::bind(&cfg, store()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let accept_loop = tokio::spawn(server.serve());

    let mut miner = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), miner.read(&mut buf))
        .await
        .expect("server kept a miner it could not route")
        .unwrap_or(0);
    assert_eq!(n, 0);

    // The listener survives a failed session.
    assert!(TcpStream::connect(addr).await.is_ok());
    accept_loop.abort();
}

#[tokio::test]
async fn test_failed_develop_dial_closes_origin() {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_url = format!("tcp://{}", origin.local_addr().unwrap());

    // Origin side: accept the proxy's dial, then wait for it to hang up.
    let origin_side = tokio::spawn(async move {
        let (mut socket, _) = origin.accept().await.unwrap();
        let mut buf = [0u8; 16];
        tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf))
            .await
            .expect("origin socket left open")
            .unwrap_or(0)
    });

    let result = Session::connect_to(
        miner_pipe(),
        &origin_url,
        &closed_port().await,
        SessionOptions::default(),
        store(),
    )
    .await;
    assert!(matches!(result, Err(ProxyError::Io(_))));

    assert_eq!(origin_side.await.unwrap(), 0);
}

#[tokio::test]
async fn test_connect_to_validates_develop_url_before_dialing() {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_url = format!("tcp://{}", origin.local_addr().unwrap());

    let result = Session::connect_to(
        miner_pipe(),
        &origin_url,
        "udp://127.0.0.1:1",
        SessionOptions::default(),
        store(),
    )
    .await;
    assert!(matches!(result, Err(ProxyError::UnsupportedScheme(_))));

    // Nothing was dialed.
    let accepted = tokio::time::timeout(Duration::from_millis(200), origin.accept()).await;
    assert!(accepted.is_err());
}
