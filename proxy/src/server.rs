/// Miner-facing listener
///
/// Accepts miner connections (plain TCP or TLS), and hands each one to its own
/// task running a `Session` against the configured upstream pools. Accept
/// errors are logged and the loop keeps going; a failing session never takes
/// the listener down.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TlsConfig};
use crate::error::{ProxyError, Result};
use crate::session::{Session, SessionOptions};
use crate::store::{CorrelationStore, MemoryStore, RedisStore};
use crate::stratum::connection::effective_timeout;
use crate::stratum::Connection;

/// Redis when configured, otherwise the in-process map.
pub async fn build_store(config: &Config) -> Result<Arc<dyn CorrelationStore>> {
    match &config.redis {
        Some(redis) => {
            let store = RedisStore::connect(&redis.address, Some(redis.password.as_str())).await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("🗂️  No redis configured, keeping job routes in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Load a PEM certificate chain and private key into a TLS acceptor.
pub fn load_tls(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = CertificateDer::pem_file_iter(Path::new(&tls.certificate))
        .map_err(|e| ProxyError::Tls(format!("{}: {}", tls.certificate, e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Tls(format!("{}: {}", tls.certificate, e)))?;
    if certs.is_empty() {
        return Err(ProxyError::Tls(format!("{}: no certificates found", tls.certificate)));
    }

    let key = PrivateKeyDer::from_pem_file(Path::new(&tls.privatekey))
        .map_err(|e| ProxyError::Tls(format!("{}: {}", tls.privatekey, e)))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

pub struct Server {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    origin: Arc<str>,
    options: SessionOptions,
    store: Arc<dyn CorrelationStore>,
}

impl Server {
    /// Bind the listen address and prepare TLS if configured.
    pub async fn bind(config: &Config, store: Arc<dyn CorrelationStore>) -> Result<Self> {
        let tls = config.server.tls.as_ref().map(load_tls).transpose()?;
        let listener = TcpListener::bind(&config.server.address).await?;

        info!(
            "✅ Listening on {} ({}) -> origin {}",
            listener.local_addr()?,
            if tls.is_some() { "tls" } else { "tcp" },
            config.pool.default
        );

        Ok(Self {
            listener,
            tls,
            origin: Arc::from(config.pool.default.as_str()),
            options: config.session_options(),
            store,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Only returns if the process is shutting down.
    pub async fn serve(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => {
                    info!("🔌 New connection from {}", peer_addr);

                    let tls = self.tls.clone();
                    let origin = Arc::clone(&self.origin);
                    let options = self.options.clone();
                    let store = Arc::clone(&self.store);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, peer_addr, tls, &origin, options, store).await {
                            error!("Connection error from {}: {}", peer_addr, e);
                        }
                        info!("🔌 Connection closed: {}", peer_addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    origin: &str,
    options: SessionOptions,
    store: Arc<dyn CorrelationStore>,
) -> Result<()> {
    if let Err(e) = socket.set_nodelay(true) {
        debug!("set_nodelay for {} failed: {}", peer_addr, e);
    }

    let miner = match tls {
        Some(acceptor) => {
            let seconds = effective_timeout(options.timeout);
            match tokio::time::timeout(Duration::from_secs(seconds), acceptor.accept(socket)).await {
                Ok(Ok(stream)) => Connection::new(stream, peer_addr.to_string()),
                Ok(Err(e)) => {
                    warn!("🔒 TLS handshake with {} failed: {}", peer_addr, e);
                    return Ok(());
                }
                Err(_) => {
                    warn!("🔒 TLS handshake with {} timed out after {}s", peer_addr, seconds);
                    return Ok(());
                }
            }
        }
        None => Connection::new(socket, peer_addr.to_string()),
    };

    let session = Session::connect(miner, origin, options, store).await?;
    debug!("Session {} ready, weights {:?}", peer_addr, session.weights());

    session.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_tls_missing_files() {
        let tls = TlsConfig {
            certificate: "/nonexistent/cert.pem".into(),
            privatekey: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(load_tls(&tls), Err(ProxyError::Tls(_))));
    }

    #[test]
    fn test_load_tls_rejects_empty_chain() {
        let cert = tempfile::NamedTempFile::new().unwrap();
        let tls = TlsConfig {
            certificate: cert.path().display().to_string(),
            privatekey: cert.path().display().to_string(),
        };
        assert!(matches!(load_tls(&tls), Err(ProxyError::Tls(_))));
    }

    #[tokio::test]
    async fn test_build_store_defaults_to_memory() {
        let cfg = Config::from_json(r#"{"pool":{"default":"tcp://127.0.0.1:4444"}}"#).unwrap();
        let store = build_store(&cfg).await.unwrap();
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let cfg = Config::from_json(
            r#"{"server":{"address":"127.0.0.1:0"},"pool":{"default":"tcp://127.0.0.1:4444"}}"#,
        )
        .unwrap();
        let server = Server::bind(&cfg, Arc::new(MemoryStore::new())).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
