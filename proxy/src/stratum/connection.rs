/// Line-framed JSON-RPC connection
///
/// Wraps any byte stream (plain TCP, TLS, or an in-memory pipe in tests)
/// into a newline-delimited message channel. The stream is split into an
/// independently owned reader and writer so that one task can block on reads
/// while other tasks write.
///
/// Reads are bounded by a one-shot deadline that callers re-arm before every
/// read; a stalled peer surfaces as `ProxyError::Timeout` instead of hanging
/// the session.

use std::sync::{Arc, OnceLock};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, BytesCodec, FramedRead, FramedWrite};
use tracing::debug;
use url::Url;

use super::protocol::Message;
use crate::error::{ProxyError, Result};

/// Read deadline used when none (or zero) is configured.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 3;

/// Longest line accepted before the read fails with `LineTooLong`.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Zero selects `DEFAULT_READ_TIMEOUT_SECS`.
pub fn effective_timeout(seconds: u64) -> u64 {
    if seconds == 0 {
        DEFAULT_READ_TIMEOUT_SECS
    } else {
        seconds
    }
}

/// Anything the proxy can frame: TCP, TLS, duplex pipes.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Transport security selected by the dial URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Plain,
    Tls,
}

/// Parsed `scheme://host:port` upstream address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    pub security: Security,
    pub host: String,
    pub port: u16,
}

impl DialTarget {
    pub fn parse(raw_url: &str) -> Result<Self> {
        let invalid = |reason: &str| ProxyError::InvalidUrl {
            url: raw_url.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw_url).map_err(|e| invalid(&e.to_string()))?;

        let security = match url.scheme() {
            "tls" | "ssl" => Security::Tls,
            "tcp" => Security::Plain,
            other => return Err(ProxyError::UnsupportedScheme(other.to_string())),
        };

        let host = match url.host() {
            Some(url::Host::Domain(domain)) => domain.to_string(),
            Some(url::Host::Ipv4(ip)) => ip.to_string(),
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(invalid("missing host")),
        };
        let port = url.port().ok_or_else(|| invalid("missing port"))?;

        Ok(Self { security, host, port })
    }
}

/// A framed connection before it is split between tasks.
pub struct Connection {
    reader: LineReader,
    writer: LineWriter,
}

impl Connection {
    /// Frame an already-established stream. `peer` only labels log lines.
    pub fn new<S>(stream: S, peer: impl Into<String>) -> Self
    where
        S: Stream + 'static,
    {
        let boxed: BoxedStream = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);
        let peer = peer.into();

        let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), MAX_LINE_LENGTH);

        Self {
            reader: LineReader {
                frames: FramedRead::new(read_half, codec),
                deadline: None,
                peer: peer.clone(),
            },
            writer: LineWriter {
                frames: FramedWrite::new(write_half, BytesCodec::new()),
                peer,
            },
        }
    }

    /// Open a connection to `tcp://host:port`, `tls://host:port` or
    /// `ssl://host:port`. TLS verifies the server against the webpki roots.
    /// The TCP connect and TLS handshake together must finish within
    /// `timeout` seconds (0 selects the default).
    pub async fn dial(raw_url: &str, timeout: u64) -> Result<Self> {
        let target = DialTarget::parse(raw_url)?;
        let seconds = effective_timeout(timeout);

        tokio::time::timeout(Duration::from_secs(seconds), Self::establish(raw_url, target))
            .await
            .map_err(|_| ProxyError::Timeout(seconds))?
    }

    async fn establish(raw_url: &str, target: DialTarget) -> Result<Self> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("set_nodelay on {} failed: {}", raw_url, e);
        }

        match target.security {
            Security::Plain => Ok(Self::new(tcp, raw_url)),
            Security::Tls => {
                let name = ServerName::try_from(target.host.clone())
                    .map_err(|e| ProxyError::Tls(format!("invalid server name {}: {}", target.host, e)))?;
                let stream = tls_connector().connect(name, tcp).await?;
                Ok(Self::new(stream, raw_url))
            }
        }
    }

    pub fn peer(&self) -> &str {
        &self.reader.peer
    }

    pub fn set_read_deadline(&mut self, seconds: u64) {
        self.reader.set_read_deadline(seconds);
    }

    pub async fn read_line(&mut self) -> Result<Bytes> {
        self.reader.read_line().await
    }

    pub async fn write(&mut self, message: &Message) -> Result<()> {
        self.writer.write(message).await
    }

    pub async fn write_line(&mut self, line: impl AsRef<[u8]>) -> Result<()> {
        self.writer.write_line(line).await
    }

    /// Hand out the two halves to separate tasks.
    pub fn split(self) -> (LineReader, LineWriter) {
        (self.reader, self.writer)
    }
}

/// Read half of a framed connection. Lines are raw bytes; nothing here
/// assumes UTF-8.
pub struct LineReader {
    frames: FramedRead<ReadHalf<BoxedStream>, AnyDelimiterCodec>,
    deadline: Option<(Instant, u64)>,
    peer: String,
}

impl LineReader {
    /// Arm the deadline for the next read. Zero selects the 3 second default.
    pub fn set_read_deadline(&mut self, seconds: u64) {
        let seconds = effective_timeout(seconds);
        self.deadline = Some((Instant::now() + Duration::from_secs(seconds), seconds));
    }

    /// Next line with its `\n` (and a preceding `\r`) stripped. The armed
    /// deadline is consumed; an unarmed read falls back to the default.
    pub async fn read_line(&mut self) -> Result<Bytes> {
        let (deadline, seconds) = self.deadline.take().unwrap_or_else(|| {
            (
                Instant::now() + Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
                DEFAULT_READ_TIMEOUT_SECS,
            )
        });

        match tokio::time::timeout_at(deadline, self.frames.next()).await {
            Err(_) => Err(ProxyError::Timeout(seconds)),
            Ok(None) => Err(ProxyError::Closed),
            Ok(Some(Ok(line))) => Ok(strip_cr(line)),
            Ok(Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))) => Err(ProxyError::LineTooLong),
            Ok(Some(Err(AnyDelimiterCodecError::Io(e)))) => Err(ProxyError::Io(e)),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

fn strip_cr(line: Bytes) -> Bytes {
    match line.last() {
        Some(b'\r') => line.slice(..line.len() - 1),
        _ => line,
    }
}

/// Write half of a framed connection.
pub struct LineWriter {
    frames: FramedWrite<WriteHalf<BoxedStream>, BytesCodec>,
    peer: String,
}

impl LineWriter {
    /// Send one line as-is; the terminator is appended here.
    pub async fn write_line(&mut self, line: impl AsRef<[u8]>) -> Result<()> {
        let line = line.as_ref();
        let mut frame = BytesMut::with_capacity(line.len() + 1);
        frame.extend_from_slice(line);
        frame.put_u8(b'\n');

        self.frames.send(frame.freeze()).await?;
        Ok(())
    }

    pub async fn write(&mut self, message: &Message) -> Result<()> {
        let line = message.to_line()?;
        self.write_line(&line).await
    }

    /// Flush and shut down the write direction.
    pub async fn close(&mut self) -> Result<()> {
        SinkExt::<Bytes>::close(&mut self.frames).await?;
        Ok(())
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

fn tls_connector() -> TlsConnector {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

    let config = CONFIG.get_or_init(|| {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    });

    TlsConnector::from(Arc::clone(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_dial_target_schemes() {
        let plain = DialTarget::parse("tcp://pool.example.com:4444").unwrap();
        assert_eq!(plain.security, Security::Plain);
        assert_eq!(plain.host, "pool.example.com");
        assert_eq!(plain.port, 4444);

        assert_eq!(DialTarget::parse("tls://eth.example.org:5555").unwrap().security, Security::Tls);
        assert_eq!(DialTarget::parse("ssl://eth.example.org:5555").unwrap().security, Security::Tls);
    }

    #[test]
    fn test_dial_target_rejects_unknown_scheme() {
        assert!(matches!(
            DialTarget::parse("stratum+tcp://pool.example.com:3333"),
            Err(ProxyError::UnsupportedScheme(s)) if s == "stratum+tcp"
        ));
        assert!(matches!(
            DialTarget::parse("udp://pool.example.com:3333"),
            Err(ProxyError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_dial_target_requires_port() {
        assert!(matches!(
            DialTarget::parse("tcp://pool.example.com"),
            Err(ProxyError::InvalidUrl { .. })
        ));
        assert!(DialTarget::parse("not a url").is_err());
    }

    #[tokio::test]
    async fn test_dial_unknown_scheme_fails_before_io() {
        let result = Connection::dial("http://127.0.0.1:1", 1).await;
        assert!(matches!(result, Err(ProxyError::UnsupportedScheme(_))));
    }

    #[tokio::test]
    async fn test_write_appends_terminator() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, "test");

        conn.write(&Message::ack(3).unwrap()).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"{\"id\":3,\"result\":true}\n");
    }

    #[tokio::test]
    async fn test_read_line_strips_terminator() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, "test");

        remote.write_all(b"{\"id\":1}\r\n{\"id\":2}\n").await.unwrap();

        conn.set_read_deadline(1);
        assert_eq!(conn.read_line().await.unwrap(), &b"{\"id\":1}"[..]);
        conn.set_read_deadline(1);
        assert_eq!(conn.read_line().await.unwrap(), &b"{\"id\":2}"[..]);
    }

    #[tokio::test]
    async fn test_read_line_eof_is_closed() {
        let (local, remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, "test");
        drop(remote);

        let err = conn.read_line().await.unwrap_err();
        assert!(matches!(err, ProxyError::Closed));
        assert!(err.is_clean_shutdown());
    }

    #[tokio::test]
    async fn test_trailing_partial_line_is_delivered_at_eof() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, "test");

        remote.write_all(b"{\"id\":9}").await.unwrap();
        drop(remote);

        assert_eq!(conn.read_line().await.unwrap(), &b"{\"id\":9}"[..]);
        assert!(matches!(conn.read_line().await, Err(ProxyError::Closed)));
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_read_raw() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, "test");

        remote.write_all(b"{\"id\":1,\"result\":\"\xff\"}\n").await.unwrap();

        conn.set_read_deadline(1);
        assert_eq!(conn.read_line().await.unwrap(), &b"{\"id\":1,\"result\":\"\xff\"}"[..]);
    }

    #[tokio::test]
    async fn test_write_line_passes_bytes_through() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, "test");

        conn.write_line(&b"\xfe\xff"[..]).await.unwrap();

        let mut buf = vec![0u8; 16];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\xfe\xff\n");
    }

    #[tokio::test]
    async fn test_dial_times_out_on_silent_tls_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold the socket without ever answering the ClientHello.
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let result = Connection::dial(&format!("tls://{}", addr), 1).await;
        assert!(matches!(result, Err(ProxyError::Timeout(1))));
        silent.abort();
    }

    #[test]
    fn test_effective_timeout() {
        assert_eq!(effective_timeout(0), DEFAULT_READ_TIMEOUT_SECS);
        assert_eq!(effective_timeout(30), 30);
    }

    #[tokio::test]
    async fn test_long_line_is_rejected() {
        let (local, mut remote) = tokio::io::duplex(MAX_LINE_LENGTH * 2 + 64);
        let mut conn = Connection::new(local, "test");

        let long = vec![b'a'; MAX_LINE_LENGTH + 10];
        remote.write_all(&long).await.unwrap();
        remote.write_all(b"\n").await.unwrap();

        conn.set_read_deadline(1);
        assert!(matches!(conn.read_line().await, Err(ProxyError::LineTooLong)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_expires() {
        let (local, _remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, "test");

        conn.set_read_deadline(5);
        let err = conn.read_line().await.unwrap_err();
        assert!(matches!(err, ProxyError::Timeout(5)));
        assert!(!err.is_clean_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_deadline_uses_default() {
        let (local, _remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, "test");

        conn.set_read_deadline(0);
        let err = conn.read_line().await.unwrap_err();
        assert!(matches!(err, ProxyError::Timeout(DEFAULT_READ_TIMEOUT_SECS)));
    }
}
