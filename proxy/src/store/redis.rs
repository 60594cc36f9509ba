/// Redis-backed correlation store
///
/// Keys are raw job ids, values the literal source label (`inject` /
/// `develop`), each written with `SET key value EX ttl`. Uses
/// redis::aio::ConnectionManager so reconnects are transparent to sessions.

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, IntoConnectionInfo};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

use super::{CorrelationStore, JobSource};
use crate::error::Result;

pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to `host:port` and verify the connection with PING.
    pub async fn connect(address: &str, password: Option<&str>) -> Result<Self> {
        let password = password.filter(|p| !p.is_empty());

        if password.is_none() && is_exposed(address).await? {
            warn!("⚠️  redis has no password and is exposed to the public network ({})", address);
        }

        let mut info = format!("redis://{}/", address).into_connection_info()?;
        info.redis.password = password.map(str::to_string);

        let client = ::redis::Client::open(info)?;
        let manager = client.get_connection_manager().await?;

        let store = Self { manager };
        store.ping().await?;

        info!("✅ Connected to redis at {}", address);
        Ok(store)
    }
}

#[async_trait]
impl CorrelationStore for RedisStore {
    async fn set(&self, job_id: &str, source: JobSource, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        ::redis::cmd("SET")
            .arg(job_id)
            .arg(source.as_str())
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobSource>> {
        let mut conn = self.manager.clone();
        let label: Option<String> = conn.get(job_id).await?;
        Ok(label.as_deref().and_then(JobSource::from_label))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            warn!("Unexpected redis PING reply: {}", pong);
        }
        Ok(())
    }
}

/// True when `address` resolves to anything other than a loopback or
/// private-range IP.
async fn is_exposed(address: &str) -> Result<bool> {
    let mut resolved = tokio::net::lookup_host(address).await?;
    Ok(resolved.any(|addr| !is_internal(addr.ip())))
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        // fc00::/7 unique local
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_addresses() {
        assert!(is_internal("127.0.0.1".parse().unwrap()));
        assert!(is_internal("10.1.2.3".parse().unwrap()));
        assert!(is_internal("192.168.0.10".parse().unwrap()));
        assert!(is_internal("172.16.5.4".parse().unwrap()));
        assert!(is_internal("::1".parse().unwrap()));
        assert!(is_internal("fd00::1".parse().unwrap()));

        assert!(!is_internal("8.8.8.8".parse().unwrap()));
        assert!(!is_internal("2001:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_loopback_is_not_exposed() {
        assert!(!is_exposed("127.0.0.1:6379").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Nothing listens on port 1; connection manager setup must fail.
        let result = RedisStore::connect("127.0.0.1:1", Some("secret")).await;
        assert!(result.is_err());
    }
}
