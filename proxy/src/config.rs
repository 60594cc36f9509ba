use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::coins;
use crate::session::{InjectOptions, SessionOptions};
use crate::stratum::DialTarget;

pub const DEFAULT_CONFIG_PATH: &str = "config/server.json";

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub pool: PoolConfig,
    /// Without a redis section job correlation stays in-process.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    /// Per-read and dial deadline in seconds; absent or 0 selects the 3 second
    /// connection default.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout: 0,
            tls: None,
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:3333".to_string()
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct TlsConfig {
    pub certificate: String,
    #[serde(alias = "private_key")]
    pub privatekey: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct PoolConfig {
    /// Coin token: ETH (default), ETC, XMR
    #[serde(default)]
    pub token: String,
    /// Origin pool URL, e.g. tls://eth.example.org:5555
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub inject: Option<InjectConfig>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct InjectConfig {
    pub pool: String,
    pub wallet: String,
    /// Fraction of the inject pool's jobs shown to miners, 0.0 - 1.0
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub rename: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct RedisConfig {
    pub address: String,
    #[serde(default)]
    pub password: String,
}

impl Config {
    /// Read the JSON file, apply `TIER2_*` environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut cfg = Self::from_json(&txt)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;

        Ok(cfg)
    }

    pub fn from_json(txt: &str) -> Result<Self> {
        Ok(serde_json::from_str(txt)?)
    }

    /// Overrides:
    /// - TIER2_SERVER_ADDRESS
    /// - TIER2_SERVER_TIMEOUT
    /// - TIER2_POOL_TOKEN
    /// - TIER2_POOL_DEFAULT
    /// - TIER2_REDIS_ADDRESS
    /// - TIER2_REDIS_PASSWORD
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(a) = lookup("TIER2_SERVER_ADDRESS") { self.server.address = a; }
        if let Some(t) = lookup("TIER2_SERVER_TIMEOUT") {
            if let Ok(t) = t.parse() {
                self.server.timeout = t;
            }
        }
        if let Some(t) = lookup("TIER2_POOL_TOKEN") { self.pool.token = t; }
        if let Some(d) = lookup("TIER2_POOL_DEFAULT") { self.pool.default = d; }
        if let Some(a) = lookup("TIER2_REDIS_ADDRESS") {
            let password = self.redis.as_ref().map(|r| r.password.clone()).unwrap_or_default();
            self.redis = Some(RedisConfig { address: a, password });
        }
        if let Some(p) = lookup("TIER2_REDIS_PASSWORD") {
            if let Some(redis) = self.redis.as_mut() {
                redis.password = p;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.default.is_empty() {
            bail!("pool.default must name the origin pool");
        }
        DialTarget::parse(&self.pool.default).map_err(|e| anyhow!("pool.default: {}", e))?;
        coins::lookup(&self.pool.token).map_err(|e| anyhow!("pool.token: {}", e))?;

        if let Some(inject) = &self.pool.inject {
            DialTarget::parse(&inject.pool).map_err(|e| anyhow!("pool.inject.pool: {}", e))?;
            if inject.wallet.is_empty() {
                bail!("pool.inject.wallet is required when an inject pool is set");
            }
            if !(0.0..=1.0).contains(&inject.weight) {
                bail!("pool.inject.weight must be within 0.0 - 1.0, got {}", inject.weight);
            }
        }

        if let Some(redis) = &self.redis {
            if redis.address.is_empty() {
                bail!("redis.address must not be empty");
            }
        }

        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            coin: self.pool.token.clone(),
            timeout: self.server.timeout,
            inject: self.pool.inject.as_ref().map(|inject| InjectOptions {
                pool: inject.pool.clone(),
                wallet: inject.wallet.clone(),
                weight: inject.weight,
                rename: inject.rename.clone(),
            }),
        }
    }
}
