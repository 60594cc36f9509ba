/// Session engine: one miner, up to three upstream pools
///
/// A session owns the miner connection plus connections to the origin pool
/// (the pool the miner thinks it talks to), the develop pool (fixed per coin)
/// and optionally the operator's inject pool. It runs one inbound pump
/// (miner -> upstreams) and one outbound pump per upstream
/// (upstream -> miner). All writes to the miner go through a single
/// mutex-guarded writer.
///
/// The first pump to stop ends the session: the remaining pumps are aborted
/// and every connection is dropped exactly once.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::coins::{self, CoinProfile, DEVELOP_FRACTION};
use crate::error::{ProxyError, Result};
use crate::store::{CorrelationStore, JobSource};
use crate::stratum::{Connection, DialTarget, LineWriter};

mod inbound;
mod outbound;
pub mod stats;
pub mod weights;

pub use stats::{SessionStats, StatsSnapshot};
pub use weights::{JobFilter, Weights, WEIGHT_UNIT};

use inbound::InboundPump;
use outbound::{OriginRelay, WeightedRelay};

/// Miner writer shared by every pump.
pub(crate) type MinerWriter = Arc<Mutex<LineWriter>>;

/// Write one line to the miner. The lock is held for this write only and is
/// released when the guard leaves scope, whether the write failed or not.
pub(crate) async fn deliver(miner: &MinerWriter, line: impl AsRef<[u8]>) -> Result<()> {
    let mut writer = miner.lock().await;
    writer.write_line(line).await
}

/// Operator fee pool settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectOptions {
    pub pool: String,
    pub wallet: String,
    /// Fraction of inject jobs shown to the miner, `0.0..=1.0`.
    pub weight: f64,
    pub rename: String,
}

impl InjectOptions {
    /// Username presented to the inject pool.
    pub fn username(&self) -> String {
        format!("{}.{}", self.wallet, self.rename)
    }
}

/// Routing configuration for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    /// Coin token (ETH, ETC, XMR); empty selects ETH.
    pub coin: String,
    /// Read deadline in seconds, re-armed before every read. Zero selects the
    /// connection default.
    pub timeout: u64,
    pub inject: Option<InjectOptions>,
}

/// Upstream connections, already established.
pub struct Upstreams {
    pub origin: Connection,
    pub develop: Connection,
    pub inject: Option<Connection>,
}

pub struct Session {
    peer: String,
    miner: Connection,
    upstreams: Upstreams,
    coin: &'static CoinProfile,
    options: SessionOptions,
    weights: Weights,
    store: Arc<dyn CorrelationStore>,
    seed: Option<u64>,
    stats: Arc<SessionStats>,
}

impl Session {
    /// Resolve the coin, dial origin, the coin's develop pool and (if
    /// configured) inject.
    pub async fn connect(
        miner: Connection,
        origin_url: &str,
        options: SessionOptions,
        store: Arc<dyn CorrelationStore>,
    ) -> Result<Self> {
        let coin = coins::lookup(&options.coin)?;
        Self::connect_to(miner, origin_url, coin.develop_pool, options, store).await
    }

    /// Like `connect`, with the develop pool address given explicitly.
    ///
    /// Every URL is validated before any socket is opened. Each dial is bounded
    /// by the session timeout. A dial failure drops the connections opened so
    /// far and aborts construction.
    pub async fn connect_to(
        miner: Connection,
        origin_url: &str,
        develop_url: &str,
        options: SessionOptions,
        store: Arc<dyn CorrelationStore>,
    ) -> Result<Self> {
        let coin = coins::lookup(&options.coin)?;

        DialTarget::parse(origin_url)?;
        DialTarget::parse(develop_url)?;
        if let Some(inject) = &options.inject {
            DialTarget::parse(&inject.pool)?;
        }

        let origin = Connection::dial(origin_url, options.timeout).await?;
        debug!("🔗 Dialed origin pool {}", origin_url);

        let develop = Connection::dial(develop_url, options.timeout).await?;
        debug!("🔗 Dialed develop pool {}", develop_url);

        let inject = match &options.inject {
            Some(inject) => {
                let conn = Connection::dial(&inject.pool, options.timeout).await?;
                debug!("🔗 Dialed inject pool {}", inject.pool);
                Some(conn)
            }
            None => None,
        };

        Ok(Self::new(miner, Upstreams { origin, develop, inject }, coin, options, store))
    }

    /// Assemble a session from connections that are already open.
    pub fn new(
        miner: Connection,
        upstreams: Upstreams,
        coin: &'static CoinProfile,
        options: SessionOptions,
        store: Arc<dyn CorrelationStore>,
    ) -> Self {
        let inject_fraction = match (&options.inject, &upstreams.inject) {
            (Some(inject), Some(_)) => inject.weight,
            _ => 0.0,
        };

        Self {
            peer: miner.peer().to_string(),
            miner,
            upstreams,
            coin,
            weights: Weights::new(inject_fraction, DEVELOP_FRACTION),
            options,
            store,
            seed: None,
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Seed the weighted draws (tests).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    fn filter(&self, weight: u32, offset: u64) -> JobFilter {
        match self.seed {
            Some(seed) => JobFilter::seeded(weight, seed.wrapping_add(offset)),
            None => JobFilter::new(weight),
        }
    }

    /// Run all pumps until the first one stops, then tear everything down.
    ///
    /// End-of-stream and closed-socket conditions are a normal disconnect and
    /// return `Ok`.
    pub async fn run(self) -> Result<()> {
        let develop_filter = self.filter(self.weights.develop, 0);
        let inject_filter = self.filter(self.weights.inject, 1);

        let Session {
            peer,
            miner,
            upstreams,
            coin,
            options,
            store,
            stats,
            ..
        } = self;

        let (miner_reader, miner_writer) = miner.split();
        let miner_writer: MinerWriter = Arc::new(Mutex::new(miner_writer));

        let (origin_reader, origin_writer) = upstreams.origin.split();
        let (develop_reader, develop_writer) = upstreams.develop.split();
        let (inject_reader, inject_writer) = match upstreams.inject {
            Some(conn) => {
                let (reader, writer) = conn.split();
                (Some(reader), Some(writer))
            }
            None => (None, None),
        };

        let mut pumps: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

        let inbound = InboundPump {
            reader: miner_reader,
            miner: Arc::clone(&miner_writer),
            origin: origin_writer,
            develop: develop_writer,
            inject: inject_writer,
            identity: options.inject.clone(),
            coin,
            store: Arc::clone(&store),
            timeout: options.timeout,
            stats: Arc::clone(&stats),
        };
        pumps.spawn(async move { ("inbound", inbound.run().await) });

        let origin = OriginRelay {
            reader: origin_reader,
            miner: Arc::clone(&miner_writer),
            timeout: options.timeout,
            stats: Arc::clone(&stats),
        };
        pumps.spawn(async move { ("origin", origin.run().await) });

        let develop = WeightedRelay {
            source: JobSource::Develop,
            reader: develop_reader,
            miner: Arc::clone(&miner_writer),
            filter: develop_filter,
            store: Arc::clone(&store),
            timeout: options.timeout,
            stats: Arc::clone(&stats),
        };
        pumps.spawn(async move { ("develop", develop.run().await) });

        if let Some(reader) = inject_reader {
            let inject = WeightedRelay {
                source: JobSource::Inject,
                reader,
                miner: Arc::clone(&miner_writer),
                filter: inject_filter,
                store: Arc::clone(&store),
                timeout: options.timeout,
                stats: Arc::clone(&stats),
            };
            pumps.spawn(async move { ("inject", inject.run().await) });
        }

        // First pump to finish decides the outcome.
        let outcome = match pumps.join_next().await {
            Some(Ok((pump, result))) => result.map_err(|e| (pump, e)),
            Some(Err(join_err)) => Err(("task", ProxyError::Io(std::io::Error::other(join_err.to_string())))),
            None => Ok(()),
        };

        pumps.shutdown().await;
        let _ = miner_writer.lock().await.close().await;

        info!("📊 Session {} finished: {}", peer, stats.snapshot());

        match outcome {
            Ok(()) => Ok(()),
            Err((pump, e)) if e.is_clean_shutdown() => {
                debug!("{} pump of {} closed: {}", pump, peer, e);
                Ok(())
            }
            Err((pump, e)) => {
                error!("❌ {} pump of {} failed: {}", pump, peer, e);
                Err(e)
            }
        }
    }
}
