use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

use super::{deliver, JobFilter, MinerWriter, SessionStats};
use crate::error::Result;
use crate::store::{CorrelationStore, JobSource, JOB_TTL};
use crate::stratum::{LineReader, Message, Method};

const LOG_ORIGIN_INBOUND: &str = "<- origin";

/// Origin -> miner, verbatim and unconditional. Lines are never decoded.
pub(super) struct OriginRelay {
    pub reader: LineReader,
    pub miner: MinerWriter,
    pub timeout: u64,
    pub stats: Arc<SessionStats>,
}

impl OriginRelay {
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.reader.set_read_deadline(self.timeout);
            let line = self.reader.read_line().await?;

            deliver(&self.miner, &line).await?;
            self.stats.origin_relayed.fetch_add(1, Ordering::Relaxed);
            debug!("{} {}", LOG_ORIGIN_INBOUND, String::from_utf8_lossy(&line));
        }
    }
}

/// Inject/develop -> miner. Only `mining.notify` is ever forwarded, and only
/// when the upstream's weighted draw admits it; the job id is recorded first
/// so a later submit can find its way back.
pub(super) struct WeightedRelay {
    pub source: JobSource,
    pub reader: LineReader,
    pub miner: MinerWriter,
    pub filter: JobFilter,
    pub store: Arc<dyn CorrelationStore>,
    pub timeout: u64,
    pub stats: Arc<SessionStats>,
}

impl WeightedRelay {
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.reader.set_read_deadline(self.timeout);
            let line = self.reader.read_line().await?;
            let message = Message::from_slice(&line)?;

            if message.method() != Method::Notify {
                debug!("<- {} {}", self.source, String::from_utf8_lossy(&line));
                continue;
            }

            if !self.filter.admit() {
                self.stats.record_job(self.source, false);
                continue;
            }

            let job_id = message.notify_job_id()?;
            self.store.set(&job_id, self.source, JOB_TTL).await?;
            deliver(&self.miner, &line).await?;

            self.stats.record_job(self.source, true);
            debug!("<- {} {}", self.source, String::from_utf8_lossy(&line));
        }
    }
}
