/// Correlation store: job id -> upstream that issued the job
///
/// Entries are written when a job from the inject or develop pool is shown to
/// the miner and read back when the miner submits a result for it. A missing
/// entry means the job came from the origin pool.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// How long a forwarded job stays routable.
pub const JOB_TTL: Duration = Duration::from_secs(60);

/// Non-origin upstream that issued a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobSource {
    Inject,
    Develop,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Inject => "inject",
            JobSource::Develop => "develop",
        }
    }

    /// Unknown values read as `None`, i.e. an origin job.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "inject" => Some(JobSource::Inject),
            "develop" => Some(JobSource::Develop),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared by every session in the process; implementations must be safe for
/// concurrent use.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn set(&self, job_id: &str, source: JobSource, ttl: Duration) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<JobSource>>;

    /// Health check
    async fn ping(&self) -> Result<()>;
}
