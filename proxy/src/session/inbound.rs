use std::sync::Arc;
use tracing::{debug, warn};

use super::{deliver, InjectOptions, MinerWriter, SessionStats};
use crate::coins::{CoinProfile, DEVELOP_WORKER};
use crate::error::Result;
use crate::store::{CorrelationStore, JobSource};
use crate::stratum::protocol::{wallet_of, PLACEHOLDER_PASSWORD};
use crate::stratum::{LineReader, LineWriter, Message, Method};

const LOG_ORIGIN_OUTBOUND: &str = "-> origin";
const LOG_INJECT_OUTBOUND: &str = "-> inject";
const LOG_DEVELOP_OUTBOUND: &str = "-> develop";
const LOG_MINER_ACK: &str = "<- ack";

/// Miner -> upstreams.
pub(super) struct InboundPump {
    pub reader: LineReader,
    pub miner: MinerWriter,
    pub origin: LineWriter,
    pub develop: LineWriter,
    pub inject: Option<LineWriter>,
    pub identity: Option<InjectOptions>,
    pub coin: &'static CoinProfile,
    pub store: Arc<dyn CorrelationStore>,
    pub timeout: u64,
    pub stats: Arc<SessionStats>,
}

impl InboundPump {
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.reader.set_read_deadline(self.timeout);
            let line = self.reader.read_line().await?;
            let request = Message::from_slice(&line)?;

            match request.method() {
                Method::Subscribe => self.subscribe(&line).await?,
                Method::Authorize => self.authorize(&line, &request).await?,
                Method::Submit => self.submit(&line, &request).await?,
                _ => self.to_origin(&line).await?,
            }
        }
    }

    async fn to_origin(&mut self, line: &[u8]) -> Result<()> {
        self.origin.write_line(line).await?;
        debug!("{} {}", LOG_ORIGIN_OUTBOUND, String::from_utf8_lossy(line));
        Ok(())
    }

    /// Every upstream gets the miner's subscribe verbatim.
    async fn subscribe(&mut self, line: &[u8]) -> Result<()> {
        self.to_origin(line).await?;

        if let Some(inject) = self.inject.as_mut() {
            inject.write_line(line).await?;
            debug!("{} {}", LOG_INJECT_OUTBOUND, String::from_utf8_lossy(line));
        }

        self.develop.write_line(line).await?;
        debug!("{} {}", LOG_DEVELOP_OUTBOUND, String::from_utf8_lossy(line));
        Ok(())
    }

    /// Origin sees the miner's own credentials; inject and develop see ours.
    async fn authorize(&mut self, line: &[u8], request: &Message) -> Result<()> {
        self.to_origin(line).await?;

        if let (Some(inject), Some(identity)) = (self.inject.as_mut(), self.identity.as_ref()) {
            let rebuilt = request.with_credentials(&identity.username(), PLACEHOLDER_PASSWORD)?;
            let rebuilt = rebuilt.to_line()?;
            inject.write_line(&rebuilt).await?;
            debug!("{} {}", LOG_INJECT_OUTBOUND, rebuilt);
        }

        // Only consulted for coins without a fixed donation wallet.
        let miner_username = request.authorize_username().unwrap_or_default();
        let develop_user = self.coin.develop_username(wallet_of(&miner_username));
        let rebuilt = request.with_credentials(&develop_user, PLACEHOLDER_PASSWORD)?;
        let rebuilt = rebuilt.to_line()?;
        self.develop.write_line(&rebuilt).await?;
        debug!("{} {}", LOG_DEVELOP_OUTBOUND, rebuilt);
        Ok(())
    }

    /// Route a result to whichever upstream issued its job. Results for inject
    /// and develop jobs are acknowledged to the miner right away.
    async fn submit(&mut self, line: &[u8], request: &Message) -> Result<()> {
        let job_id = request.submit_job_id()?;
        let source = self.store.get(&job_id).await?;

        let target = match source {
            Some(JobSource::Inject) => self
                .inject
                .as_mut()
                .zip(self.identity.as_ref())
                .map(|(writer, identity)| (writer, identity.rename.as_str(), LOG_INJECT_OUTBOUND)),
            Some(JobSource::Develop) => Some((&mut self.develop, DEVELOP_WORKER, LOG_DEVELOP_OUTBOUND)),
            None => None,
        };

        let Some((writer, worker, tag)) = target else {
            if source.is_some() {
                // Recorded by another session that has an inject pool.
                warn!("Job {} belongs to an inject pool this session lacks, sending to origin", job_id);
            }
            self.stats.record_submit(None);
            return self.to_origin(line).await;
        };

        let renamed = request.with_worker(worker).to_line()?;
        writer.write_line(&renamed).await?;
        debug!("{} {}", tag, renamed);

        let ack = Message::ack(request.id)?.to_line()?;
        deliver(&self.miner, &ack).await?;
        debug!("{} {}", LOG_MINER_ACK, ack);

        self.stats.record_submit(source);
        Ok(())
    }
}
