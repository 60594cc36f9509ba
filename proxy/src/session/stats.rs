/// Per-session counters, logged once when the session ends.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::JobSource;

#[derive(Debug, Default)]
pub struct SessionStats {
    pub origin_relayed: AtomicU64,
    pub inject_forwarded: AtomicU64,
    pub inject_dropped: AtomicU64,
    pub develop_forwarded: AtomicU64,
    pub develop_dropped: AtomicU64,
    pub submits_origin: AtomicU64,
    pub submits_inject: AtomicU64,
    pub submits_develop: AtomicU64,
}

/// Plain copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub origin_relayed: u64,
    pub inject_forwarded: u64,
    pub inject_dropped: u64,
    pub develop_forwarded: u64,
    pub develop_dropped: u64,
    pub submits_origin: u64,
    pub submits_inject: u64,
    pub submits_develop: u64,
}

impl SessionStats {
    pub fn record_job(&self, source: JobSource, forwarded: bool) {
        let counter = match (source, forwarded) {
            (JobSource::Inject, true) => &self.inject_forwarded,
            (JobSource::Inject, false) => &self.inject_dropped,
            (JobSource::Develop, true) => &self.develop_forwarded,
            (JobSource::Develop, false) => &self.develop_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// `None` is an origin submit.
    pub fn record_submit(&self, source: Option<JobSource>) {
        let counter = match source {
            None => &self.submits_origin,
            Some(JobSource::Inject) => &self.submits_inject,
            Some(JobSource::Develop) => &self.submits_develop,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            origin_relayed: self.origin_relayed.load(Ordering::Relaxed),
            inject_forwarded: self.inject_forwarded.load(Ordering::Relaxed),
            inject_dropped: self.inject_dropped.load(Ordering::Relaxed),
            develop_forwarded: self.develop_forwarded.load(Ordering::Relaxed),
            develop_dropped: self.develop_dropped.load(Ordering::Relaxed),
            submits_origin: self.submits_origin.load(Ordering::Relaxed),
            submits_inject: self.submits_inject.load(Ordering::Relaxed),
            submits_develop: self.submits_develop.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "origin={} inject={}/{} develop={}/{} submits origin={} inject={} develop={}",
            self.origin_relayed,
            self.inject_forwarded,
            self.inject_forwarded + self.inject_dropped,
            self.develop_forwarded,
            self.develop_forwarded + self.develop_dropped,
            self.submits_origin,
            self.submits_inject,
            self.submits_develop,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = SessionStats::default();
        stats.record_job(JobSource::Inject, true);
        stats.record_job(JobSource::Inject, false);
        stats.record_job(JobSource::Develop, false);
        stats.record_submit(None);
        stats.record_submit(Some(JobSource::Develop));

        let snap = stats.snapshot();
        assert_eq!(snap.inject_forwarded, 1);
        assert_eq!(snap.inject_dropped, 1);
        assert_eq!(snap.develop_dropped, 1);
        assert_eq!(snap.submits_origin, 1);
        assert_eq!(snap.submits_develop, 1);
        assert_eq!(
            snap.to_string(),
            "origin=0 inject=1/2 develop=0/1 submits origin=1 inject=0 develop=1"
        );
    }
}
