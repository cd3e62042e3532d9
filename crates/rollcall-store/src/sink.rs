//! Asynchronous, best-effort delivery of persistence records.
//!
//! The capture loop submits records through a [`SinkHandle`] and moves on.
//! A dedicated worker thread applies them to the gateway in order, retrying
//! failed writes with exponential backoff. A record that still fails is
//! logged and dropped: the in-memory ledger remains authoritative and is never
//! asked to record the student again.

use crate::gateway::{PersistenceGateway, StoreError};
use rollcall_core::{AttendanceSink, PersistRecord};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub written: usize,
    pub retries: usize,
    pub failed: usize,
}

enum SinkRequest {
    Write(PersistRecord),
    Shutdown,
}

/// Clone-safe, non-blocking submitter for the persistence worker.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkRequest>,
}

impl AttendanceSink for SinkHandle {
    fn submit(&self, record: PersistRecord) {
        let kind = record.kind();
        if self.tx.send(SinkRequest::Write(record)).is_err() {
            tracing::error!(kind, "persistence worker has stopped; record dropped");
        }
    }
}

/// Owner of the persistence worker thread.
pub struct PersistenceSink<G> {
    tx: mpsc::UnboundedSender<SinkRequest>,
    worker: JoinHandle<(G, SinkStats)>,
}

impl<G> PersistenceSink<G>
where
    G: PersistenceGateway + Send + 'static,
{
    /// Spawn the worker thread that owns `gateway`.
    pub fn spawn(gateway: G, policy: RetryPolicy) -> Result<Self, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel::<SinkRequest>();

        let worker = std::thread::Builder::new()
            .name("rollcall-persist".into())
            .spawn(move || run_worker(gateway, rx, policy))
            .map_err(StoreError::Spawn)?;

        Ok(Self { tx, worker })
    }

    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting records, drain what is queued, and hand the gateway back.
    pub fn close(self) -> Result<(G, SinkStats), StoreError> {
        // The worker may already be gone if every handle was dropped.
        let _ = self.tx.send(SinkRequest::Shutdown);
        self.worker.join().map_err(|_| StoreError::WorkerPanicked)
    }
}

fn run_worker<G: PersistenceGateway>(
    mut gateway: G,
    mut rx: mpsc::UnboundedReceiver<SinkRequest>,
    policy: RetryPolicy,
) -> (G, SinkStats) {
    tracing::debug!("persistence worker started");
    let mut stats = SinkStats::default();

    while let Some(req) = rx.blocking_recv() {
        match req {
            SinkRequest::Write(record) => deliver(&mut gateway, &record, &policy, &mut stats),
            SinkRequest::Shutdown => {
                // Refuse new records; already-queued ones are still received below.
                rx.close();
            }
        }
    }

    tracing::debug!(
        written = stats.written,
        retries = stats.retries,
        failed = stats.failed,
        "persistence worker exiting"
    );
    (gateway, stats)
}

fn deliver<G: PersistenceGateway>(
    gateway: &mut G,
    record: &PersistRecord,
    policy: &RetryPolicy,
    stats: &mut SinkStats,
) {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match gateway.apply(record) {
            Ok(()) => {
                stats.written += 1;
                return;
            }
            Err(e) if attempt < attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    kind = record.kind(),
                    attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "persistence write failed; retrying"
                );
                stats.retries += 1;
                std::thread::sleep(delay);
            }
            Err(e) => {
                tracing::error!(
                    kind = record.kind(),
                    attempts,
                    error = %e,
                    "persistence write failed; giving up on record"
                );
                stats.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use chrono::NaiveDate;
    use rollcall_core::{AttendanceEvent, SessionSummary};

    /// Fails the first `failures` writes, then delegates.
    struct FlakyGateway {
        inner: MemoryGateway,
        failures: u32,
    }

    impl PersistenceGateway for FlakyGateway {
        fn write_roster(&mut self, class_id: &str, ids: &[String]) -> Result<(), StoreError> {
            self.trip()?;
            self.inner.write_roster(class_id, ids)
        }

        fn write_event(
            &mut self,
            class_id: &str,
            date: NaiveDate,
            event: &AttendanceEvent,
        ) -> Result<(), StoreError> {
            self.trip()?;
            self.inner.write_event(class_id, date, event)
        }

        fn write_summary(
            &mut self,
            class_id: &str,
            date: NaiveDate,
            summary: &SessionSummary,
        ) -> Result<(), StoreError> {
            self.trip()?;
            self.inner.write_summary(class_id, date, summary)
        }

        fn load_roster(&self, class_id: &str) -> Result<Vec<String>, StoreError> {
            self.inner.load_roster(class_id)
        }

        fn load_events(&self, class_id: &str, date: NaiveDate) -> Result<Vec<AttendanceEvent>, StoreError> {
            self.inner.load_events(class_id, date)
        }

        fn load_summary(&self, class_id: &str, date: NaiveDate) -> Result<Option<SessionSummary>, StoreError> {
            self.inner.load_summary(class_id, date)
        }
    }

    impl FlakyGateway {
        fn trip(&mut self) -> Result<(), StoreError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(StoreError::Unavailable("simulated outage".into()));
            }
            Ok(())
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn event(id: &str) -> PersistRecord {
        PersistRecord::Event {
            class_id: "class A".into(),
            date: date(),
            event: AttendanceEvent::present(id, date().and_hms_opt(9, 5, 0).unwrap()),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn test_close_drains_queued_records() {
        let sink = PersistenceSink::spawn(MemoryGateway::new(), fast_policy(3)).unwrap();
        let handle = sink.handle();
        handle.submit(event("alice"));
        handle.submit(event("bob"));

        let (gateway, stats) = sink.close().unwrap();
        assert_eq!(stats, SinkStats { written: 2, retries: 0, failed: 0 });
        let ids: Vec<_> = gateway
            .load_events("class A", date())
            .unwrap()
            .into_iter()
            .map(|e| e.student_id)
            .collect();
        assert_eq!(ids, vec!["alice", "bob"]);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let gateway = FlakyGateway { inner: MemoryGateway::new(), failures: 2 };
        let sink = PersistenceSink::spawn(gateway, fast_policy(3)).unwrap();
        sink.handle().submit(event("alice"));

        let (gateway, stats) = sink.close().unwrap();
        assert_eq!(stats, SinkStats { written: 1, retries: 2, failed: 0 });
        assert_eq!(gateway.load_events("class A", date()).unwrap().len(), 1);
    }

    #[test]
    fn test_exhausted_record_is_dropped_and_next_proceeds() {
        let gateway = FlakyGateway { inner: MemoryGateway::new(), failures: 2 };
        let sink = PersistenceSink::spawn(gateway, fast_policy(2)).unwrap();
        let handle = sink.handle();
        handle.submit(event("alice"));
        handle.submit(event("bob"));

        let (gateway, stats) = sink.close().unwrap();
        assert_eq!(stats, SinkStats { written: 1, retries: 1, failed: 1 });
        let events = gateway.load_events("class A", date()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].student_id, "bob");
    }

    #[test]
    fn test_submit_after_close_does_not_panic() {
        let sink = PersistenceSink::spawn(MemoryGateway::new(), fast_policy(1)).unwrap();
        let handle = sink.handle();
        sink.close().unwrap();
        handle.submit(event("alice"));
    }
}
