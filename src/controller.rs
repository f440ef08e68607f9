//! Retry/requeue controller.
//!
//! Sequences records through the pipeline: FIFO queue seeded from input,
//! requeue-to-back on retryable failures, a hard per-record attempt budget,
//! and wholesale session recreation on fatal errors. Every record ends in
//! exactly one terminal state, and the loop is bounded by
//! `records × max_row_retries` dequeues.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::browser::SessionManager;
use crate::config::RunConfig;
use crate::error::PortalError;
use crate::ledger::{LedgerStatus, ResultLedger};
use crate::pacing::Pacing;
use crate::portal::PortalDriver;
use crate::record::Record;

/// Lifecycle of one record through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InFlight,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

/// Mutable retry bookkeeping attached to a record while it is in flight.
#[derive(Debug, Clone, Default)]
pub struct Attempt {
    pub count: u32,
    pub last_error: Option<String>,
}

struct QueueItem {
    record: Record,
    attempt: Attempt,
    state: JobState,
}

impl QueueItem {
    /// Every state change goes through here, so the transition history of a
    /// record is reconstructible from the log.
    fn transition(&mut self, key: &str, next: JobState) {
        debug!("Record {} state: {:?} -> {:?}", key, self.state, next);
        self.state = next;
    }
}

/// Outcome of a drained queue.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed_terminal: usize,
    /// Artifact paths in the order records completed.
    pub artifacts: Vec<PathBuf>,
    /// Records that ended `FailedTerminal`.
    pub failed_records: Vec<Record>,
}

/// Drives the record queue against one portal.
pub struct Controller<'a, M, D>
where
    M: SessionManager,
    D: PortalDriver<M::Session>,
{
    sessions: &'a mut M,
    driver: &'a D,
    ledger: &'a mut ResultLedger,
    store: &'a ArtifactStore,
    pacing: Pacing,
    max_row_retries: u32,
}

impl<'a, M, D> Controller<'a, M, D>
where
    M: SessionManager,
    D: PortalDriver<M::Session>,
{
    pub fn new(
        sessions: &'a mut M,
        driver: &'a D,
        ledger: &'a mut ResultLedger,
        store: &'a ArtifactStore,
        config: &RunConfig,
    ) -> Self {
        Self {
            sessions,
            driver,
            ledger,
            store,
            pacing: config.pacing(),
            max_row_retries: config.max_row_retries.max(1),
        }
    }

    /// Process every record to a terminal state.
    ///
    /// Errors returned from here are startup-class (cannot launch a
    /// session, cannot authenticate, cannot write the ledger) and abort the
    /// run; per-record errors never escape this loop.
    pub async fn run(&mut self, records: Vec<Record>) -> Result<RunSummary, PortalError> {
        let mut queue: VecDeque<QueueItem> = records
            .into_iter()
            .map(|record| QueueItem {
                record,
                attempt: Attempt::default(),
                state: JobState::Pending,
            })
            .collect();

        let mut summary = RunSummary {
            total: queue.len(),
            ..Default::default()
        };

        info!("Starting queue of {} records", summary.total);

        let mut session = self.sessions.acquire().await?;
        self.driver.login(&session).await?;

        while let Some(mut item) = queue.pop_front() {
            let key = self.driver.record_key(&item.record);

            // Invalid records are terminal immediately, with zero attempts
            // consumed against the retry budget.
            if let Err(e) = self.driver.validate(&item.record) {
                warn!("Record {} rejected: {}", key, e);
                item.transition(&key, JobState::FailedTerminal);
                self.finish_failed(&mut summary, item.record, &key, &e.to_string())?;
                continue;
            }

            item.transition(&key, JobState::InFlight);
            item.attempt.count += 1;
            info!(
                "Processing {} (attempt {}/{})",
                key, item.attempt.count, self.max_row_retries
            );

            let outcome = match self.process(&session, &item.record).await {
                Ok(bytes) => self
                    .store
                    .store(summary.artifacts.len() + 1, &key, &bytes)
                    .map_err(|e| PortalError::Io(std::io::Error::other(e.to_string()))),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(path) => {
                    item.transition(&key, JobState::Succeeded);
                    summary.succeeded += 1;
                    summary.artifacts.push(path);
                    self.ledger
                        .append(&key, LedgerStatus::Succeeded, "Document captured")?;

                    self.reset_entry(&session).await;
                    self.pacing.pause().await;
                }
                Err(err) => {
                    warn!(
                        "Record {} attempt {} failed: {}",
                        key, item.attempt.count, err
                    );
                    item.attempt.last_error = Some(err.to_string());

                    if err.is_terminal() {
                        item.transition(&key, JobState::FailedTerminal);
                        self.finish_failed(&mut summary, item.record, &key, &err.to_string())?;
                        continue;
                    }

                    item.transition(&key, JobState::FailedRetryable);

                    if err.is_session_fatal() {
                        // The browser state is poisoned; replace it before
                        // touching the queue again. A recreation failure is
                        // startup-class and aborts the run.
                        session = self.sessions.recreate().await?;
                        if let Err(login_err) = self.driver.login(&session).await {
                            warn!(
                                "Re-login after session recreation failed: {}",
                                login_err
                            );
                            item.attempt.last_error = Some(login_err.to_string());
                        }
                    } else {
                        self.reset_entry(&session).await;
                    }

                    if item.attempt.count >= self.max_row_retries {
                        let message = item
                            .attempt
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "retries exhausted".into());
                        item.transition(&key, JobState::FailedTerminal);
                        self.finish_failed(&mut summary, item.record, &key, &message)?;
                    } else {
                        info!(
                            "Requeueing {} ({}/{} attempts used)",
                            key, item.attempt.count, self.max_row_retries
                        );
                        item.transition(&key, JobState::Pending);
                        queue.push_back(item);
                    }
                }
            }
        }

        self.sessions.release().await?;

        info!(
            "Queue drained: {} succeeded, {} failed of {}",
            summary.succeeded, summary.failed_terminal, summary.total
        );
        debug_assert_eq!(
            summary.succeeded + summary.failed_terminal,
            summary.total,
            "every record must reach exactly one terminal state"
        );

        Ok(summary)
    }

    /// One full interaction for one record.
    async fn process(
        &self,
        session: &Arc<M::Session>,
        record: &Record,
    ) -> Result<Vec<u8>, PortalError> {
        self.driver.navigate(session).await?;
        self.driver.fill(session, record).await?;
        self.driver.submit(session).await?;
        self.driver.await_completion(session).await?;
        self.driver.extract_artifact(session).await
    }

    /// Best-effort reset to the entry point; a degraded session gets a
    /// forced entry navigation instead.
    async fn reset_entry(&self, session: &Arc<M::Session>) {
        if let Err(e) = self.driver.return_to_entry(session).await {
            warn!("Return to entry failed ({}), forcing entry navigation", e);
            if let Err(e) = self.driver.navigate(session).await {
                warn!("Entry navigation failed as well: {}", e);
            }
        }
    }

    fn finish_failed(
        &mut self,
        summary: &mut RunSummary,
        record: Record,
        key: &str,
        message: &str,
    ) -> Result<(), PortalError> {
        summary.failed_terminal += 1;
        self.ledger.append(key, LedgerStatus::Failed, message)?;
        summary.failed_records.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted per-attempt outcomes for one record.
    #[derive(Debug, Clone, Copy)]
    enum Planned {
        Succeed,
        FailRetryable,
        FailFatal,
    }

    struct FakeSession;

    struct FakeManager {
        launches: AtomicU32,
        recreations: AtomicU32,
    }

    impl FakeManager {
        fn new() -> Self {
            Self {
                launches: AtomicU32::new(0),
                recreations: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionManager for FakeManager {
        type Session = FakeSession;

        async fn acquire(&mut self) -> Result<Arc<FakeSession>, PortalError> {
            self.launches.fetch_add(1, Ordering::Relaxed);
            Ok(Arc::new(FakeSession))
        }

        async fn release(&mut self) -> Result<(), PortalError> {
            Ok(())
        }

        async fn recreate(&mut self) -> Result<Arc<FakeSession>, PortalError> {
            self.recreations.fetch_add(1, Ordering::Relaxed);
            self.acquire().await
        }
    }

    /// Portal double whose submit outcome per record is scripted up front.
    /// Attempts beyond the scripted list succeed.
    struct ScriptedPortal {
        plans: Mutex<HashMap<String, VecDeque<Planned>>>,
        submits: AtomicU32,
    }

    impl ScriptedPortal {
        fn new(plans: &[(&str, &[Planned])]) -> Self {
            let map = plans
                .iter()
                .map(|(key, outcomes)| {
                    (key.to_string(), outcomes.iter().copied().collect())
                })
                .collect();
            Self {
                plans: Mutex::new(map),
                submits: AtomicU32::new(0),
            }
        }

        fn submit_count(&self) -> u32 {
            self.submits.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl PortalDriver<FakeSession> for ScriptedPortal {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn record_key(&self, record: &Record) -> String {
            record.values().first().cloned().unwrap_or_default()
        }

        fn validate(&self, record: &Record) -> Result<(), PortalError> {
            match record.values().first().map(|v| v.trim()) {
                Some(v) if !v.is_empty() => Ok(()),
                _ => Err(PortalError::RecordData("empty key field".into())),
            }
        }

        async fn navigate(&self, _s: &FakeSession) -> Result<(), PortalError> {
            Ok(())
        }

        async fn fill(&self, _s: &FakeSession, record: &Record) -> Result<(), PortalError> {
            // The scripted outcome is keyed per record, and `fill` is the
            // last capability with the record in scope, so the plan is
            // consumed here.
            self.submits.fetch_add(1, Ordering::Relaxed);
            let key = self.record_key(record);
            let planned = {
                let mut plans = self.plans.lock().unwrap();
                plans
                    .get_mut(&key)
                    .and_then(|q| q.pop_front())
                    .unwrap_or(Planned::Succeed)
            };
            match planned {
                Planned::Succeed => Ok(()),
                Planned::FailRetryable => {
                    Err(PortalError::Timeout(format!("{key}: result not ready")))
                }
                Planned::FailFatal => {
                    Err(PortalError::SessionFatal(format!("{key}: chrome crashed")))
                }
            }
        }

        async fn submit(&self, _s: &FakeSession) -> Result<(), PortalError> {
            Ok(())
        }

        async fn await_completion(&self, _s: &FakeSession) -> Result<(), PortalError> {
            Ok(())
        }

        async fn extract_artifact(&self, _s: &FakeSession) -> Result<Vec<u8>, PortalError> {
            Ok(b"%PDF-1.4 stub".to_vec())
        }

        async fn return_to_entry(&self, _s: &FakeSession) -> Result<(), PortalError> {
            Ok(())
        }
    }

    fn records(keys: &[&str]) -> Vec<Record> {
        let headers = Arc::new(vec!["key".to_string()]);
        keys.iter()
            .enumerate()
            .map(|(i, k)| Record::new(i, headers.clone(), vec![k.to_string()]))
            .collect()
    }

    fn fast_config() -> RunConfig {
        RunConfig {
            min_record_delay_ms: 0,
            max_record_delay_ms: 0,
            ..RunConfig::default()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        ledger_path: std::path::PathBuf,
        store: ArtifactStore,
        ledger: ResultLedger,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let ledger_path = dir.path().join("results_test.csv");
            let store = ArtifactStore::new(dir.path().join("pdfs")).unwrap();
            let ledger = ResultLedger::open(&ledger_path).unwrap();
            Self {
                _dir: dir,
                ledger_path,
                store,
                ledger,
            }
        }

        fn ledger_lines(&self) -> Vec<String> {
            std::fs::read_to_string(&self.ledger_path)
                .unwrap()
                .lines()
                .map(|l| l.to_string())
                .collect()
        }
    }

    #[tokio::test]
    async fn flaky_record_retries_then_succeeds_in_completion_order() {
        let mut fixture = Fixture::new();
        let mut manager = FakeManager::new();
        let portal = ScriptedPortal::new(&[(
            "r3",
            &[Planned::FailRetryable, Planned::FailRetryable, Planned::Succeed],
        )]);
        let config = fast_config();

        let summary = Controller::new(
            &mut manager,
            &portal,
            &mut fixture.ledger,
            &fixture.store,
            &config,
        )
        .run(records(&["r1", "r2", "r3", "r4", "r5"]))
        .await
        .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed_terminal, 0);
        assert_eq!(summary.succeeded + summary.failed_terminal, summary.total);

        // r3 was requeued twice, so it completes last.
        assert_eq!(summary.artifacts.len(), 5);
        let last = summary.artifacts.last().unwrap();
        assert!(last.ends_with("005_r3.pdf"), "got {}", last.display());

        // Ledger: header + 5 Success rows.
        let lines = fixture.ledger_lines();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines.iter().filter(|l| l.contains(",Success,")).count(), 5);
    }

    #[tokio::test]
    async fn blank_key_fails_terminally_with_zero_attempts() {
        let mut fixture = Fixture::new();
        let mut manager = FakeManager::new();
        let portal = ScriptedPortal::new(&[]);
        let config = fast_config();

        let summary = Controller::new(
            &mut manager,
            &portal,
            &mut fixture.ledger,
            &fixture.store,
            &config,
        )
        .run(records(&["r1", "   ", "r2"]))
        .await
        .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed_terminal, 1);
        // Only the two valid records ever reached the portal.
        assert_eq!(portal.submit_count(), 2);

        let lines = fixture.ledger_lines();
        assert!(lines.iter().any(|l| l.contains("empty key field")));
    }

    #[tokio::test]
    async fn session_fatal_recreates_and_later_records_still_finish() {
        let mut fixture = Fixture::new();
        let mut manager = FakeManager::new();
        let portal = ScriptedPortal::new(&[(
            "r1",
            &[Planned::FailFatal, Planned::Succeed],
        )]);
        let config = fast_config();

        let summary = Controller::new(
            &mut manager,
            &portal,
            &mut fixture.ledger,
            &fixture.store,
            &config,
        )
        .run(records(&["r1", "r2"]))
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed_terminal, 0);
        assert_eq!(manager.recreations.load(Ordering::Relaxed), 1);
        // Initial launch plus the replacement.
        assert_eq!(manager.launches.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn attempts_never_exceed_the_retry_budget() {
        let mut fixture = Fixture::new();
        let mut manager = FakeManager::new();
        let portal = ScriptedPortal::new(&[(
            "doomed",
            &[
                Planned::FailRetryable,
                Planned::FailRetryable,
                Planned::FailRetryable,
                Planned::FailRetryable,
                Planned::FailRetryable,
            ],
        )]);
        let config = RunConfig {
            max_row_retries: 3,
            min_record_delay_ms: 0,
            max_record_delay_ms: 0,
            ..RunConfig::default()
        };

        let summary = Controller::new(
            &mut manager,
            &portal,
            &mut fixture.ledger,
            &fixture.store,
            &config,
        )
        .run(records(&["doomed"]))
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed_terminal, 1);
        // Exactly max_row_retries interactions, never more.
        assert_eq!(portal.submit_count(), 3);
        assert_eq!(summary.failed_records.len(), 1);

        let lines = fixture.ledger_lines();
        assert!(lines.iter().any(|l| l.starts_with("doomed,Failed,")));
    }
}
