//! Recovery worker
//!
//! Background worker that resumes flows left incomplete by a crash or by
//! exhausted retries.

use super::orchestrator::Orchestrator;
use crate::domain::flow::{FlowId, FlowOutcome};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often to scan the journal for incomplete flows.
    pub scan_interval: Duration,
    /// Maximum flows resumed per scan.
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

/// A flow handed back to the orchestrator by a recovery scan.
pub struct ResumedFlow {
    pub id: FlowId,
    pub handle: JoinHandle<Result<FlowOutcome>>,
}

pub struct RecoveryWorker {
    orchestrator: Arc<Orchestrator>,
    config: RecoveryConfig,
}

impl RecoveryWorker {
    pub fn new(orchestrator: Arc<Orchestrator>, config: RecoveryConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Scans forever, one pass every `scan_interval`.
    ///
    /// The batch binary only runs a single scan at startup; long-lived
    /// embedders spawn this on its own task.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Resumes every incomplete flow not already running in this process.
    ///
    /// Each flow runs on its own task; expire flows may sleep until their
    /// hold's deadline, so the scan does not wait for them.
    pub async fn scan_and_recover(&self) -> Result<Vec<ResumedFlow>> {
        let incomplete = self.orchestrator.journal().incomplete().await?;
        if incomplete.is_empty() {
            debug!("No incomplete flows found");
            return Ok(Vec::new());
        }

        let mut resumed = Vec::new();
        let idle = incomplete.into_iter().filter(|record| {
            let active = self.orchestrator.is_active(&record.id);
            if active {
                debug!(flow_id = %record.id, "flow already running, skipping");
            }
            !active
        });
        for record in idle.take(self.config.batch_size) {
            info!(
                flow_id = %record.id,
                kind = %record.input.kind(),
                steps = record.steps.len(),
                "Resuming flow"
            );

            let orchestrator = self.orchestrator.clone();
            let id = record.id.clone();
            let handle = tokio::spawn(async move {
                let result = orchestrator.run(record.id.clone(), record.input).await;
                if let Err(e) = &result {
                    error!(flow_id = %record.id, error = %e, "Failed to resume flow");
                }
                result
            });
            resumed.push(ResumedFlow { id, handle });
        }

        if !resumed.is_empty() {
            info!(count = resumed.len(), "Resumed flows this scan");
        }
        Ok(resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::activities::{Activities, LedgerSettings};
    use crate::application::orchestrator::FlowSettings;
    use crate::application::retry::RetryPolicy;
    use crate::domain::account::Account;
    use crate::domain::flow::{FlowInput, FlowRecord};
    use crate::domain::id::Id;
    use crate::domain::ports::{FlowJournal, Ledger};
    use crate::domain::transfer::Transfer;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::{InMemoryFlowJournal, InMemoryHoldIndex};
    use crate::infrastructure::in_memory_ledger::InMemoryLedger;

    fn worker(journal: InMemoryFlowJournal) -> RecoveryWorker {
        worker_with(InMemoryLedger::new(), journal, RecoveryConfig::default())
    }

    fn worker_with(
        ledger: InMemoryLedger,
        journal: InMemoryFlowJournal,
        config: RecoveryConfig,
    ) -> RecoveryWorker {
        let activities = Activities::new(
            Arc::new(ledger),
            Arc::new(InMemoryHoldIndex::new()),
            LedgerSettings {
                ledger: 1,
                code: 1,
                hold_timeout_nanos: 1_000,
            },
        );
        let orchestrator = Orchestrator::new(
            Arc::new(activities),
            Arc::new(journal),
            RetryPolicy::no_retry(),
            FlowSettings {
                settlement_account: Id::new(0x1234567),
                max_rematch_attempts: 3,
                expiry_poll: Duration::from_millis(1),
            },
        );
        RecoveryWorker::new(Arc::new(orchestrator), config)
    }

    fn orphan_present(id: &FlowId) -> FlowRecord {
        FlowRecord::new(
            id.clone(),
            FlowInput::Present {
                account: Id::new(0xa),
                amount: 10,
            },
        )
    }

    #[test]
    fn test_recovery_config_default() {
        let config = RecoveryConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 100);
    }

    #[tokio::test]
    async fn test_empty_journal_resumes_nothing() {
        let worker = worker(InMemoryFlowJournal::new());
        assert!(worker.scan_and_recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_flows_are_driven_to_an_outcome() {
        let journal = InMemoryFlowJournal::new();
        let id = FlowId::new("present-orphan").unwrap();
        journal
            .start(FlowRecord::new(
                id.clone(),
                FlowInput::Present {
                    account: Id::new(0xa),
                    amount: 10,
                },
            ))
            .await
            .unwrap();

        let worker = worker(journal.clone());
        let resumed = worker.scan_and_recover().await.unwrap();
        assert_eq!(resumed.len(), 1);
        for flow in resumed {
            assert_eq!(flow.id, id);
            flow.handle.await.unwrap().unwrap();
        }

        assert!(journal.incomplete().await.unwrap().is_empty());
        assert!(worker.scan_and_recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_running_flows_do_not_fill_the_batch() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let ledger = InMemoryLedger::with_clock(clock);
        let customer = Id::new(0xa);
        ledger
            .create_account(Account::new(customer, 1, 1))
            .await
            .unwrap();
        ledger
            .create_account(Account::new(Id::new(0x1234567), 1, 1))
            .await
            .unwrap();
        ledger
            .create_account(Account::new(Id::new(0x1), 1, 1))
            .await
            .unwrap();
        ledger
            .create_transfer(Transfer::posted(Id::generate(), Id::new(0x1), customer, 1000, 1, 1))
            .await
            .unwrap();

        let journal = InMemoryFlowJournal::new();
        let worker = worker_with(
            ledger,
            journal.clone(),
            RecoveryConfig {
                scan_interval: Duration::from_secs(30),
                batch_size: 1,
            },
        );
        let orchestrator = worker.orchestrator.clone();

        // The clock never moves, so this expire flow waits for as long as the test runs.
        let FlowOutcome::Authorized { hold_id } = orchestrator
            .authorize(FlowId::new("auth-1").unwrap(), customer, 100)
            .await
            .unwrap()
        else {
            panic!("expected authorization");
        };
        let expiry = FlowId::for_expiry(hold_id);
        let sleeper = orchestrator.clone();
        let waiting = tokio::spawn(async move { sleeper.expire(hold_id).await });
        while !orchestrator.is_active(&expiry) {
            tokio::task::yield_now().await;
        }

        let orphan = FlowId::new("zz-orphan").unwrap();
        journal.start(orphan_present(&orphan)).await.unwrap();
        assert_eq!(journal.incomplete().await.unwrap().len(), 2);

        let resumed = worker.scan_and_recover().await.unwrap();
        let ids: Vec<_> = resumed.iter().map(|flow| flow.id.clone()).collect();
        assert_eq!(ids, vec![orphan]);
        for flow in resumed {
            flow.handle.await.unwrap().unwrap();
        }
        waiting.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_scanning() {
        let journal = InMemoryFlowJournal::new();
        let worker = Arc::new(worker(journal.clone()));
        let background = worker.clone();
        let scanner = tokio::spawn(async move {
            background.run().await;
        });

        // Lands after the first scan, so only a later pass can pick it up.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let id = FlowId::new("present-late").unwrap();
        journal.start(orphan_present(&id)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..100 {
            if journal.incomplete().await.unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(journal.get(&id).await.unwrap().unwrap().is_complete());
        scanner.abort();
    }
}
