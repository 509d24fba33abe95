#![allow(dead_code)]

use async_trait::async_trait;
use rand::Rng;
use holdfast::application::service::PaymentService;
use holdfast::config::AppConfig;
use holdfast::domain::account::{Account, AccountOutcome};
use holdfast::domain::flow::{FlowId, FlowRecord};
use holdfast::domain::id::Id;
use holdfast::domain::ports::{FlowJournal, Ledger, LedgerRef};
use holdfast::domain::transfer::{Transfer, TransferOutcome};
use holdfast::error::{PaymentError, Result};
use holdfast::infrastructure::clock::ManualClock;
use holdfast::infrastructure::in_memory::{InMemoryFlowJournal, InMemoryHoldIndex};
use holdfast::infrastructure::in_memory_ledger::InMemoryLedger;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const HOLD_DURATION_MS: u64 = 60_000;

/// Defaults, but with fast retries and a tight expiry poll.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.authorization.hold_duration_ms = HOLD_DURATION_MS;
    config.authorization.expiry_poll_ms = 1;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: InMemoryLedger,
    pub index: InMemoryHoldIndex,
    pub journal: InMemoryFlowJournal,
    pub service: Arc<PaymentService>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config(), |ledger| Arc::new(ledger) as LedgerRef).await
    }

    /// `wrap` lets a test put a fault-injecting ledger in front of the real one.
    pub async fn with_config(
        config: AppConfig,
        wrap: impl FnOnce(InMemoryLedger) -> LedgerRef,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000_000));
        let ledger = InMemoryLedger::with_clock(clock.clone());
        let index = InMemoryHoldIndex::new();
        let journal = InMemoryFlowJournal::new();
        let service = PaymentService::new(
            wrap(ledger.clone()),
            Arc::new(index.clone()),
            Arc::new(journal.clone()),
            config,
        );
        service.ensure_system_accounts().await.unwrap();
        Self {
            clock,
            ledger,
            index,
            journal,
            service: Arc::new(service),
        }
    }

    /// Opens `account` and credits it with `balance`.
    pub async fn funded_account(&self, account: &str, balance: u64) -> Id {
        let id = self.service.open_account(account).await.unwrap();
        self.service.fund(account, balance).await.unwrap();
        id
    }

    pub async fn account(&self, id: Id) -> Account {
        self.ledger.lookup_account(id).await.unwrap().unwrap()
    }

    pub async fn journal_record(&self, id: &FlowId) -> Option<FlowRecord> {
        self.journal.get(id).await.unwrap()
    }

    /// Pending transfers the ledger holds against `id`, resolved or not.
    pub async fn holds_on(&self, id: Id) -> Vec<Transfer> {
        self.ledger
            .all_transfers()
            .await
            .into_iter()
            .filter(|t| t.flags.pending && t.debit_account_id == id)
            .collect()
    }
}

/// Forwards every call, but when armed fails the next `create_transfer`
/// after the ledger has already applied it, like a connection that drops
/// before the reply arrives.
pub struct LostReplyLedger {
    inner: InMemoryLedger,
    armed: AtomicBool,
}

impl LostReplyLedger {
    pub fn new(inner: InMemoryLedger) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Ledger for LostReplyLedger {
    async fn create_account(&self, account: Account) -> Result<AccountOutcome> {
        self.inner.create_account(account).await
    }

    async fn create_transfer(&self, transfer: Transfer) -> Result<TransferOutcome> {
        let outcome = self.inner.create_transfer(transfer).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            return Err(PaymentError::LedgerError("connection reset".to_string()));
        }
        Ok(outcome)
    }

    async fn lookup_account(&self, id: Id) -> Result<Option<Account>> {
        self.inner.lookup_account(id).await
    }

    async fn lookup_transfers(&self, ids: &[Id]) -> Result<Vec<Transfer>> {
        self.inner.lookup_transfers(ids).await
    }

    async fn now(&self) -> Result<u64> {
        self.inner.now().await
    }
}

/// Forwards every call, sleeping 1-2 ms before each transfer submission and
/// lookup so concurrent flows interleave the way they do against a remote ledger.
pub struct SlowLedger {
    inner: InMemoryLedger,
}

impl SlowLedger {
    pub fn new(inner: InMemoryLedger) -> Self {
        Self { inner }
    }

    async fn lag(&self) {
        let millis = rand::thread_rng().gen_range(1..=2);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[async_trait]
impl Ledger for SlowLedger {
    async fn create_account(&self, account: Account) -> Result<AccountOutcome> {
        self.inner.create_account(account).await
    }

    async fn create_transfer(&self, transfer: Transfer) -> Result<TransferOutcome> {
        self.lag().await;
        self.inner.create_transfer(transfer).await
    }

    async fn lookup_account(&self, id: Id) -> Result<Option<Account>> {
        self.inner.lookup_account(id).await
    }

    async fn lookup_transfers(&self, ids: &[Id]) -> Result<Vec<Transfer>> {
        self.lag().await;
        self.inner.lookup_transfers(ids).await
    }

    async fn now(&self) -> Result<u64> {
        self.inner.now().await
    }
}

pub fn generate_commands_csv(path: &Path, accounts: usize) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "account", "amount", "flow"])?;
    for i in 1..=accounts {
        let account = format!("{:x}", 0x1000 + i);
        wtr.write_record(["open", &account, "", ""])?;
        wtr.write_record(["fund", &account, "1000", ""])?;
        wtr.write_record(["authorize", &account, "250", ""])?;
        wtr.write_record(["present", &account, "250", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
