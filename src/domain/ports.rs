use super::account::{Account, AccountOutcome};
use super::flow::{FlowId, FlowOutcome, FlowRecord, StepRecord};
use super::hold::HoldKey;
use super::id::Id;
use super::transfer::{Transfer, TransferOutcome};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Typed façade over the ledger. Implementations never retry on their own;
/// an `Err` means the call's fate is unknown and it may be resubmitted.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_account(&self, account: Account) -> Result<AccountOutcome>;
    async fn create_transfer(&self, transfer: Transfer) -> Result<TransferOutcome>;
    async fn lookup_account(&self, id: Id) -> Result<Option<Account>>;
    /// Ids the ledger does not know are simply missing from the result.
    async fn lookup_transfers(&self, ids: &[Id]) -> Result<Vec<Transfer>>;
    /// The ledger's clock, in the same nanosecond domain as transfer timestamps.
    async fn now(&self) -> Result<u64>;
}

/// Ordered lists of outstanding hold ids keyed by `(account, amount)`.
#[async_trait]
pub trait HoldIndex: Send + Sync {
    async fn append(&self, key: &HoldKey, hold_id: Id) -> Result<()>;
    async fn list(&self, key: &HoldKey) -> Result<Vec<Id>>;
    /// Removes the first occurrence; absent keys and values are a no-op.
    async fn remove(&self, key: &HoldKey, hold_id: Id) -> Result<()>;
}

/// Durable flow histories.
#[async_trait]
pub trait FlowJournal: Send + Sync {
    /// Inserts the record unless one with the same id exists, and returns the stored one.
    async fn start(&self, record: FlowRecord) -> Result<FlowRecord>;
    async fn get(&self, id: &FlowId) -> Result<Option<FlowRecord>>;
    /// First writer wins; every caller gets the canonical step back.
    async fn record_step(&self, id: &FlowId, seq: usize, step: StepRecord) -> Result<StepRecord>;
    /// First writer wins; every caller gets the canonical outcome back.
    async fn complete(&self, id: &FlowId, outcome: FlowOutcome) -> Result<FlowOutcome>;
    async fn incomplete(&self) -> Result<Vec<FlowRecord>>;
}

pub type LedgerRef = Arc<dyn Ledger>;
pub type HoldIndexRef = Arc<dyn HoldIndex>;
pub type FlowJournalRef = Arc<dyn FlowJournal>;
