use super::clock::{Clock, SystemClock};
use crate::domain::account::{Account, AccountOutcome, AccountRejectReason};
use crate::domain::id::Id;
use crate::domain::ports::Ledger;
use crate::domain::transfer::{PendingStatus, RejectReason, Transfer, TransferOutcome};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Id, Account>,
    transfers: HashMap<Id, Transfer>,
    last_timestamp: u64,
}

impl LedgerState {
    /// Ledger timestamps are strictly increasing even if the clock stalls.
    fn next_timestamp(&mut self, clock: &dyn Clock) -> u64 {
        let ts = clock.now_nanos().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }
}

/// A double-entry ledger held in memory.
///
/// Implements the pending/post/void transfer model the coordinator relies on:
/// every submission is keyed by a caller-chosen id, duplicates are answered with
/// `Exists`, and a pending transfer resolves at most once. Stands in for an
/// external ledger in tests and in the batch CLI.
///
/// `Clone` shares the underlying state.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            clock,
        }
    }

    /// Every accepted transfer, oldest first.
    pub async fn all_transfers(&self) -> Vec<Transfer> {
        let state = self.state.read().await;
        let mut transfers: Vec<Transfer> = state.transfers.values().cloned().collect();
        transfers.sort_by_key(|t| t.timestamp);
        transfers
    }
}

fn validate_account(account: &Account) -> Option<AccountRejectReason> {
    if account.id.is_zero() {
        return Some(AccountRejectReason::IdMustNotBeZero);
    }
    if account.id.value() == u128::MAX {
        return Some(AccountRejectReason::IdMustNotBeIntMax);
    }
    if account.ledger == 0 {
        return Some(AccountRejectReason::LedgerMustNotBeZero);
    }
    if account.code == 0 {
        return Some(AccountRejectReason::CodeMustNotBeZero);
    }
    if account.debits_pending != 0
        || account.debits_posted != 0
        || account.credits_pending != 0
        || account.credits_posted != 0
    {
        return Some(AccountRejectReason::BalancesMustBeZero);
    }
    None
}

/// Zero-valued fields of a post/void submission are inherited from the
/// pending transfer, so they match whatever was stored.
fn same_submission(stored: &Transfer, submitted: &Transfer) -> bool {
    let inherits = submitted.flags.post_pending || submitted.flags.void_pending;
    let matches_id = |s: Id, t: Id| (inherits && t.is_zero()) || s == t;
    let matches_num = |s: u64, t: u64| (inherits && t == 0) || s == t;

    stored.flags == submitted.flags
        && stored.pending_id == submitted.pending_id
        && stored.timeout == submitted.timeout
        && matches_id(stored.debit_account_id, submitted.debit_account_id)
        && matches_id(stored.credit_account_id, submitted.credit_account_id)
        && matches_num(stored.amount, submitted.amount)
        && matches_num(u64::from(stored.ledger), u64::from(submitted.ledger))
        && matches_num(u64::from(stored.code), u64::from(submitted.code))
}

fn create_single_phase(
    state: &mut LedgerState,
    clock: &dyn Clock,
    mut transfer: Transfer,
) -> std::result::Result<(), RejectReason> {
    if transfer.pending_id.is_some() {
        return Err(RejectReason::PendingIdMustBeZero);
    }
    if transfer.timeout > 0 && !transfer.flags.pending {
        return Err(RejectReason::TimeoutReservedForPendingTransfer);
    }
    if transfer.amount == 0 {
        return Err(RejectReason::AmountMustNotBeZero);
    }
    if transfer.debit_account_id == transfer.credit_account_id {
        return Err(RejectReason::AccountsMustBeDifferent);
    }
    let debit = state
        .accounts
        .get(&transfer.debit_account_id)
        .ok_or(RejectReason::DebitAccountNotFound)?;
    let credit = state
        .accounts
        .get(&transfer.credit_account_id)
        .ok_or(RejectReason::CreditAccountNotFound)?;
    if debit.ledger != transfer.ledger || credit.ledger != transfer.ledger {
        return Err(RejectReason::LedgerMustMatch);
    }

    let amount = transfer.amount;
    if debit.flags.debits_must_not_exceed_credits {
        let committed = debit
            .debits_posted
            .checked_add(debit.debits_pending)
            .and_then(|d| d.checked_add(amount))
            .ok_or(RejectReason::Overflow)?;
        if committed > debit.credits_posted {
            return Err(RejectReason::ExceedsCredits);
        }
    }

    let (debit_field, credit_field) = if transfer.flags.pending {
        (debit.debits_pending, credit.credits_pending)
    } else {
        (debit.debits_posted, credit.credits_posted)
    };
    let new_debit = debit_field.checked_add(amount).ok_or(RejectReason::Overflow)?;
    let new_credit = credit_field
        .checked_add(amount)
        .ok_or(RejectReason::Overflow)?;

    let pending = transfer.flags.pending;
    if let Some(debit) = state.accounts.get_mut(&transfer.debit_account_id) {
        if pending {
            debit.debits_pending = new_debit;
        } else {
            debit.debits_posted = new_debit;
        }
    }
    if let Some(credit) = state.accounts.get_mut(&transfer.credit_account_id) {
        if pending {
            credit.credits_pending = new_credit;
        } else {
            credit.credits_posted = new_credit;
        }
    }

    transfer.timestamp = state.next_timestamp(clock);
    transfer.pending_status = if pending {
        PendingStatus::Pending
    } else {
        PendingStatus::None
    };
    state.transfers.insert(transfer.id, transfer);
    Ok(())
}

fn resolve_pending(
    state: &mut LedgerState,
    clock: &dyn Clock,
    mut transfer: Transfer,
) -> std::result::Result<(), RejectReason> {
    let pending_id = transfer
        .pending_id
        .filter(|id| !id.is_zero())
        .ok_or(RejectReason::PendingIdRequired)?;
    let pending = state
        .transfers
        .get(&pending_id)
        .ok_or(RejectReason::PendingTransferNotFound)?
        .clone();
    if !pending.flags.pending {
        return Err(RejectReason::PendingTransferNotPending);
    }
    if !transfer.debit_account_id.is_zero()
        && transfer.debit_account_id != pending.debit_account_id
    {
        return Err(RejectReason::PendingTransferHasDifferentDebitAccount);
    }
    if !transfer.credit_account_id.is_zero()
        && transfer.credit_account_id != pending.credit_account_id
    {
        return Err(RejectReason::PendingTransferHasDifferentCreditAccount);
    }
    match pending.pending_status {
        PendingStatus::Posted => return Err(RejectReason::PendingTransferAlreadyPosted),
        PendingStatus::Voided => return Err(RejectReason::PendingTransferAlreadyVoided),
        PendingStatus::None | PendingStatus::Pending => {}
    }
    if transfer.amount > pending.amount {
        return Err(RejectReason::ExceedsPendingTransferAmount);
    }

    let now = clock.now_nanos().max(state.last_timestamp);
    let posting = transfer.flags.post_pending;
    // Expired holds can still be released, never captured.
    if posting && pending.is_expired_hold(now) {
        return Err(RejectReason::PendingTransferExpired);
    }

    let posted_amount = if !posting {
        0
    } else if transfer.amount == 0 {
        pending.amount
    } else {
        transfer.amount
    };

    let debit = state
        .accounts
        .get(&pending.debit_account_id)
        .ok_or(RejectReason::DebitAccountNotFound)?;
    let credit = state
        .accounts
        .get(&pending.credit_account_id)
        .ok_or(RejectReason::CreditAccountNotFound)?;
    let debits_posted = debit
        .debits_posted
        .checked_add(posted_amount)
        .ok_or(RejectReason::Overflow)?;
    let credits_posted = credit
        .credits_posted
        .checked_add(posted_amount)
        .ok_or(RejectReason::Overflow)?;

    if let Some(debit) = state.accounts.get_mut(&pending.debit_account_id) {
        debit.debits_pending = debit.debits_pending.saturating_sub(pending.amount);
        debit.debits_posted = debits_posted;
    }
    if let Some(credit) = state.accounts.get_mut(&pending.credit_account_id) {
        credit.credits_pending = credit.credits_pending.saturating_sub(pending.amount);
        credit.credits_posted = credits_posted;
    }
    if let Some(stored) = state.transfers.get_mut(&pending_id) {
        stored.pending_status = if posting {
            PendingStatus::Posted
        } else {
            PendingStatus::Voided
        };
    }

    transfer.debit_account_id = pending.debit_account_id;
    transfer.credit_account_id = pending.credit_account_id;
    transfer.ledger = pending.ledger;
    transfer.code = pending.code;
    transfer.amount = if posting { posted_amount } else { pending.amount };
    transfer.timestamp = state.next_timestamp(clock);
    transfer.pending_status = PendingStatus::None;
    state.transfers.insert(transfer.id, transfer);
    Ok(())
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn create_account(&self, mut account: Account) -> Result<AccountOutcome> {
        if let Some(reason) = validate_account(&account) {
            return Ok(AccountOutcome::Rejected(reason));
        }
        let mut state = self.state.write().await;
        if let Some(existing) = state.accounts.get(&account.id) {
            let reason = if existing.same_definition(&account) {
                AccountRejectReason::Exists
            } else {
                AccountRejectReason::ExistsWithDifferentFields
            };
            return Ok(AccountOutcome::Rejected(reason));
        }
        account.timestamp = state.next_timestamp(self.clock.as_ref());
        state.accounts.insert(account.id, account);
        Ok(AccountOutcome::Accepted)
    }

    async fn create_transfer(&self, transfer: Transfer) -> Result<TransferOutcome> {
        if transfer.id.is_zero() {
            return Ok(TransferOutcome::Rejected(RejectReason::IdMustNotBeZero));
        }
        if transfer.id.value() == u128::MAX {
            return Ok(TransferOutcome::Rejected(RejectReason::IdMustNotBeIntMax));
        }
        let flags = transfer.flags;
        let set_flags = [flags.pending, flags.post_pending, flags.void_pending]
            .iter()
            .filter(|f| **f)
            .count();
        if set_flags > 1 {
            return Ok(TransferOutcome::Rejected(
                RejectReason::FlagsAreMutuallyExclusive,
            ));
        }

        let mut state = self.state.write().await;
        if let Some(stored) = state.transfers.get(&transfer.id) {
            let reason = if same_submission(stored, &transfer) {
                RejectReason::Exists
            } else {
                RejectReason::ExistsWithDifferentFields
            };
            return Ok(TransferOutcome::Rejected(reason));
        }

        let result = if flags.post_pending || flags.void_pending {
            resolve_pending(&mut state, self.clock.as_ref(), transfer)
        } else {
            create_single_phase(&mut state, self.clock.as_ref(), transfer)
        };
        Ok(match result {
            Ok(()) => TransferOutcome::Accepted,
            Err(reason) => TransferOutcome::Rejected(reason),
        })
    }

    async fn lookup_account(&self, id: Id) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&id).cloned())
    }

    async fn lookup_transfers(&self, ids: &[Id]) -> Result<Vec<Transfer>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.transfers.get(id))
            .cloned()
            .collect())
    }

    async fn now(&self) -> Result<u64> {
        let state = self.state.read().await;
        Ok(self.clock.now_nanos().max(state.last_timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountFlags;
    use crate::infrastructure::clock::ManualClock;
    use std::time::Duration;

    const CUSTOMER: Id = Id::new(0xa);
    const MERCHANT: Id = Id::new(0xb);
    const BANK: Id = Id::new(0xc);

    async fn funded_ledger(clock: Arc<ManualClock>, balance: u64) -> InMemoryLedger {
        let ledger = InMemoryLedger::with_clock(clock);
        let customer = Account::new(CUSTOMER, 1, 1).with_flags(AccountFlags {
            debits_must_not_exceed_credits: true,
        });
        ledger.create_account(customer).await.unwrap();
        ledger
            .create_account(Account::new(MERCHANT, 1, 1))
            .await
            .unwrap();
        ledger.create_account(Account::new(BANK, 1, 1)).await.unwrap();
        let funding = Transfer::posted(Id::new(1), BANK, CUSTOMER, balance, 1, 1);
        assert_eq!(
            ledger.create_transfer(funding).await.unwrap(),
            TransferOutcome::Accepted
        );
        ledger
    }

    #[tokio::test]
    async fn test_duplicate_account_outcomes() {
        let ledger = InMemoryLedger::new();
        let account = Account::new(CUSTOMER, 1, 1);
        assert_eq!(
            ledger.create_account(account.clone()).await.unwrap(),
            AccountOutcome::Accepted
        );
        assert_eq!(
            ledger.create_account(account).await.unwrap(),
            AccountOutcome::Rejected(AccountRejectReason::Exists)
        );
        assert_eq!(
            ledger
                .create_account(Account::new(CUSTOMER, 2, 1))
                .await
                .unwrap(),
            AccountOutcome::Rejected(AccountRejectReason::ExistsWithDifferentFields)
        );
    }

    #[tokio::test]
    async fn test_pending_then_post() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock, 1000).await;

        let hold = Transfer::pending(Id::new(10), CUSTOMER, MERCHANT, 300, 60, 1, 1);
        assert_eq!(
            ledger.create_transfer(hold).await.unwrap(),
            TransferOutcome::Accepted
        );
        let account = ledger.lookup_account(CUSTOMER).await.unwrap().unwrap();
        assert_eq!(account.debits_pending, 300);
        assert_eq!(account.available(), 700);

        let post = Transfer::post_pending(Id::new(11), Id::new(10), CUSTOMER, 300);
        assert_eq!(
            ledger.create_transfer(post.clone()).await.unwrap(),
            TransferOutcome::Accepted
        );
        let account = ledger.lookup_account(CUSTOMER).await.unwrap().unwrap();
        assert_eq!(account.debits_pending, 0);
        assert_eq!(account.debits_posted, 300);

        // Same id again: the ledger recognises our own submission.
        assert_eq!(
            ledger.create_transfer(post).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::Exists)
        );
        // A different post for the same hold loses.
        let second = Transfer::post_pending(Id::new(12), Id::new(10), CUSTOMER, 300);
        assert_eq!(
            ledger.create_transfer(second).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::PendingTransferAlreadyPosted)
        );
        let void = Transfer::void_pending(Id::new(13), Id::new(10));
        assert_eq!(
            ledger.create_transfer(void).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::PendingTransferAlreadyPosted)
        );
    }

    #[tokio::test]
    async fn test_exceeds_credits_rejected() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock, 1000).await;
        let hold = Transfer::pending(Id::new(10), CUSTOMER, MERCHANT, 9999, 60, 1, 1);
        assert_eq!(
            ledger.create_transfer(hold).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::ExceedsCredits)
        );
        assert!(
            ledger
                .lookup_transfers(&[Id::new(10)])
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_expired_hold_can_be_voided_not_posted() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock.clone(), 1000).await;
        let hold = Transfer::pending(Id::new(10), CUSTOMER, MERCHANT, 100, 50, 1, 1);
        ledger.create_transfer(hold).await.unwrap();

        clock.advance(Duration::from_nanos(100));

        let post = Transfer::post_pending(Id::new(11), Id::new(10), CUSTOMER, 100);
        assert_eq!(
            ledger.create_transfer(post).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::PendingTransferExpired)
        );
        let void = Transfer::void_pending(Id::new(12), Id::new(10));
        assert_eq!(
            ledger.create_transfer(void).await.unwrap(),
            TransferOutcome::Accepted
        );
        let account = ledger.lookup_account(CUSTOMER).await.unwrap().unwrap();
        assert_eq!(account.debits_pending, 0);
        assert_eq!(account.available(), 1000);

        let stored = ledger.lookup_transfers(&[Id::new(10)]).await.unwrap();
        assert_eq!(stored[0].pending_status, PendingStatus::Voided);
    }

    #[tokio::test]
    async fn test_timestamps_are_monotonic_when_clock_stalls() {
        let clock = Arc::new(ManualClock::new(5));
        let ledger = funded_ledger(clock, 1000).await;
        let transfers = ledger.all_transfers().await;
        let t1 = Transfer::posted(Id::new(2), BANK, CUSTOMER, 1, 1, 1);
        ledger.create_transfer(t1).await.unwrap();
        let after = ledger.lookup_transfers(&[Id::new(2)]).await.unwrap();
        assert!(after[0].timestamp > transfers[0].timestamp);
        assert!(ledger.now().await.unwrap() >= after[0].timestamp);
    }

    #[tokio::test]
    async fn test_lookup_skips_unknown_ids() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock, 10).await;
        let found = ledger
            .lookup_transfers(&[Id::new(404), Id::new(1)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Id::new(1));
    }

    #[tokio::test]
    async fn test_single_phase_validation() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock, 10).await;
        let same = Transfer::posted(Id::new(20), CUSTOMER, CUSTOMER, 1, 1, 1);
        assert_eq!(
            ledger.create_transfer(same).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::AccountsMustBeDifferent)
        );
        let unknown = Transfer::posted(Id::new(21), Id::new(0x99), CUSTOMER, 1, 1, 1);
        assert_eq!(
            ledger.create_transfer(unknown).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::DebitAccountNotFound)
        );
        let zero = Transfer::posted(Id::new(22), BANK, CUSTOMER, 0, 1, 1);
        assert_eq!(
            ledger.create_transfer(zero).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::AmountMustNotBeZero)
        );
        let dangling = Transfer::void_pending(Id::new(23), Id::new(0x77));
        assert_eq!(
            ledger.create_transfer(dangling).await.unwrap(),
            TransferOutcome::Rejected(RejectReason::PendingTransferNotFound)
        );
    }
}
