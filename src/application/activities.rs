use crate::domain::hold::{HoldKey, HoldSnapshot};
use crate::domain::id::Id;
use crate::domain::ports::{HoldIndexRef, LedgerRef};
use crate::domain::transfer::{PendingStatus, RejectReason, Transfer, TransferOutcome};
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Ledger coordinates used for every hold.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub ledger: u32,
    pub code: u16,
    /// Lifetime of a hold in ledger nanoseconds.
    pub hold_timeout_nanos: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceCheck {
    Sufficient { available: u64 },
    Insufficient { available: u64 },
    AccountNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldPlacement {
    Placed { hold_id: Id },
    InsufficientBalance,
    AccountNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { hold_id: Id },
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostOutcome {
    Posted,
    /// Another transfer posted, voided or outlived the hold first.
    AlreadyResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidOutcome {
    Voided,
    AlreadyResolved,
}

/// The units of work flows are built from.
///
/// Every activity is safe to run more than once with the same arguments.
/// Business outcomes come back as values; only infrastructure failures (and
/// ledger rejections that indicate a misconfiguration) are errors.
pub struct Activities {
    ledger: LedgerRef,
    index: HoldIndexRef,
    settings: LedgerSettings,
}

impl Activities {
    pub fn new(ledger: LedgerRef, index: HoldIndexRef, settings: LedgerSettings) -> Self {
        Self {
            ledger,
            index,
            settings,
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub async fn check_balance(&self, account: Id, amount: u64) -> Result<BalanceCheck> {
        let Some(found) = self.ledger.lookup_account(account).await? else {
            return Ok(BalanceCheck::AccountNotFound);
        };
        let available = found.available();
        debug!(account = %account, amount, available, "balance checked");
        if amount <= available {
            Ok(BalanceCheck::Sufficient { available })
        } else {
            Ok(BalanceCheck::Insufficient { available })
        }
    }

    pub async fn verify_account(&self, account: Id) -> Result<bool> {
        Ok(self.ledger.lookup_account(account).await?.is_some())
    }

    /// Submits a pending transfer under `hold_id` and indexes it.
    ///
    /// `Exists` means an earlier attempt of ours got through; the index entry
    /// is then only added if it is missing and the hold is still unresolved.
    pub async fn place_hold(
        &self,
        hold_id: Id,
        debit: Id,
        credit: Id,
        amount: u64,
    ) -> Result<HoldPlacement> {
        let transfer = Transfer::pending(
            hold_id,
            debit,
            credit,
            amount,
            self.settings.hold_timeout_nanos,
            self.settings.ledger,
            self.settings.code,
        );
        let key = HoldKey::new(debit, amount);

        match self.ledger.create_transfer(transfer).await? {
            TransferOutcome::Accepted => {
                self.index.append(&key, hold_id).await?;
                info!(hold_id = %hold_id, account = %debit, amount, "hold placed");
                Ok(HoldPlacement::Placed { hold_id })
            }
            TransferOutcome::Rejected(RejectReason::Exists) => {
                let indexed = self.index.list(&key).await?.contains(&hold_id);
                if !indexed && self.is_still_pending(hold_id).await? {
                    self.index.append(&key, hold_id).await?;
                }
                debug!(hold_id = %hold_id, indexed, "hold already placed by an earlier attempt");
                Ok(HoldPlacement::Placed { hold_id })
            }
            TransferOutcome::Rejected(RejectReason::ExceedsCredits) => {
                info!(account = %debit, amount, "hold declined: insufficient balance");
                Ok(HoldPlacement::InsufficientBalance)
            }
            TransferOutcome::Rejected(RejectReason::DebitAccountNotFound) => {
                Ok(HoldPlacement::AccountNotFound)
            }
            TransferOutcome::Rejected(reason) => Err(PaymentError::TransferRejected(reason)),
        }
    }

    /// Finds the oldest live hold for `(debit, amount)`.
    ///
    /// Candidates scanned before the match that are no longer live are dropped
    /// from the index; those still pending past their deadline are voided first.
    pub async fn match_presentment(&self, debit: Id, amount: u64) -> Result<MatchOutcome> {
        let key = HoldKey::new(debit, amount);
        let candidates = self.index.list(&key).await?;
        if candidates.is_empty() {
            return Ok(MatchOutcome::NoMatch);
        }

        let transfers: HashMap<Id, Transfer> = self
            .ledger
            .lookup_transfers(&candidates)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        let now = self.ledger.now().await?;

        for hold_id in candidates {
            let hold = transfers
                .get(&hold_id)
                .filter(|t| t.debit_account_id == debit && t.amount == amount);
            match hold {
                Some(t) if t.is_live_hold(now) => {
                    debug!(hold_id = %hold_id, key = %key, "presentment matched");
                    return Ok(MatchOutcome::Matched { hold_id });
                }
                Some(t) if t.is_expired_hold(now) => {
                    let outcome = self.void_hold(Id::generate(), hold_id).await?;
                    info!(hold_id = %hold_id, ?outcome, "expired hold voided during matching");
                    self.index.remove(&key, hold_id).await?;
                }
                _ => {
                    debug!(hold_id = %hold_id, key = %key, "stale index entry removed");
                    self.index.remove(&key, hold_id).await?;
                }
            }
        }
        Ok(MatchOutcome::NoMatch)
    }

    /// Captures the full amount of a hold under `post_id`.
    pub async fn post_hold(
        &self,
        post_id: Id,
        hold_id: Id,
        debit: Id,
        amount: u64,
    ) -> Result<PostOutcome> {
        let transfer = Transfer::post_pending(post_id, hold_id, debit, amount);
        match self.ledger.create_transfer(transfer).await? {
            TransferOutcome::Accepted | TransferOutcome::Rejected(RejectReason::Exists) => {
                self.index.remove(&HoldKey::new(debit, amount), hold_id).await?;
                info!(hold_id = %hold_id, post_id = %post_id, "hold captured");
                Ok(PostOutcome::Posted)
            }
            TransferOutcome::Rejected(reason) if reason.is_already_resolved() => {
                warn!(hold_id = %hold_id, %reason, "hold resolved before capture");
                Ok(PostOutcome::AlreadyResolved)
            }
            TransferOutcome::Rejected(reason) => Err(PaymentError::TransferRejected(reason)),
        }
    }

    /// Releases a hold under `void_id`.
    pub async fn void_hold(&self, void_id: Id, hold_id: Id) -> Result<VoidOutcome> {
        let transfer = Transfer::void_pending(void_id, hold_id);
        match self.ledger.create_transfer(transfer).await? {
            TransferOutcome::Accepted | TransferOutcome::Rejected(RejectReason::Exists) => {
                Ok(VoidOutcome::Voided)
            }
            TransferOutcome::Rejected(reason) if reason.is_already_resolved() => {
                debug!(hold_id = %hold_id, %reason, "hold already resolved");
                Ok(VoidOutcome::AlreadyResolved)
            }
            TransferOutcome::Rejected(reason) => Err(PaymentError::TransferRejected(reason)),
        }
    }

    pub async fn load_hold(&self, hold_id: Id) -> Result<Option<HoldSnapshot>> {
        let found = self.ledger.lookup_transfers(&[hold_id]).await?;
        Ok(found
            .iter()
            .find(|t| t.id == hold_id && t.flags.pending)
            .map(HoldSnapshot::from_transfer))
    }

    pub async fn is_still_pending(&self, hold_id: Id) -> Result<bool> {
        let found = self.ledger.lookup_transfers(&[hold_id]).await?;
        Ok(found
            .iter()
            .any(|t| t.id == hold_id && t.pending_status == PendingStatus::Pending))
    }

    pub async fn release_index_entry(&self, key: HoldKey, hold_id: Id) -> Result<()> {
        self.index.remove(&key, hold_id).await
    }

    pub async fn ledger_time(&self) -> Result<u64> {
        self.ledger.now().await
    }
}
