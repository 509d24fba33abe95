use super::id::Id;
use super::transfer::{PendingStatus, Transfer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index key under which outstanding holds are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldKey {
    pub account: Id,
    pub amount: u64,
}

impl HoldKey {
    pub fn new(account: Id, amount: u64) -> Self {
        Self { account, amount }
    }
}

impl fmt::Display for HoldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "authorizations:{}:amounts:{}:transfers",
            self.account, self.amount
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Placed,
    Captured,
    Expired,
}

impl From<PendingStatus> for HoldState {
    fn from(status: PendingStatus) -> Self {
        match status {
            PendingStatus::Posted => HoldState::Captured,
            PendingStatus::Voided => HoldState::Expired,
            PendingStatus::None | PendingStatus::Pending => HoldState::Placed,
        }
    }
}

/// What the expiry flow needs to know about a hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldSnapshot {
    pub hold_id: Id,
    pub key: HoldKey,
    /// Ledger time at which the hold lapses; `None` for holds without a timeout.
    pub deadline: Option<u64>,
    pub state: HoldState,
}

impl HoldSnapshot {
    pub fn from_transfer(transfer: &Transfer) -> Self {
        Self {
            hold_id: transfer.id,
            key: HoldKey::new(transfer.debit_account_id, transfer.amount),
            deadline: transfer.deadline(),
            state: transfer.pending_status.into(),
        }
    }
}
