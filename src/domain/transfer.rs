use super::id::Id;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
pub struct TransferFlags {
    pub pending: bool,
    pub post_pending: bool,
    pub void_pending: bool,
}

/// Resolution state of a pending transfer, maintained by the ledger.
///
/// The pending transfer's own flags never change once accepted; this is how a
/// lookup tells whether it was later posted or voided.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    /// Not a pending transfer.
    #[default]
    None,
    Pending,
    Posted,
    Voided,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Transfer {
    pub id: Id,
    pub debit_account_id: Id,
    pub credit_account_id: Id,
    pub amount: u64,
    /// Back-reference for post/void transfers.
    pub pending_id: Option<Id>,
    /// Nanoseconds a pending transfer stays live; 0 means it never expires.
    pub timeout: u64,
    pub ledger: u32,
    pub code: u16,
    pub flags: TransferFlags,
    /// Assigned by the ledger on acceptance, monotonic across the ledger.
    pub timestamp: u64,
    #[serde(default)]
    pub pending_status: PendingStatus,
}

impl Transfer {
    /// A single-phase transfer that posts immediately.
    pub fn posted(id: Id, debit: Id, credit: Id, amount: u64, ledger: u32, code: u16) -> Self {
        Self {
            id,
            debit_account_id: debit,
            credit_account_id: credit,
            amount,
            pending_id: None,
            timeout: 0,
            ledger,
            code,
            flags: TransferFlags::default(),
            timestamp: 0,
            pending_status: PendingStatus::None,
        }
    }

    /// A transfer that reserves funds until posted, voided or timed out.
    pub fn pending(
        id: Id,
        debit: Id,
        credit: Id,
        amount: u64,
        timeout: u64,
        ledger: u32,
        code: u16,
    ) -> Self {
        Self {
            timeout,
            flags: TransferFlags {
                pending: true,
                ..TransferFlags::default()
            },
            ..Self::posted(id, debit, credit, amount, ledger, code)
        }
    }

    /// Posts `amount` of a pending transfer. Accounts, ledger and code are
    /// inherited from the pending transfer when left zero.
    pub fn post_pending(id: Id, pending_id: Id, debit: Id, amount: u64) -> Self {
        Self {
            pending_id: Some(pending_id),
            flags: TransferFlags {
                post_pending: true,
                ..TransferFlags::default()
            },
            ..Self::posted(id, debit, Id::ZERO, amount, 0, 0)
        }
    }

    /// Releases a pending transfer in full.
    pub fn void_pending(id: Id, pending_id: Id) -> Self {
        Self {
            pending_id: Some(pending_id),
            flags: TransferFlags {
                void_pending: true,
                ..TransferFlags::default()
            },
            ..Self::posted(id, Id::ZERO, Id::ZERO, 0, 0, 0)
        }
    }

    /// Ledger time after which a pending transfer can no longer be posted.
    pub fn deadline(&self) -> Option<u64> {
        if self.flags.pending && self.timeout > 0 {
            Some(self.timestamp.saturating_add(self.timeout))
        } else {
            None
        }
    }

    /// Unresolved and, as of ledger time `now`, not past its deadline.
    pub fn is_live_hold(&self, now: u64) -> bool {
        self.flags.pending
            && self.pending_status == PendingStatus::Pending
            && self.deadline().is_none_or(|deadline| now < deadline)
    }

    /// Unresolved but past its deadline: waiting for someone to void it.
    pub fn is_expired_hold(&self, now: u64) -> bool {
        self.flags.pending
            && self.pending_status == PendingStatus::Pending
            && self.deadline().is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    IdMustNotBeZero,
    IdMustNotBeIntMax,
    FlagsAreMutuallyExclusive,
    AmountMustNotBeZero,
    AccountsMustBeDifferent,
    DebitAccountNotFound,
    CreditAccountNotFound,
    LedgerMustMatch,
    PendingIdMustBeZero,
    PendingIdRequired,
    PendingTransferNotFound,
    PendingTransferNotPending,
    PendingTransferHasDifferentDebitAccount,
    PendingTransferHasDifferentCreditAccount,
    ExceedsPendingTransferAmount,
    PendingTransferAlreadyPosted,
    PendingTransferAlreadyVoided,
    PendingTransferExpired,
    TimeoutReservedForPendingTransfer,
    ExceedsCredits,
    Overflow,
    Exists,
    ExistsWithDifferentFields,
}

impl RejectReason {
    /// The referenced pending transfer reached a terminal state through
    /// another transfer.
    pub fn is_already_resolved(&self) -> bool {
        matches!(
            self,
            RejectReason::PendingTransferAlreadyPosted
                | RejectReason::PendingTransferAlreadyVoided
                | RejectReason::PendingTransferExpired
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::IdMustNotBeZero => "id_must_not_be_zero",
            RejectReason::IdMustNotBeIntMax => "id_must_not_be_int_max",
            RejectReason::FlagsAreMutuallyExclusive => "flags_are_mutually_exclusive",
            RejectReason::AmountMustNotBeZero => "amount_must_not_be_zero",
            RejectReason::AccountsMustBeDifferent => "accounts_must_be_different",
            RejectReason::DebitAccountNotFound => "debit_account_not_found",
            RejectReason::CreditAccountNotFound => "credit_account_not_found",
            RejectReason::LedgerMustMatch => "ledger_must_match",
            RejectReason::PendingIdMustBeZero => "pending_id_must_be_zero",
            RejectReason::PendingIdRequired => "pending_id_required",
            RejectReason::PendingTransferNotFound => "pending_transfer_not_found",
            RejectReason::PendingTransferNotPending => "pending_transfer_not_pending",
            RejectReason::PendingTransferHasDifferentDebitAccount => {
                "pending_transfer_has_different_debit_account"
            }
            RejectReason::PendingTransferHasDifferentCreditAccount => {
                "pending_transfer_has_different_credit_account"
            }
            RejectReason::ExceedsPendingTransferAmount => "exceeds_pending_transfer_amount",
            RejectReason::PendingTransferAlreadyPosted => "pending_transfer_already_posted",
            RejectReason::PendingTransferAlreadyVoided => "pending_transfer_already_voided",
            RejectReason::PendingTransferExpired => "pending_transfer_expired",
            RejectReason::TimeoutReservedForPendingTransfer => {
                "timeout_reserved_for_pending_transfer"
            }
            RejectReason::ExceedsCredits => "exceeds_credits",
            RejectReason::Overflow => "overflow",
            RejectReason::Exists => "exists",
            RejectReason::ExistsWithDifferentFields => "exists_with_different_fields",
        };
        f.write_str(s)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransferOutcome {
    Accepted,
    Rejected(RejectReason),
}
