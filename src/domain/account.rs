use super::id::Id;
use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A positive amount in minor units.
///
/// Request amounts are validated through this type before any flow starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    pub fn new(value: u64) -> Result<Self, PaymentError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = PaymentError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
pub struct AccountFlags {
    /// Rejects any transfer that would push posted plus pending debits above posted credits.
    pub debits_must_not_exceed_credits: bool,
}

/// A ledger account.
///
/// Balances are owned by the ledger; the coordinator only reads them and
/// changes them by submitting transfers.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Account {
    pub id: Id,
    pub ledger: u32,
    pub code: u16,
    pub flags: AccountFlags,
    pub debits_pending: u64,
    pub debits_posted: u64,
    pub credits_pending: u64,
    pub credits_posted: u64,
    /// Assigned by the ledger on creation.
    pub timestamp: u64,
}

impl Account {
    pub fn new(id: Id, ledger: u32, code: u16) -> Self {
        Self {
            id,
            ledger,
            code,
            flags: AccountFlags::default(),
            debits_pending: 0,
            debits_posted: 0,
            credits_pending: 0,
            credits_posted: 0,
            timestamp: 0,
        }
    }

    pub fn with_flags(mut self, flags: AccountFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Funds that can still be held or spent: posted credits minus posted and
    /// pending debits.
    pub fn available(&self) -> u64 {
        self.credits_posted
            .saturating_sub(self.debits_posted)
            .saturating_sub(self.debits_pending)
    }

    /// Whether a resubmission carries the same caller-supplied fields.
    pub fn same_definition(&self, other: &Account) -> bool {
        self.id == other.id
            && self.ledger == other.ledger
            && self.code == other.code
            && self.flags == other.flags
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum AccountRejectReason {
    IdMustNotBeZero,
    IdMustNotBeIntMax,
    LedgerMustNotBeZero,
    CodeMustNotBeZero,
    BalancesMustBeZero,
    Exists,
    ExistsWithDifferentFields,
}

impl fmt::Display for AccountRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountRejectReason::IdMustNotBeZero => "id_must_not_be_zero",
            AccountRejectReason::IdMustNotBeIntMax => "id_must_not_be_int_max",
            AccountRejectReason::LedgerMustNotBeZero => "ledger_must_not_be_zero",
            AccountRejectReason::CodeMustNotBeZero => "code_must_not_be_zero",
            AccountRejectReason::BalancesMustBeZero => "balances_must_be_zero",
            AccountRejectReason::Exists => "exists",
            AccountRejectReason::ExistsWithDifferentFields => "exists_with_different_fields",
        };
        f.write_str(s)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AccountOutcome {
    Accepted,
    Rejected(AccountRejectReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_available_subtracts_pending_debits() {
        let mut account = Account::new(Id::new(1), 1, 1);
        account.credits_posted = 1000;
        account.debits_pending = 300;
        assert_eq!(account.available(), 700);

        account.debits_posted = 300;
        account.debits_pending = 0;
        assert_eq!(account.available(), 700);
    }

    #[test]
    fn test_available_never_underflows() {
        let mut account = Account::new(Id::new(1), 1, 1);
        account.debits_posted = 50;
        assert_eq!(account.available(), 0);
    }

    #[test]
    fn test_same_definition_ignores_balances() {
        let a = Account::new(Id::new(1), 1, 1);
        let mut b = a.clone();
        b.credits_posted = 10;
        b.timestamp = 99;
        assert!(a.same_definition(&b));

        let c = a.clone().with_flags(AccountFlags {
            debits_must_not_exceed_credits: true,
        });
        assert!(!a.same_definition(&c));
    }
}
