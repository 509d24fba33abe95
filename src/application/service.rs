use super::activities::Activities;
use super::orchestrator::Orchestrator;
use super::recovery::{RecoveryConfig, RecoveryWorker};
use super::retry::RetryPolicy;
use crate::config::AppConfig;
use crate::domain::account::{Account, AccountFlags, AccountOutcome, AccountRejectReason, Amount};
use crate::domain::flow::{FlowId, FlowOutcome};
use crate::domain::id::Id;
use crate::domain::ports::{FlowJournalRef, HoldIndexRef, LedgerRef};
use crate::domain::transfer::{PendingStatus, RejectReason, Transfer, TransferOutcome};
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub authorized: bool,
    pub flow_id: FlowId,
    pub hold_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentResponse {
    pub matched: bool,
    pub flow_id: FlowId,
    pub hold_id: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub debits_posted: u64,
    pub credits_posted: u64,
    pub debits_pending: u64,
    pub credits_pending: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableBalanceResponse {
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Posted,
    Pending,
    PostPending,
    VoidPending,
}

/// A transfer as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferView {
    pub id: Id,
    pub kind: TransferKind,
    pub debit_account_id: Id,
    pub credit_account_id: Id,
    pub amount: u64,
    pub pending_id: Option<Id>,
    pub timeout: u64,
    pub timestamp: u64,
    pub pending_status: PendingStatus,
}

impl From<Transfer> for TransferView {
    fn from(transfer: Transfer) -> Self {
        let kind = if transfer.flags.pending {
            TransferKind::Pending
        } else if transfer.flags.post_pending {
            TransferKind::PostPending
        } else if transfer.flags.void_pending {
            TransferKind::VoidPending
        } else {
            TransferKind::Posted
        };
        Self {
            id: transfer.id,
            kind,
            debit_account_id: transfer.debit_account_id,
            credit_account_id: transfer.credit_account_id,
            amount: transfer.amount,
            pending_id: transfer.pending_id,
            timeout: transfer.timeout,
            timestamp: transfer.timestamp,
            pending_status: transfer.pending_status,
        }
    }
}

/// The request surface of the coordinator.
///
/// `PaymentService` validates requests, starts flows on the orchestrator and
/// answers balance queries directly from the ledger. Expire flows for new holds
/// are started in the background.
pub struct PaymentService {
    ledger: LedgerRef,
    orchestrator: Arc<Orchestrator>,
    retry: RetryPolicy,
    config: AppConfig,
}

impl PaymentService {
    /// Creates a new `PaymentService` instance.
    ///
    /// # Arguments
    ///
    /// * `ledger` - The ledger holding accounts and transfers.
    /// * `index` - The pending-hold index.
    /// * `journal` - The durable flow journal.
    /// * `config` - Ledger coordinates, hold policy and retry policy.
    pub fn new(
        ledger: LedgerRef,
        index: HoldIndexRef,
        journal: FlowJournalRef,
        config: AppConfig,
    ) -> Self {
        let retry = config.retry.policy();
        let activities = Activities::new(ledger.clone(), index, config.ledger_settings());
        let orchestrator = Orchestrator::new(
            Arc::new(activities),
            journal,
            retry.clone(),
            config.flow_settings(),
        );
        Self {
            ledger,
            orchestrator: Arc::new(orchestrator),
            retry,
            config,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// A worker that keeps resuming incomplete flows until dropped.
    pub fn recovery_worker(&self, config: RecoveryConfig) -> RecoveryWorker {
        RecoveryWorker::new(self.orchestrator.clone(), config)
    }

    /// Resumes incomplete flows once, in the background. Returns how many were resumed.
    pub async fn recover(&self) -> Result<usize> {
        let resumed = self
            .recovery_worker(RecoveryConfig::default())
            .scan_and_recover()
            .await?;
        Ok(resumed.len())
    }

    /// Creates the settlement and funding accounts if they do not exist yet.
    pub async fn ensure_system_accounts(&self) -> Result<()> {
        for id in [
            self.config.ledger.settlement_account,
            self.config.ledger.funding_account,
        ] {
            let account = Account::new(id, self.config.ledger.ledger_id, self.config.ledger.account_code);
            self.create_account(account).await?;
        }
        Ok(())
    }

    /// Opens a customer account that can never be overdrawn, holds included.
    /// Opening the same account twice is not an error.
    pub async fn open_account(&self, account: &str) -> Result<Id> {
        let id: Id = account.parse()?;
        let account = Account::new(id, self.config.ledger.ledger_id, self.config.ledger.account_code)
            .with_flags(AccountFlags {
                debits_must_not_exceed_credits: true,
            });
        self.create_account(account).await?;
        info!(account = %id, "account opened");
        Ok(id)
    }

    async fn create_account(&self, account: Account) -> Result<()> {
        let id = account.id;
        let ledger = self.ledger.as_ref();
        let account = &account;
        let outcome = self
            .retry
            .run("create_account", move || ledger.create_account(account.clone()))
            .await?;
        match outcome {
            AccountOutcome::Accepted | AccountOutcome::Rejected(AccountRejectReason::Exists) => {
                Ok(())
            }
            AccountOutcome::Rejected(AccountRejectReason::ExistsWithDifferentFields) => {
                Err(PaymentError::DuplicateAccount(id))
            }
            AccountOutcome::Rejected(reason) => Err(PaymentError::ValidationError(format!(
                "account {} rejected: {}",
                id, reason
            ))),
        }
    }

    /// Moves `amount` from `debit` to `credit` immediately.
    pub async fn transfer(&self, debit: &str, credit: &str, amount: u64) -> Result<Id> {
        let debit: Id = debit.parse()?;
        let credit: Id = credit.parse()?;
        let amount = Amount::new(amount)?;
        self.post_transfer(debit, credit, amount).await
    }

    /// Credits `account` from the funding account.
    pub async fn fund(&self, account: &str, amount: u64) -> Result<Id> {
        let account: Id = account.parse()?;
        let amount = Amount::new(amount)?;
        self.post_transfer(self.config.ledger.funding_account, account, amount)
            .await
    }

    async fn post_transfer(&self, debit: Id, credit: Id, amount: Amount) -> Result<Id> {
        let transfer = Transfer::posted(
            Id::generate(),
            debit,
            credit,
            amount.value(),
            self.config.ledger.ledger_id,
            self.config.ledger.account_code,
        );
        let id = transfer.id;
        let ledger = self.ledger.as_ref();
        let transfer = &transfer;
        let outcome = self
            .retry
            .run("transfer", move || ledger.create_transfer(transfer.clone()))
            .await?;
        match outcome {
            TransferOutcome::Accepted | TransferOutcome::Rejected(RejectReason::Exists) => {
                debug!(transfer_id = %id, debit = %debit, credit = %credit, amount = amount.value(), "transfer posted");
                Ok(id)
            }
            TransferOutcome::Rejected(reason) => Err(PaymentError::TransferRejected(reason)),
        }
    }

    pub async fn get_transfer(&self, id: &str) -> Result<Option<TransferView>> {
        let id: Id = id.parse()?;
        let found = self.ledger.lookup_transfers(&[id]).await?;
        Ok(found.into_iter().find(|t| t.id == id).map(TransferView::from))
    }

    /// Places a hold of `amount` on `account`.
    ///
    /// Passing the same `flow_id` again returns the first call's answer
    /// without placing a second hold.
    pub async fn authorize(
        &self,
        account: &str,
        amount: u64,
        flow_id: Option<&str>,
    ) -> Result<AuthorizeResponse> {
        let account: Id = account.parse()?;
        let amount = Amount::new(amount)?;
        let flow_id = resolve_flow_id(flow_id)?;

        let outcome = self
            .orchestrator
            .authorize(flow_id.clone(), account, amount.value())
            .await?;
        let hold_id = match outcome {
            FlowOutcome::Authorized { hold_id } => {
                self.spawn_expiry(hold_id);
                Some(hold_id)
            }
            _ => None,
        };
        Ok(AuthorizeResponse {
            authorized: hold_id.is_some(),
            flow_id,
            hold_id,
        })
    }

    /// Captures the oldest live hold of exactly `amount` on `account`.
    pub async fn present(
        &self,
        account: &str,
        amount: u64,
        flow_id: Option<&str>,
    ) -> Result<PresentResponse> {
        let account: Id = account.parse()?;
        let amount = Amount::new(amount)?;
        let flow_id = resolve_flow_id(flow_id)?;

        let outcome = self
            .orchestrator
            .present(flow_id.clone(), account, amount.value())
            .await?;
        let hold_id = match outcome {
            FlowOutcome::Captured { hold_id } => Some(hold_id),
            _ => None,
        };
        Ok(PresentResponse {
            matched: hold_id.is_some(),
            flow_id,
            hold_id,
        })
    }

    pub async fn balance(&self, account: &str) -> Result<BalanceResponse> {
        let account = self.lookup(account).await?;
        Ok(BalanceResponse {
            debits_posted: account.debits_posted,
            credits_posted: account.credits_posted,
            debits_pending: account.debits_pending,
            credits_pending: account.credits_pending,
        })
    }

    /// Posted credits minus posted and pending debits.
    pub async fn available_balance(&self, account: &str) -> Result<AvailableBalanceResponse> {
        let account = self.lookup(account).await?;
        Ok(AvailableBalanceResponse {
            amount: account.available(),
        })
    }

    async fn lookup(&self, account: &str) -> Result<Account> {
        let id: Id = account.parse()?;
        self.ledger
            .lookup_account(id)
            .await?
            .ok_or(PaymentError::AccountNotFound(id))
    }

    fn spawn_expiry(&self, hold_id: Id) {
        if self.orchestrator.is_active(&FlowId::for_expiry(hold_id)) {
            return;
        }
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.expire(hold_id).await {
                error!(hold_id = %hold_id, error = %e, "expire flow failed");
            }
        });
    }
}

fn resolve_flow_id(flow_id: Option<&str>) -> Result<FlowId> {
    match flow_id {
        Some(id) => FlowId::new(id),
        None => Ok(FlowId::generate()),
    }
}
