use super::activities::{
    Activities, BalanceCheck, HoldPlacement, MatchOutcome, PostOutcome, VoidOutcome,
};
use super::retry::RetryPolicy;
use crate::domain::flow::{
    DeclineReason, FlowId, FlowInput, FlowOutcome, FlowRecord, StepRecord,
};
use crate::domain::hold::{HoldSnapshot, HoldState};
use crate::domain::id::Id;
use crate::domain::ports::{FlowJournal, FlowJournalRef};
use crate::error::{PaymentError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Credit side of every hold.
    pub settlement_account: Id,
    /// Lost capture races one presentment tolerates before giving up with a
    /// retryable error.
    pub max_rematch_attempts: usize,
    /// How often the expire flow re-reads the ledger clock while waiting.
    pub expiry_poll: Duration,
}

/// Replays journaled steps and records new ones.
///
/// Steps are addressed by position. A replayed step whose name differs from
/// the one the flow asks for means the flow's code changed under a running
/// execution, which is reported instead of guessed around.
struct FlowContext<'a> {
    journal: &'a dyn FlowJournal,
    retry: &'a RetryPolicy,
    record: FlowRecord,
    seq: usize,
}

impl<'a> FlowContext<'a> {
    fn new(journal: &'a dyn FlowJournal, retry: &'a RetryPolicy, record: FlowRecord) -> Self {
        Self {
            journal,
            retry,
            record,
            seq: 0,
        }
    }

    fn replay<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>> {
        let Some(step) = self.record.steps.get(self.seq) else {
            return Ok(None);
        };
        if step.name != name {
            return Err(PaymentError::NonDeterministicFlow {
                flow_id: self.record.id.to_string(),
                seq: self.seq,
                expected: step.name.clone(),
                found: name.to_string(),
            });
        }
        let value = serde_json::from_value(step.result.clone())?;
        debug!(flow_id = %self.record.id, seq = self.seq, step = name, "step replayed");
        self.seq += 1;
        Ok(Some(value))
    }

    /// Whether the next step will be answered from the journal.
    fn replaying(&self) -> bool {
        self.seq < self.record.steps.len()
    }

    /// Journals `value` at the current position and continues with whatever
    /// the journal kept, which is another runner's value if it got there first.
    async fn commit<T: Serialize + DeserializeOwned>(&mut self, name: &str, value: T) -> Result<T> {
        let step = StepRecord {
            name: name.to_string(),
            result: serde_json::to_value(&value)?,
        };
        let journal = self.journal;
        let id = &self.record.id;
        let seq = self.seq;
        let pending = &step;
        let canonical = self
            .retry
            .run("journal_record_step", move || {
                journal.record_step(id, seq, pending.clone())
            })
            .await?;
        if canonical.name != name {
            return Err(PaymentError::NonDeterministicFlow {
                flow_id: id.to_string(),
                seq,
                expected: canonical.name,
                found: name.to_string(),
            });
        }
        let adopted = canonical.result != step.result;
        let value = if adopted {
            debug!(flow_id = %id, seq, step = name, "adopted step recorded by a concurrent run");
            serde_json::from_value(canonical.result)?
        } else {
            value
        };
        self.record.steps.push(StepRecord {
            name: name.to_string(),
            result: serde_json::to_value(&value)?,
        });
        self.seq += 1;
        Ok(value)
    }

    /// An activity call, retried per policy and journaled once it succeeds.
    async fn step<T, F, Fut>(&mut self, name: &str, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.replay(name)? {
            return Ok(value);
        }
        let value = self.retry.run(name, op).await?;
        self.commit(name, value).await
    }

    /// A local decision, such as minting an id, journaled so replays reuse it.
    async fn local<T, F>(&mut self, name: &str, decide: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.replay(name)? {
            return Ok(value);
        }
        self.commit(name, decide()).await
    }
}

type ActiveFlows = Arc<Mutex<HashMap<FlowId, usize>>>;

/// Marks a flow as running in this process for as long as it lives.
struct ActiveGuard {
    active: ActiveFlows,
    id: FlowId,
}

impl ActiveGuard {
    fn new(active: &ActiveFlows, id: &FlowId) -> Self {
        if let Ok(mut map) = active.lock() {
            *map.entry(id.clone()).or_insert(0) += 1;
        }
        Self {
            active: active.clone(),
            id: id.clone(),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.active.lock()
            && let Some(count) = map.get_mut(&self.id)
        {
            *count -= 1;
            if *count == 0 {
                map.remove(&self.id);
            }
        }
    }
}

/// Runs the authorize, present and expire flows.
///
/// Each flow is a durable sequence of activities. Every step is journaled, so
/// running a flow id again replays what already happened and resumes at the
/// first step without a record; a finished flow just returns its outcome.
pub struct Orchestrator {
    activities: Arc<Activities>,
    journal: FlowJournalRef,
    retry: RetryPolicy,
    settings: FlowSettings,
    active: ActiveFlows,
}

impl Orchestrator {
    pub fn new(
        activities: Arc<Activities>,
        journal: FlowJournalRef,
        retry: RetryPolicy,
        settings: FlowSettings,
    ) -> Self {
        Self {
            activities,
            journal,
            retry,
            settings,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn activities(&self) -> &Activities {
        &self.activities
    }

    pub async fn authorize(&self, flow_id: FlowId, account: Id, amount: u64) -> Result<FlowOutcome> {
        self.run(flow_id, FlowInput::Authorize { account, amount })
            .await
    }

    pub async fn present(&self, flow_id: FlowId, account: Id, amount: u64) -> Result<FlowOutcome> {
        self.run(flow_id, FlowInput::Present { account, amount })
            .await
    }

    pub async fn expire(&self, hold_id: Id) -> Result<FlowOutcome> {
        self.run(FlowId::for_expiry(hold_id), FlowInput::Expire { hold_id })
            .await
    }

    /// Whether a flow with this id is currently executing in this process.
    pub fn is_active(&self, flow_id: &FlowId) -> bool {
        self.active
            .lock()
            .map(|map| map.contains_key(flow_id))
            .unwrap_or(false)
    }

    pub fn journal(&self) -> &FlowJournalRef {
        &self.journal
    }

    /// Starts or resumes `flow_id`.
    ///
    /// Fails with `FlowConflict` if the id was first used with another input.
    pub async fn run(&self, flow_id: FlowId, input: FlowInput) -> Result<FlowOutcome> {
        let journal = self.journal.as_ref();
        let fresh = &FlowRecord::new(flow_id.clone(), input.clone());
        let record = self
            .retry
            .run("journal_start", move || journal.start(fresh.clone()))
            .await?;

        if record.input != input {
            return Err(PaymentError::FlowConflict(flow_id.to_string()));
        }
        if let Some(outcome) = record.outcome {
            debug!(flow_id = %flow_id, ?outcome, "flow already complete");
            return Ok(outcome);
        }

        let _guard = ActiveGuard::new(&self.active, &flow_id);
        let resumed = !record.steps.is_empty();
        info!(flow_id = %flow_id, kind = %input.kind(), resumed, "flow started");

        let mut ctx = FlowContext::new(journal, &self.retry, record);
        let outcome = match input {
            FlowInput::Authorize { account, amount } => {
                self.authorize_flow(&mut ctx, account, amount).await?
            }
            FlowInput::Present { account, amount } => {
                self.present_flow(&mut ctx, account, amount).await?
            }
            FlowInput::Expire { hold_id } => self.expire_flow(&mut ctx, hold_id).await?,
        };

        let (id, result) = (&flow_id, &outcome);
        let outcome = self
            .retry
            .run("journal_complete", move || journal.complete(id, result.clone()))
            .await?;
        info!(flow_id = %flow_id, ?outcome, "flow completed");
        Ok(outcome)
    }

    async fn authorize_flow(
        &self,
        ctx: &mut FlowContext<'_>,
        account: Id,
        amount: u64,
    ) -> Result<FlowOutcome> {
        let activities = self.activities.as_ref();
        let journal = self.journal.as_ref();
        let settlement = self.settings.settlement_account;

        let check = ctx
            .step("check_balance", move || {
                activities.check_balance(account, amount)
            })
            .await?;
        match check {
            BalanceCheck::Sufficient { .. } => {}
            BalanceCheck::Insufficient { .. } => {
                return Ok(declined(DeclineReason::InsufficientBalance));
            }
            BalanceCheck::AccountNotFound => return Ok(declined(DeclineReason::AccountNotFound)),
        }

        let hold_id: Id = ctx.local("allocate_hold_id", Id::generate).await?;
        let placement = ctx
            .step("place_hold", move || {
                activities.place_hold(hold_id, account, settlement, amount)
            })
            .await?;
        match placement {
            HoldPlacement::Placed { .. } => {}
            HoldPlacement::InsufficientBalance => {
                return Ok(declined(DeclineReason::InsufficientBalance));
            }
            HoldPlacement::AccountNotFound => return Ok(declined(DeclineReason::AccountNotFound)),
        }

        // Recorded in the journal so recovery resumes the expiry even if the
        // caller never spawns it.
        ctx.step("schedule_expiry", move || async move {
            let expiry = FlowRecord::new(FlowId::for_expiry(hold_id), FlowInput::Expire { hold_id });
            journal.start(expiry).await.map(|_| ())
        })
        .await?;

        Ok(FlowOutcome::Authorized { hold_id })
    }

    async fn present_flow(
        &self,
        ctx: &mut FlowContext<'_>,
        account: Id,
        amount: u64,
    ) -> Result<FlowOutcome> {
        let activities = self.activities.as_ref();

        let exists = ctx
            .step("verify_account", move || activities.verify_account(account))
            .await?;
        if !exists {
            return Ok(declined(DeclineReason::AccountNotFound));
        }

        // Every lost race leaves the contested hold resolved, so the next match
        // sees one candidate fewer. Only `NoMatch` means nothing live is left.
        let mut lost_races = 0;
        loop {
            let matched = ctx
                .step("match_presentment", move || {
                    activities.match_presentment(account, amount)
                })
                .await?;
            let hold_id = match matched {
                MatchOutcome::Matched { hold_id } => hold_id,
                MatchOutcome::NoMatch => return Ok(declined(DeclineReason::NoMatchingHold)),
            };

            let post_id: Id = ctx.local("allocate_post_id", Id::generate).await?;
            let live = !ctx.replaying();
            let posted = ctx
                .step("post_hold", move || {
                    activities.post_hold(post_id, hold_id, account, amount)
                })
                .await?;
            match posted {
                PostOutcome::Posted => return Ok(FlowOutcome::Captured { hold_id }),
                PostOutcome::AlreadyResolved if live => {
                    lost_races += 1;
                    if lost_races > self.settings.max_rematch_attempts {
                        return Err(PaymentError::ContentionError(format!(
                            "flow {} lost {} capture races",
                            ctx.record.id, lost_races
                        )));
                    }
                    warn!(flow_id = %ctx.record.id, hold_id = %hold_id, lost_races, "lost race for hold, re-matching");
                }
                PostOutcome::AlreadyResolved => {}
            }
        }
    }

    async fn expire_flow(&self, ctx: &mut FlowContext<'_>, hold_id: Id) -> Result<FlowOutcome> {
        let activities = self.activities.as_ref();

        let snapshot: Option<HoldSnapshot> = ctx
            .step("load_hold", move || activities.load_hold(hold_id))
            .await?;
        let Some(snapshot) = snapshot else {
            return Ok(FlowOutcome::NoOp);
        };
        if snapshot.state != HoldState::Placed {
            debug!(hold_id = %hold_id, state = ?snapshot.state, "hold already resolved");
            return Ok(FlowOutcome::NoOp);
        }

        if let Some(deadline) = snapshot.deadline {
            self.wait_for_ledger_time(deadline).await?;
        }

        let pending = ctx
            .step("is_still_pending", move || {
                activities.is_still_pending(hold_id)
            })
            .await?;
        if !pending {
            return Ok(FlowOutcome::NoOp);
        }

        let void_id: Id = ctx.local("allocate_void_id", Id::generate).await?;
        let voided = ctx
            .step("void_hold", move || activities.void_hold(void_id, hold_id))
            .await?;
        let key = snapshot.key;
        ctx.step("release_index_entry", move || {
            activities.release_index_entry(key, hold_id)
        })
        .await?;

        Ok(match voided {
            VoidOutcome::Voided => FlowOutcome::Expired { hold_id },
            VoidOutcome::AlreadyResolved => FlowOutcome::NoOp,
        })
    }

    /// Sleeps until the ledger clock reaches `deadline`. Not journaled: once
    /// the deadline has passed a replay returns immediately.
    async fn wait_for_ledger_time(&self, deadline: u64) -> Result<()> {
        let activities = self.activities.as_ref();
        loop {
            let now = self
                .retry
                .run("ledger_time", move || activities.ledger_time())
                .await?;
            if now >= deadline {
                return Ok(());
            }
            let remaining = Duration::from_nanos(deadline - now);
            tokio::time::sleep(remaining.min(self.settings.expiry_poll)).await;
        }
    }
}

fn declined(reason: DeclineReason) -> FlowOutcome {
    FlowOutcome::Declined { reason }
}
