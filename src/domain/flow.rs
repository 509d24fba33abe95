use super::id::Id;
use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one flow execution. Re-running the same id never repeats its effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Result<Self, PaymentError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed.len() > 128 {
            return Err(PaymentError::ValidationError(
                "Flow id must be 1 to 128 characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The expiry flow of a hold is keyed by the hold, so scheduling it twice is harmless.
    pub fn for_expiry(hold_id: Id) -> Self {
        Self(format!("expire-{}", hold_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Authorize,
    Present,
    Expire,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowKind::Authorize => "authorize",
            FlowKind::Present => "present",
            FlowKind::Expire => "expire",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowInput {
    Authorize { account: Id, amount: u64 },
    Present { account: Id, amount: u64 },
    Expire { hold_id: Id },
}

impl FlowInput {
    pub fn kind(&self) -> FlowKind {
        match self {
            FlowInput::Authorize { .. } => FlowKind::Authorize,
            FlowInput::Present { .. } => FlowKind::Present,
            FlowInput::Expire { .. } => FlowKind::Expire,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    InsufficientBalance,
    AccountNotFound,
    NoMatchingHold,
}

/// Terminal result of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlowOutcome {
    Authorized { hold_id: Id },
    Captured { hold_id: Id },
    Expired { hold_id: Id },
    NoOp,
    Declined { reason: DeclineReason },
}

/// One journaled activity result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub result: serde_json::Value,
}

/// The durable history of a flow: its input, completed steps and, once
/// finished, its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub id: FlowId,
    pub input: FlowInput,
    pub steps: Vec<StepRecord>,
    pub outcome: Option<FlowOutcome>,
}

impl FlowRecord {
    pub fn new(id: FlowId, input: FlowInput) -> Self {
        Self {
            id,
            input,
            steps: Vec::new(),
            outcome: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    /// Applies first-writer-wins to step `seq` and returns the canonical record.
    pub fn record_step(&mut self, seq: usize, step: StepRecord) -> Result<StepRecord, PaymentError> {
        match seq.cmp(&self.steps.len()) {
            std::cmp::Ordering::Less => Ok(self.steps[seq].clone()),
            std::cmp::Ordering::Equal => {
                self.steps.push(step.clone());
                Ok(step)
            }
            std::cmp::Ordering::Greater => Err(PaymentError::internal(format!(
                "flow {} has {} steps, cannot record step {}",
                self.id,
                self.steps.len(),
                seq
            ))),
        }
    }

    /// Applies first-writer-wins to the outcome and returns the canonical one.
    pub fn complete(&mut self, outcome: FlowOutcome) -> FlowOutcome {
        self.outcome.get_or_insert(outcome).clone()
    }
}
