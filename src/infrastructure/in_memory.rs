use crate::domain::flow::{FlowId, FlowOutcome, FlowRecord, StepRecord};
use crate::domain::hold::HoldKey;
use crate::domain::id::Id;
use crate::domain::ports::{FlowJournal, HoldIndex};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory hold index.
///
/// Uses `Arc<RwLock<HashMap<HoldKey, Vec<Id>>>>`; each list keeps insertion
/// order so the oldest hold for a key is matched first.
#[derive(Default, Clone)]
pub struct InMemoryHoldIndex {
    holds: Arc<RwLock<HashMap<HoldKey, Vec<Id>>>>,
}

impl InMemoryHoldIndex {
    /// Creates a new, empty hold index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HoldIndex for InMemoryHoldIndex {
    async fn append(&self, key: &HoldKey, hold_id: Id) -> Result<()> {
        let mut holds = self.holds.write().await;
        holds.entry(*key).or_default().push(hold_id);
        Ok(())
    }

    async fn list(&self, key: &HoldKey) -> Result<Vec<Id>> {
        let holds = self.holds.read().await;
        Ok(holds.get(key).cloned().unwrap_or_default())
    }

    async fn remove(&self, key: &HoldKey, hold_id: Id) -> Result<()> {
        let mut holds = self.holds.write().await;
        if let Some(ids) = holds.get_mut(key) {
            if let Some(pos) = ids.iter().position(|id| *id == hold_id) {
                ids.remove(pos);
            }
            if ids.is_empty() {
                holds.remove(key);
            }
        }
        Ok(())
    }
}

/// A thread-safe in-memory flow journal.
///
/// Uses `Arc<RwLock<HashMap<FlowId, FlowRecord>>>`. Every mutation happens under
/// the write lock, which is what makes step recording first-writer-wins.
#[derive(Default, Clone)]
pub struct InMemoryFlowJournal {
    flows: Arc<RwLock<HashMap<FlowId, FlowRecord>>>,
}

impl InMemoryFlowJournal {
    /// Creates a new, empty flow journal.
    pub fn new() -> Self {
        Self::default()
    }
}

fn unknown_flow(id: &FlowId) -> PaymentError {
    PaymentError::internal(format!("flow {} was never started", id))
}

#[async_trait]
impl FlowJournal for InMemoryFlowJournal {
    async fn start(&self, record: FlowRecord) -> Result<FlowRecord> {
        let mut flows = self.flows.write().await;
        Ok(flows.entry(record.id.clone()).or_insert(record).clone())
    }

    async fn get(&self, id: &FlowId) -> Result<Option<FlowRecord>> {
        let flows = self.flows.read().await;
        Ok(flows.get(id).cloned())
    }

    async fn record_step(&self, id: &FlowId, seq: usize, step: StepRecord) -> Result<StepRecord> {
        let mut flows = self.flows.write().await;
        let record = flows.get_mut(id).ok_or_else(|| unknown_flow(id))?;
        record.record_step(seq, step)
    }

    async fn complete(&self, id: &FlowId, outcome: FlowOutcome) -> Result<FlowOutcome> {
        let mut flows = self.flows.write().await;
        let record = flows.get_mut(id).ok_or_else(|| unknown_flow(id))?;
        Ok(record.complete(outcome))
    }

    async fn incomplete(&self) -> Result<Vec<FlowRecord>> {
        let flows = self.flows.read().await;
        let mut pending: Vec<FlowRecord> = flows
            .values()
            .filter(|r| !r.is_complete())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pending)
    }
}
