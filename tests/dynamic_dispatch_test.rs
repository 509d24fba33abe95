use holdfast::domain::flow::{FlowId, FlowInput, FlowOutcome, FlowRecord};
use holdfast::domain::hold::HoldKey;
use holdfast::domain::id::Id;
use holdfast::domain::ports::{
    FlowJournal, FlowJournalRef, HoldIndex, HoldIndexRef, Ledger, LedgerRef,
};
use holdfast::infrastructure::in_memory::{InMemoryFlowJournal, InMemoryHoldIndex};
use holdfast::infrastructure::in_memory_ledger::InMemoryLedger;
use std::sync::Arc;

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let ledger: LedgerRef = Arc::new(InMemoryLedger::new());
    let index: HoldIndexRef = Arc::new(InMemoryHoldIndex::new());
    let journal: FlowJournalRef = Arc::new(InMemoryFlowJournal::new());

    // Verify Send + Sync by spawning tasks
    let ledger_handle = tokio::spawn(async move { ledger.now().await.unwrap() });

    let index_handle = tokio::spawn(async move {
        let key = HoldKey::new(Id::new(1), 10);
        index.append(&key, Id::new(2)).await.unwrap();
        index.list(&key).await.unwrap()
    });

    let journal_handle = tokio::spawn(async move {
        let id = FlowId::new("f-1").unwrap();
        journal
            .start(FlowRecord::new(id.clone(), FlowInput::Expire { hold_id: Id::new(2) }))
            .await
            .unwrap();
        journal.complete(&id, FlowOutcome::NoOp).await.unwrap()
    });

    assert!(ledger_handle.await.unwrap() > 0);
    assert_eq!(index_handle.await.unwrap(), vec![Id::new(2)]);
    assert_eq!(journal_handle.await.unwrap(), FlowOutcome::NoOp);
}
