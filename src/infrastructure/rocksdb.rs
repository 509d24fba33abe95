use crate::domain::flow::{FlowId, FlowOutcome, FlowRecord, StepRecord};
use crate::domain::hold::HoldKey;
use crate::domain::id::Id;
use crate::domain::ports::{FlowJournal, HoldIndex};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Column Family for hold index entries.
pub const CF_HOLDS: &str = "holds";
/// Column Family for flow records.
pub const CF_FLOWS: &str = "flows";

/// A persistent hold index and flow journal backed by RocksDB.
///
/// Each index entry is its own key, `<hold key>\0<sequence>`, so a prefix scan
/// yields the holds of one `(account, amount)` in insertion order. Flow records
/// are stored as JSON under their flow id.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    sequence: Arc<AtomicU64>,
    journal_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("holds" and "flows") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_holds = ColumnFamilyDescriptor::new(CF_HOLDS, Options::default());
        let cf_flows = ColumnFamilyDescriptor::new(CF_FLOWS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_holds, cf_flows])?;

        // Entries already on disk bound the seed from below, so a wall clock
        // that stepped back cannot reorder the index.
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seed = match highest_sequence(&db)? {
            Some(last) => wall.max(last.saturating_add(1)),
            None => wall,
        };

        Ok(Self {
            db: Arc::new(db),
            sequence: Arc::new(AtomicU64::new(seed)),
            journal_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn scan_holds(&self, key: &HoldKey) -> Result<Vec<(Box<[u8]>, Id)>> {
        let cf = self.cf(CF_HOLDS)?;
        let prefix = entry_prefix(key);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (k, v) = item?;
            if !k.starts_with(&prefix) {
                break;
            }
            let bytes: [u8; 16] = v.as_ref().try_into().map_err(|_| {
                PaymentError::IndexError(format!("corrupt hold entry under {}", key))
            })?;
            entries.push((k, Id::new(u128::from_be_bytes(bytes))));
        }
        Ok(entries)
    }

    fn load_flow(&self, id: &FlowId) -> Result<Option<FlowRecord>> {
        let cf = self.cf(CF_FLOWS)?;
        match self.db.get_cf(cf, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_flow(&self, record: &FlowRecord) -> Result<()> {
        let cf = self.cf(CF_FLOWS)?;
        let value = serde_json::to_vec(record)?;
        self.db.put_cf(cf, record.id.as_str().as_bytes(), value)?;
        Ok(())
    }

    fn insert_flow(&self, record: FlowRecord) -> Result<FlowRecord> {
        let _guard = self
            .journal_lock
            .lock()
            .map_err(|_| PaymentError::internal("journal lock poisoned"))?;
        if let Some(existing) = self.load_flow(&record.id)? {
            return Ok(existing);
        }
        self.save_flow(&record)?;
        Ok(record)
    }

    /// Read-modify-write of one flow record. The guard is never held across an await.
    fn update_flow<T>(
        &self,
        id: &FlowId,
        apply: impl FnOnce(&mut FlowRecord) -> Result<T>,
    ) -> Result<T> {
        let _guard = self
            .journal_lock
            .lock()
            .map_err(|_| PaymentError::internal("journal lock poisoned"))?;
        let mut record = self.load_flow(id)?.ok_or_else(|| {
            PaymentError::internal(format!("flow {} was never started", id))
        })?;
        let result = apply(&mut record)?;
        self.save_flow(&record)?;
        Ok(result)
    }
}

/// Largest sequence number of any index entry, read from the key suffixes.
fn highest_sequence(db: &DB) -> Result<Option<u64>> {
    let cf = db.cf_handle(CF_HOLDS).ok_or_else(|| {
        PaymentError::internal(format!("{} column family not found", CF_HOLDS))
    })?;
    let mut highest = None;
    for item in db.iterator_cf(cf, IteratorMode::Start) {
        let (k, _) = item?;
        let Some(suffix) = k.len().checked_sub(8).map(|at| &k[at..]) else {
            continue;
        };
        let seq = u64::from_be_bytes(suffix.try_into().unwrap_or([0; 8]));
        highest = Some(highest.map_or(seq, |h: u64| h.max(seq)));
    }
    Ok(highest)
}

fn entry_prefix(key: &HoldKey) -> Vec<u8> {
    let mut prefix = key.to_string().into_bytes();
    prefix.push(0);
    prefix
}

#[async_trait]
impl HoldIndex for RocksDBStore {
    async fn append(&self, key: &HoldKey, hold_id: Id) -> Result<()> {
        let cf = self.cf(CF_HOLDS)?;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut entry = entry_prefix(key);
        entry.extend_from_slice(&seq.to_be_bytes());
        self.db
            .put_cf(cf, entry, hold_id.value().to_be_bytes())?;
        Ok(())
    }

    async fn list(&self, key: &HoldKey) -> Result<Vec<Id>> {
        Ok(self
            .scan_holds(key)?
            .into_iter()
            .map(|(_, id)| id)
            .collect())
    }

    async fn remove(&self, key: &HoldKey, hold_id: Id) -> Result<()> {
        let entry = self
            .scan_holds(key)?
            .into_iter()
            .find(|(_, id)| *id == hold_id);
        if let Some((entry_key, _)) = entry {
            let cf = self.cf(CF_HOLDS)?;
            self.db.delete_cf(cf, entry_key)?;
        }
        Ok(())
    }
}

#[async_trait]
impl FlowJournal for RocksDBStore {
    async fn start(&self, record: FlowRecord) -> Result<FlowRecord> {
        self.insert_flow(record)
    }

    async fn get(&self, id: &FlowId) -> Result<Option<FlowRecord>> {
        self.load_flow(id)
    }

    async fn record_step(&self, id: &FlowId, seq: usize, step: StepRecord) -> Result<StepRecord> {
        self.update_flow(id, |record| record.record_step(seq, step))
    }

    async fn complete(&self, id: &FlowId, outcome: FlowOutcome) -> Result<FlowOutcome> {
        self.update_flow(id, |record| Ok(record.complete(outcome)))
    }

    async fn incomplete(&self) -> Result<Vec<FlowRecord>> {
        let cf = self.cf(CF_FLOWS)?;
        let mut pending = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let record: FlowRecord = serde_json::from_slice(&value)?;
            if !record.is_complete() {
                pending.push(record);
            }
        }
        Ok(pending)
    }
}
