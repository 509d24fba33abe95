//! Adapters behind the domain ports.

pub mod clock;
pub mod in_memory;
pub mod in_memory_ledger;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
