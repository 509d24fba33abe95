//! Ledger, hold and flow types plus the ports the coordinator talks through.

pub mod account;
pub mod flow;
pub mod hold;
pub mod id;
pub mod ports;
pub mod transfer;
