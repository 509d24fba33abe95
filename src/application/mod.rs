//! Application layer: the authorization activities, the flows that sequence
//! them, and the service callers talk to.
//!
//! `PaymentService` validates requests and hands them to the `Orchestrator`,
//! which runs each flow as a journaled sequence of `Activities` wrapped in a
//! `RetryPolicy`. The `RecoveryWorker` resumes flows a crash left behind.

pub mod activities;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod service;
