//! Tempo - durable step interpreter for tenant-authored workflows
//!
//! A workflow definition is a flat list of typed steps executed with a
//! program counter and explicit jumps. Executions suspend durably on task
//! completion, approvals, and timers, and resume from a persisted snapshot
//! without repeating side effects.

pub mod adapter;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod executor;
pub mod store;
pub mod types;
pub mod worker;

// Re-export main types
pub use types::*;

pub use adapter::{ExternalOperations, SetStatusOptions};
pub use config::Config;
pub use executor::{Control, StepError, VM};
pub use store::{ExecutionStore, QueuedSignal};
pub use worker::{RunStatus, Runner, RunnerError, Worker};
