//! Durable execution store
//!
//! Persists VM snapshots, the per-execution signal inbox, and the operation
//! journal. A suspended execution is fully described by what lives here, so a
//! replacement worker can resume it after the original process died.
//!
//! Activations claim an execution for a lease before stepping it. A claim held
//! by another worker hides the execution from `due_executions` until it is
//! released or its lease runs out.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::adapter::JournalEntry;
use crate::executor::VM;
use crate::types::Signal;

/// A signal in the inbox that has not been acknowledged yet
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSignal {
    pub id: i64,
    pub signal: Signal,
}

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace the snapshot of an execution
    async fn save_context(&self, vm: &VM) -> Result<()>;

    async fn load_context(&self, execution_id: &str) -> Result<Option<VM>>;

    async fn delete_context(&self, execution_id: &str) -> Result<()>;

    /// Queue a signal for delivery at the next activation
    async fn push_signal(&self, execution_id: &str, signal: &Signal) -> Result<()>;

    /// Unacknowledged signals in arrival order
    async fn queued_signals(&self, execution_id: &str) -> Result<Vec<QueuedSignal>>;

    /// Save a snapshot holding delivered signals and acknowledge those signals
    ///
    /// Both happen or neither does, so a delivered signal is always either in
    /// the inbox or in the snapshot.
    async fn save_delivered(&self, vm: &VM, signal_ids: &[i64]) -> Result<()>;

    async fn journal_entry(&self, execution_id: &str, seq: u64) -> Result<Option<JournalEntry>>;

    async fn append_journal(&self, execution_id: &str, entry: &JournalEntry) -> Result<()>;

    async fn clear_journal(&self, execution_id: &str) -> Result<()>;

    /// Unclaimed executions that need an activation: suspended ones whose
    /// timer or deadline has passed or whose awaited signal is in the inbox,
    /// and runnable ones left behind by an interrupted activation
    async fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>>;

    /// Claim an execution for `owner` until `until`
    ///
    /// Succeeds when the execution exists and is unclaimed, its claim expired
    /// at `now`, or `owner` already holds it.
    async fn claim(
        &self,
        execution_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drop `owner`'s claim, if it still holds one
    async fn release(&self, execution_id: &str, owner: &str) -> Result<()>;
}
