//! Shared fixtures for runner tests

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::adapter::{InMemoryOperations, JournalEntry, RetryPolicy};
use crate::clock::ManualClock;
use crate::executor::VM;
use crate::store::{ExecutionStore, MemoryStore, QueuedSignal};
use crate::types::*;
use crate::worker::Runner;

pub const DEFINITION_ID: &str = "def-1";

pub struct Harness {
    pub runner: Runner,
    pub store: Arc<MemoryStore>,
    pub ops: Arc<InMemoryOperations>,
    pub clock: Arc<ManualClock>,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap()
}

pub fn harness(definition: WorkflowDefinition) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ops = Arc::new(InMemoryOperations::new().with_definition(DEFINITION_ID, definition));
    let clock = Arc::new(ManualClock::new(t0()));
    let runner = Runner::new(store.clone(), ops.clone(), clock.clone()).with_retry(RetryPolicy::none());
    Harness {
        runner,
        store,
        ops,
        clock,
    }
}

pub fn input(execution_id: &str) -> RunInput {
    RunInput {
        execution_id: execution_id.to_string(),
        org_id: "org-1".to_string(),
        contact_id: "contact-1".to_string(),
        contact_email: "ada@example.com".to_string(),
        contact_first_name: "Ada".to_string(),
        contact_last_name: "Lovelace".to_string(),
        contact_phone: String::new(),
        definition_id: DEFINITION_ID.to_string(),
    }
}

pub fn review_definition() -> WorkflowDefinition {
    WorkflowDefinition::new(
        vec![
            Step::new("start", StepKind::Trigger),
            Step::new(
                "assign",
                StepKind::AssignTask(AssignTaskConfig::titled("Review {{contact.firstName}}")),
            ),
            Step::new(
                "wait",
                StepKind::WaitForTask(WaitConfig {
                    timeout_days: Some(7),
                }),
            ),
            Step::new(
                "approve",
                StepKind::UpdateStatus(UpdateStatusConfig {
                    status: "approved".to_string(),
                }),
            ),
        ],
        StatusSchema::default(),
    )
}

pub fn task_completed(task_id: &str) -> Signal {
    Signal::TaskCompleted(TaskCompleted {
        task_id: Some(task_id.to_string()),
        completed_by: Some("user-1".to_string()),
    })
}

/// Store that fails exactly one checkpoint, simulating a crash between a side
/// effect and its checkpoint
///
/// Both `save_context` and `save_delivered` count as checkpoints.
pub struct CrashingStore {
    inner: MemoryStore,
    saves: AtomicUsize,
    fail_at: usize,
}

impl CrashingStore {
    pub fn failing_save(fail_at: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            saves: AtomicUsize::new(0),
            fail_at,
        }
    }

    fn checkpoint(&self) -> Result<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at {
            bail!("simulated crash at checkpoint {}", n);
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for CrashingStore {
    async fn save_context(&self, vm: &VM) -> Result<()> {
        self.checkpoint()?;
        self.inner.save_context(vm).await
    }

    async fn load_context(&self, execution_id: &str) -> Result<Option<VM>> {
        self.inner.load_context(execution_id).await
    }

    async fn delete_context(&self, execution_id: &str) -> Result<()> {
        self.inner.delete_context(execution_id).await
    }

    async fn push_signal(&self, execution_id: &str, signal: &Signal) -> Result<()> {
        self.inner.push_signal(execution_id, signal).await
    }

    async fn queued_signals(&self, execution_id: &str) -> Result<Vec<QueuedSignal>> {
        self.inner.queued_signals(execution_id).await
    }

    async fn save_delivered(&self, vm: &VM, signal_ids: &[i64]) -> Result<()> {
        self.checkpoint()?;
        self.inner.save_delivered(vm, signal_ids).await
    }

    async fn journal_entry(&self, execution_id: &str, seq: u64) -> Result<Option<JournalEntry>> {
        self.inner.journal_entry(execution_id, seq).await
    }

    async fn append_journal(&self, execution_id: &str, entry: &JournalEntry) -> Result<()> {
        self.inner.append_journal(execution_id, entry).await
    }

    async fn clear_journal(&self, execution_id: &str) -> Result<()> {
        self.inner.clear_journal(execution_id).await
    }

    async fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        self.inner.due_executions(now, limit).await
    }

    async fn claim(
        &self,
        execution_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.claim(execution_id, owner, now, until).await
    }

    async fn release(&self, execution_id: &str, owner: &str) -> Result<()> {
        self.inner.release(execution_id, owner).await
    }
}

/// Runner over a store that crashes at checkpoint `fail_at`
pub fn crashing_runner(
    fail_at: usize,
    definition: WorkflowDefinition,
) -> (Runner, Arc<CrashingStore>, Arc<InMemoryOperations>, Arc<ManualClock>) {
    let store = Arc::new(CrashingStore::failing_save(fail_at));
    let ops = Arc::new(InMemoryOperations::new().with_definition(DEFINITION_ID, definition));
    let clock = Arc::new(ManualClock::new(t0()));
    let runner = Runner::new(store.clone(), ops.clone(), clock.clone()).with_retry(RetryPolicy::none());
    (runner, store, ops, clock)
}
