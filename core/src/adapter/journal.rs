//! Operation journal
//!
//! Every successful adapter call is appended to a per-execution journal under
//! a monotonically increasing sequence number. When an activation replays
//! steps that already ran (a crash between a side effect and the following
//! checkpoint), the recorded result is returned instead of calling out again.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{ExternalOperations, SetStatusOptions};
use crate::store::ExecutionStore;
use crate::types::{ExecutionState, NewTask, WorkflowDefinition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub operation: String,
    pub result: JsonValue,
}

pub struct JournaledOperations<'a> {
    inner: &'a dyn ExternalOperations,
    store: &'a dyn ExecutionStore,
    execution_id: String,
    cursor: AtomicU64,
}

impl<'a> JournaledOperations<'a> {
    /// `cursor` is the sequence number recorded at the last checkpoint
    pub fn new(
        inner: &'a dyn ExternalOperations,
        store: &'a dyn ExecutionStore,
        execution_id: impl Into<String>,
        cursor: u64,
    ) -> Self {
        Self {
            inner,
            store,
            execution_id: execution_id.into(),
            cursor: AtomicU64::new(cursor),
        }
    }

    /// Sequence number of the next operation
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    async fn replay_or_run<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Future<Output = Result<T>> + Send,
    {
        let seq = self.cursor();

        if let Some(entry) = self.store.journal_entry(&self.execution_id, seq).await? {
            if entry.operation != operation {
                bail!(
                    "Nondeterministic replay in execution {}: journal entry {} is '{}', but '{}' was requested",
                    self.execution_id,
                    seq,
                    entry.operation,
                    operation
                );
            }
            debug!(execution_id = %self.execution_id, seq, operation, "Replaying journaled operation");
            let value = serde_json::from_value(entry.result)
                .with_context(|| format!("Failed to decode journaled result of {}", operation))?;
            self.cursor.store(seq + 1, Ordering::SeqCst);
            return Ok(value);
        }

        let value = call.await?;
        let entry = JournalEntry {
            seq,
            operation: operation.to_string(),
            result: serde_json::to_value(&value)
                .with_context(|| format!("Failed to encode result of {}", operation))?,
        };
        self.store
            .append_journal(&self.execution_id, &entry)
            .await
            .context("Failed to append operation journal")?;
        debug!(execution_id = %self.execution_id, seq, operation, "Operation journaled");
        self.cursor.store(seq + 1, Ordering::SeqCst);
        Ok(value)
    }
}

#[async_trait]
impl<'a> ExternalOperations for JournaledOperations<'a> {
    async fn get_workflow_definition(&self, definition_id: &str) -> Result<WorkflowDefinition> {
        self.replay_or_run(
            "get_workflow_definition",
            self.inner.get_workflow_definition(definition_id),
        )
        .await
    }

    async fn create_task(&self, execution_id: &str, task: &NewTask) -> Result<String> {
        self.replay_or_run("create_task", self.inner.create_task(execution_id, task))
            .await
    }

    async fn set_workflow_status(
        &self,
        execution_id: &str,
        status: &str,
        options: &SetStatusOptions,
    ) -> Result<()> {
        self.replay_or_run(
            "set_workflow_status",
            self.inner.set_workflow_status(execution_id, status, options),
        )
        .await
    }

    async fn set_workflow_execution_state(
        &self,
        execution_id: &str,
        state: ExecutionState,
        error_detail: Option<&str>,
    ) -> Result<()> {
        self.replay_or_run(
            "set_workflow_execution_state",
            self.inner
                .set_workflow_execution_state(execution_id, state, error_detail),
        )
        .await
    }

    async fn set_workflow_progress(
        &self,
        execution_id: &str,
        step_id: &str,
        phase_id: Option<&str>,
    ) -> Result<()> {
        self.replay_or_run(
            "set_workflow_progress",
            self.inner
                .set_workflow_progress(execution_id, step_id, phase_id),
        )
        .await
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.replay_or_run("send_email", self.inner.send_email(to, subject, body))
            .await
    }

    async fn update_contact(
        &self,
        contact_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.replay_or_run(
            "update_contact",
            self.inner.update_contact(contact_id, fields),
        )
        .await
    }

    async fn update_task(&self, task_id: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        self.replay_or_run("update_task", self.inner.update_task(task_id, fields))
            .await
    }
}
