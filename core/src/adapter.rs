//! External Operation Adapter
//!
//! The fixed set of side-effecting operations the interpreter may invoke.
//! Implementations live in the storage/CRUD layer; the interpreter only sees
//! this trait. Every call is expected to be durable and retryable: wrap an
//! implementation in [`RetryingOperations`] for bounded retries and in
//! [`JournaledOperations`] so replay never repeats a side effect.

pub mod journal;
pub mod memory;
pub mod retry;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{ExecutionState, NewTask, WorkflowDefinition};

pub use journal::{JournalEntry, JournaledOperations};
pub use memory::{ExecutionRecord, InMemoryOperations, OperationCall};
pub use retry::{RetryPolicy, RetryingOperations};

/// Options for `set_workflow_status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStatusOptions {
    #[serde(default)]
    pub mark_completed_at: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_execution_state: Option<ExecutionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

#[async_trait]
pub trait ExternalOperations: Send + Sync {
    async fn get_workflow_definition(&self, definition_id: &str) -> Result<WorkflowDefinition>;

    /// Create a task and return its id
    async fn create_task(&self, execution_id: &str, task: &NewTask) -> Result<String>;

    async fn set_workflow_status(
        &self,
        execution_id: &str,
        status: &str,
        options: &SetStatusOptions,
    ) -> Result<()>;

    async fn set_workflow_execution_state(
        &self,
        execution_id: &str,
        state: ExecutionState,
        error_detail: Option<&str>,
    ) -> Result<()>;

    async fn set_workflow_progress(
        &self,
        execution_id: &str,
        step_id: &str,
        phase_id: Option<&str>,
    ) -> Result<()>;

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()>;

    async fn update_contact(&self, contact_id: &str, fields: &BTreeMap<String, String>)
        -> Result<()>;

    async fn update_task(&self, task_id: &str, fields: &BTreeMap<String, String>) -> Result<()>;
}

#[async_trait]
impl<T> ExternalOperations for Arc<T>
where
    T: ExternalOperations + ?Sized,
{
    async fn get_workflow_definition(&self, definition_id: &str) -> Result<WorkflowDefinition> {
        (**self).get_workflow_definition(definition_id).await
    }

    async fn create_task(&self, execution_id: &str, task: &NewTask) -> Result<String> {
        (**self).create_task(execution_id, task).await
    }

    async fn set_workflow_status(
        &self,
        execution_id: &str,
        status: &str,
        options: &SetStatusOptions,
    ) -> Result<()> {
        (**self)
            .set_workflow_status(execution_id, status, options)
            .await
    }

    async fn set_workflow_execution_state(
        &self,
        execution_id: &str,
        state: ExecutionState,
        error_detail: Option<&str>,
    ) -> Result<()> {
        (**self)
            .set_workflow_execution_state(execution_id, state, error_detail)
            .await
    }

    async fn set_workflow_progress(
        &self,
        execution_id: &str,
        step_id: &str,
        phase_id: Option<&str>,
    ) -> Result<()> {
        (**self)
            .set_workflow_progress(execution_id, step_id, phase_id)
            .await
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        (**self).send_email(to, subject, body).await
    }

    async fn update_contact(
        &self,
        contact_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        (**self).update_contact(contact_id, fields).await
    }

    async fn update_task(&self, task_id: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        (**self).update_task(task_id, fields).await
    }
}
