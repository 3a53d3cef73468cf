//! In-memory adapter
//!
//! Backs the `simulate` command and the test suite. Every successful call is
//! recorded in order so callers can assert on exactly which side effects ran.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{ExternalOperations, SetStatusOptions};
use crate::types::{ExecutionState, NewTask, WorkflowDefinition};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationCall {
    pub operation: String,
    pub args: JsonValue,
}

/// What the storage layer would hold for one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub status: Option<String>,
    pub execution_state: Option<ExecutionState>,
    pub error_detail: Option<String>,
    pub completed: bool,
    pub current_step_id: Option<String>,
    pub current_phase_id: Option<String>,
}

#[derive(Default)]
struct State {
    definitions: HashMap<String, WorkflowDefinition>,
    executions: HashMap<String, ExecutionRecord>,
    tasks: BTreeMap<String, NewTask>,
    task_fields: HashMap<String, BTreeMap<String, String>>,
    contacts: HashMap<String, BTreeMap<String, String>>,
    calls: Vec<OperationCall>,
    /// Remaining injected failures per operation name
    failures: HashMap<String, u32>,
    next_task: u64,
}

#[derive(Default)]
pub struct InMemoryOperations {
    state: Mutex<State>,
}

impl InMemoryOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(self, definition_id: impl Into<String>, definition: WorkflowDefinition) -> Self {
        self.insert_definition(definition_id, definition);
        self
    }

    pub fn insert_definition(&self, definition_id: impl Into<String>, definition: WorkflowDefinition) {
        self.lock().definitions.insert(definition_id.into(), definition);
    }

    /// Make the next `times` calls of `operation` fail
    pub fn fail_next(&self, operation: &str, times: u32) {
        self.lock().failures.insert(operation.to_string(), times);
    }

    pub fn calls(&self) -> Vec<OperationCall> {
        self.lock().calls.clone()
    }

    pub fn calls_named(&self, operation: &str) -> Vec<OperationCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub fn record(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.lock().executions.get(execution_id).cloned()
    }

    pub fn task(&self, task_id: &str) -> Option<NewTask> {
        self.lock().tasks.get(task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<(String, NewTask)> {
        self.lock()
            .tasks
            .iter()
            .map(|(id, task)| (id.clone(), task.clone()))
            .collect()
    }

    pub fn task_fields(&self, task_id: &str) -> BTreeMap<String, String> {
        self.lock().task_fields.get(task_id).cloned().unwrap_or_default()
    }

    pub fn contact_fields(&self, contact_id: &str) -> BTreeMap<String, String> {
        self.lock().contacts.get(contact_id).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consume an injected failure or record the call
    fn begin(&self, operation: &str, args: JsonValue) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        if let Some(remaining) = state.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("injected failure in {}", operation);
            }
        }
        state.calls.push(OperationCall {
            operation: operation.to_string(),
            args,
        });
        Ok(state)
    }
}

#[async_trait]
impl ExternalOperations for InMemoryOperations {
    async fn get_workflow_definition(&self, definition_id: &str) -> Result<WorkflowDefinition> {
        let state = self.begin(
            "get_workflow_definition",
            json!({ "definitionId": definition_id }),
        )?;
        state
            .definitions
            .get(definition_id)
            .cloned()
            .ok_or_else(|| anyhow!("Workflow definition '{}' not found", definition_id))
    }

    async fn create_task(&self, execution_id: &str, task: &NewTask) -> Result<String> {
        let mut state = self.begin(
            "create_task",
            json!({ "executionId": execution_id, "task": task }),
        )?;
        state.next_task += 1;
        let task_id = format!("task-{}", state.next_task);
        state.tasks.insert(task_id.clone(), task.clone());
        Ok(task_id)
    }

    async fn set_workflow_status(
        &self,
        execution_id: &str,
        status: &str,
        options: &SetStatusOptions,
    ) -> Result<()> {
        let mut state = self.begin(
            "set_workflow_status",
            json!({ "executionId": execution_id, "status": status, "options": options }),
        )?;
        let record = state.executions.entry(execution_id.to_string()).or_default();
        record.status = Some(status.to_string());
        if let Some(execution_state) = options.workflow_execution_state {
            record.execution_state = Some(execution_state);
        }
        if options.error_detail.is_some() {
            record.error_detail = options.error_detail.clone();
        }
        record.completed |= options.mark_completed_at;
        Ok(())
    }

    async fn set_workflow_execution_state(
        &self,
        execution_id: &str,
        execution_state: ExecutionState,
        error_detail: Option<&str>,
    ) -> Result<()> {
        let mut state = self.begin(
            "set_workflow_execution_state",
            json!({
                "executionId": execution_id,
                "state": execution_state,
                "errorDetail": error_detail,
            }),
        )?;
        let record = state.executions.entry(execution_id.to_string()).or_default();
        record.execution_state = Some(execution_state);
        if let Some(detail) = error_detail {
            record.error_detail = Some(detail.to_string());
        }
        Ok(())
    }

    async fn set_workflow_progress(
        &self,
        execution_id: &str,
        step_id: &str,
        phase_id: Option<&str>,
    ) -> Result<()> {
        let mut state = self.begin(
            "set_workflow_progress",
            json!({ "executionId": execution_id, "stepId": step_id, "phaseId": phase_id }),
        )?;
        let record = state.executions.entry(execution_id.to_string()).or_default();
        record.current_step_id = Some(step_id.to_string());
        record.current_phase_id = phase_id.map(str::to_string);
        Ok(())
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.begin(
            "send_email",
            json!({ "to": to, "subject": subject, "body": body }),
        )?;
        Ok(())
    }

    async fn update_contact(
        &self,
        contact_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.begin(
            "update_contact",
            json!({ "contactId": contact_id, "fields": fields }),
        )?;
        state
            .contacts
            .entry(contact_id.to_string())
            .or_default()
            .extend(fields.clone());
        Ok(())
    }

    async fn update_task(&self, task_id: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.begin(
            "update_task",
            json!({ "taskId": task_id, "fields": fields }),
        )?;
        if !state.tasks.contains_key(task_id) {
            bail!("Task '{}' not found", task_id);
        }
        state
            .task_fields
            .entry(task_id.to_string())
            .or_default()
            .extend(fields.clone());
        Ok(())
    }
}
