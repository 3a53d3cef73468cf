//! Step errors
//!
//! Every variant aborts the run through the single top-level failure path.

use thiserror::Error;

use crate::types::StepType;

/// Fields an `update_task` step may write
pub const UPDATABLE_TASK_FIELDS: [&str; 5] =
    ["status", "priority", "description", "assignedRole", "assignedTo"];

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step '{step_id}': status '{status}' is not defined in the workflow's status schema")]
    IllegalStatus { step_id: String, status: String },

    #[error("Step '{step_id}': referenced step '{target}' does not exist")]
    UnknownTaskStep { step_id: String, target: String },

    #[error("Step '{step_id}': referenced step '{target}' must come before this step")]
    ForwardTaskReference { step_id: String, target: String },

    #[error("Step '{step_id}': referenced step '{target}' is a {actual} step, expected assign_task")]
    NotAnAssignTaskStep {
        step_id: String,
        target: String,
        actual: StepType,
    },

    #[error("Step '{step_id}': referenced step '{target}' did not produce a taskId")]
    MissingTaskId { step_id: String, target: String },

    #[error("Step '{step_id}': no fields to update")]
    NoFieldsToUpdate { step_id: String },

    #[error("Step '{step_id}': field '{field}' cannot be updated (allowed: status, priority, description, assignedRole, assignedTo)")]
    FieldNotUpdatable { step_id: String, field: String },

    #[error("Step '{step_id}': '{value}' is not a valid task status")]
    InvalidTaskStatus { step_id: String, value: String },

    #[error("Step '{step_id}': task completion must come from a taskCompleted signal, not update_task")]
    TaskCompletionNotAllowed { step_id: String },

    #[error("Step '{step_id}': '{value}' is not a valid task priority")]
    InvalidTaskPriority { step_id: String, value: String },

    #[error("Step '{step_id}': {setting} puts the date past the supported range")]
    DateOutOfRange { step_id: String, setting: &'static str },

    #[error("Executed {limit} steps without suspending; aborting run at step '{step_id}'")]
    StepBudgetExceeded { step_id: String, limit: u32 },

    #[error("Workflow definition '{definition_id}' is invalid: {reason}")]
    InvalidDefinition {
        definition_id: String,
        reason: String,
    },

    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

impl StepError {
    /// Whether the error stems from the authored definition rather than an adapter failure
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, StepError::Operation(_))
    }
}
