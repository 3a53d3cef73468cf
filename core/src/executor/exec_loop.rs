//! Core execution loop
//!
//! `step()` advances the VM by exactly one unit of work: loading the
//! definition, or executing the step under the instruction pointer. The
//! caller checkpoints the VM between calls.
//!
//! ## Function Organization
//! 1. run_until_done() - Top-level driver (calls step repeatedly)
//! 2. step() - Main execution loop (dispatches to step handlers)
//! 3. complete() / time_out() / fail() - Terminal transitions

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::errors::StepError;
use super::status_guard::{FAILED_STATUS, TIMEOUT_STATUS};
use super::steps::{self, Flow};
use super::vm::{Control, Phase, Step, VM};
use crate::adapter::{ExternalOperations, SetStatusOptions};
use crate::types::ExecutionState;

/* ===================== Public API ===================== */

/// Run the VM until it suspends or terminates
///
/// After completion, inspect `vm.control` for the final state. Errors are
/// only returned when recording the outcome of a failed step itself fails.
pub async fn run_until_done(
    vm: &mut VM,
    ops: &dyn ExternalOperations,
    now: DateTime<Utc>,
) -> Result<()> {
    loop {
        match step(vm, ops, now).await? {
            Step::Continue => continue,
            Step::Done => return Ok(()),
        }
    }
}

/// Execute one step of the VM
///
/// 1. Stops immediately if the VM is suspended or terminal
/// 2. Loads the definition on the first call
/// 3. Otherwise executes the step under the instruction pointer
/// 4. Routes any step error through the failure path exactly once
pub async fn step(vm: &mut VM, ops: &dyn ExternalOperations, now: DateTime<Utc>) -> Result<Step> {
    if !matches!(vm.control, Control::None) {
        return Ok(Step::Done);
    }

    let outcome = match vm.phase {
        Phase::Loading => load(vm, ops).await,
        Phase::Running => execute_current(vm, ops, now).await,
        Phase::Completed | Phase::TimedOut | Phase::Failed => return Ok(Step::Done),
    };

    if let Err(err) = outcome {
        fail(vm, ops, &err).await?;
    }

    Ok(match vm.control {
        Control::None => Step::Continue,
        _ => Step::Done,
    })
}

/* ===================== Phases ===================== */

async fn load(vm: &mut VM, ops: &dyn ExternalOperations) -> Result<(), StepError> {
    let definition_id = vm.input.definition_id.clone();
    let definition = ops.get_workflow_definition(&definition_id).await?;
    definition
        .validate()
        .map_err(|e| StepError::InvalidDefinition {
            definition_id: definition_id.clone(),
            reason: e.to_string(),
        })?;

    let fingerprint = definition.fingerprint();
    info!(
        execution_id = %vm.execution_id(),
        definition_id = %definition_id,
        version = %&fingerprint[..12],
        steps = definition.steps.len(),
        "Workflow definition loaded"
    );

    vm.fingerprint = Some(fingerprint);
    vm.definition = Some(definition);
    vm.phase = Phase::Running;
    Ok(())
}

async fn execute_current(
    vm: &mut VM,
    ops: &dyn ExternalOperations,
    now: DateTime<Utc>,
) -> Result<(), StepError> {
    // Clone the step we need (to avoid borrow checker issues)
    let Some(current) = vm
        .definition
        .as_ref()
        .and_then(|d| d.steps.get(vm.ip))
        .cloned()
    else {
        return complete(vm, ops).await;
    };

    if !vm.is_resuming(&current.id) {
        vm.steps_since_suspend += 1;
        if vm.steps_since_suspend > vm.step_budget {
            return Err(StepError::StepBudgetExceeded {
                step_id: current.id.clone(),
                limit: vm.step_budget,
            });
        }

        ops.set_workflow_progress(vm.execution_id(), &current.id, current.phase_id.as_deref())
            .await?;
        debug!(
            execution_id = %vm.execution_id(),
            step_id = %current.id,
            step_type = %current.kind.step_type(),
            ip = vm.ip,
            "Executing step"
        );
    }

    match steps::execute(vm, ops, &current, now).await? {
        Flow::Next => vm.ip += 1,
        Flow::Jump(target) => vm.ip = target,
        Flow::Suspend(awaitable) => {
            debug!(
                execution_id = %vm.execution_id(),
                step_id = %current.id,
                wake_at = ?awaitable.wake_at(),
                "Suspending"
            );
            vm.steps_since_suspend = 0;
            vm.control = Control::Suspend(awaitable);
        }
        Flow::TimedOut => return time_out(vm, ops).await,
    }

    Ok(())
}

/* ===================== Terminal Transitions ===================== */

/// Natural end of the step list
async fn complete(vm: &mut VM, ops: &dyn ExternalOperations) -> Result<(), StepError> {
    let final_status = match &vm.last_status {
        Some(status) => status.clone(),
        None => vm.status_guard().default_final_status(),
    };

    let options = SetStatusOptions {
        mark_completed_at: true,
        workflow_execution_state: Some(ExecutionState::Completed),
        error_detail: None,
    };
    ops.set_workflow_status(vm.execution_id(), &final_status, &options)
        .await?;

    info!(execution_id = %vm.execution_id(), final_status = %final_status, "Workflow completed");
    vm.phase = Phase::Completed;
    vm.control = Control::Return(vm.output(final_status));
    Ok(())
}

/// A wait step ran out of time
///
/// The reported final status is "timeout" even when the tenant's schema has no
/// such status and nothing was written to the business status field.
async fn time_out(vm: &mut VM, ops: &dyn ExternalOperations) -> Result<(), StepError> {
    let final_status = match vm.status_guard().resolve_system_status(TIMEOUT_STATUS) {
        Some(status) => {
            let options = SetStatusOptions {
                mark_completed_at: true,
                workflow_execution_state: Some(ExecutionState::Timeout),
                error_detail: None,
            };
            ops.set_workflow_status(vm.execution_id(), &status, &options)
                .await?;
            vm.last_status = Some(status.clone());
            status
        }
        None => {
            ops.set_workflow_execution_state(vm.execution_id(), ExecutionState::Timeout, None)
                .await?;
            TIMEOUT_STATUS.to_string()
        }
    };

    info!(execution_id = %vm.execution_id(), final_status = %final_status, "Workflow timed out");
    vm.waiting = None;
    vm.phase = Phase::TimedOut;
    vm.control = Control::Return(vm.output(final_status));
    Ok(())
}

/// Record a failed run
///
/// Writes the "failed" business status only when the schema declares it;
/// otherwise only the execution state and error detail are recorded and the
/// previous business status is left untouched.
async fn fail(vm: &mut VM, ops: &dyn ExternalOperations, err: &StepError) -> Result<()> {
    let message = err.to_string();
    error!(
        execution_id = %vm.execution_id(),
        ip = vm.ip,
        configuration_error = err.is_configuration_error(),
        error = %message,
        "Workflow step failed"
    );

    match vm.status_guard().resolve_system_status(FAILED_STATUS) {
        Some(status) => {
            let options = SetStatusOptions {
                mark_completed_at: false,
                workflow_execution_state: Some(ExecutionState::Error),
                error_detail: Some(message.clone()),
            };
            ops.set_workflow_status(vm.execution_id(), &status, &options)
                .await?;
            vm.last_status = Some(status);
        }
        None => {
            ops.set_workflow_execution_state(
                vm.execution_id(),
                ExecutionState::Error,
                Some(&message),
            )
            .await?;
        }
    }

    vm.waiting = None;
    vm.phase = Phase::Failed;
    vm.control = Control::Throw(message);
    Ok(())
}
