//! Step handlers
//!
//! One handler per step kind. Handlers never touch the instruction pointer or
//! `vm.control` directly: they return a [`Flow`] and the execution loop applies
//! it.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::errors::{StepError, UPDATABLE_TASK_FIELDS};
use super::latch::Latch;
use super::vm::{Awaitable, PendingWait, VM};
use crate::adapter::{ExternalOperations, SetStatusOptions};
use crate::types::{
    ApprovalSubmitted, AssignTaskConfig, ConditionConfig, DelayConfig, NewTask, SendEmailConfig,
    SignalKind, Step, StepKind, TaskCompleted, TaskPriority, TaskStatus, UpdateContactConfig,
    UpdateStatusConfig, UpdateTaskConfig, WaitConfig,
};

/// What the loop should do after a step ran
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Advance to the next sequential step
    Next,
    /// Continue at the given index without advancing
    Jump(usize),
    /// Park the execution until the awaitable fires
    Suspend(Awaitable),
    /// A wait step ran past its deadline
    TimedOut,
}

pub async fn execute(
    vm: &mut VM,
    ops: &dyn ExternalOperations,
    step: &Step,
    now: DateTime<Utc>,
) -> Result<Flow, StepError> {
    match &step.kind {
        StepKind::Trigger => Ok(Flow::Next),
        StepKind::AssignTask(config) => assign_task(vm, ops, &step.id, config, now).await,
        StepKind::WaitForTask(config) => wait_for_task(vm, &step.id, config, now),
        StepKind::WaitForApproval(config) => wait_for_approval(vm, &step.id, config, now),
        StepKind::UpdateStatus(config) => update_status(vm, ops, &step.id, config).await,
        StepKind::Condition(config) => Ok(condition(vm, &step.id, config)),
        StepKind::SendEmail(config) => send_email(vm, ops, config).await,
        StepKind::Delay(config) => delay(vm, &step.id, config, now),
        StepKind::UpdateContact(config) => update_contact(vm, ops, &step.id, config).await,
        StepKind::UpdateTask(config) => update_task(vm, ops, &step.id, config).await,
    }
}

/// `now` shifted by an authored offset, or a configuration error when the
/// result leaves chrono's range
fn shifted(
    now: DateTime<Utc>,
    offset: Option<Duration>,
    step_id: &str,
    setting: &'static str,
) -> Result<DateTime<Utc>, StepError> {
    offset
        .and_then(|offset| now.checked_add_signed(offset))
        .ok_or_else(|| StepError::DateOutOfRange {
            step_id: step_id.to_string(),
            setting,
        })
}

/* ===================== Tasks ===================== */

async fn assign_task(
    vm: &mut VM,
    ops: &dyn ExternalOperations,
    step_id: &str,
    config: &AssignTaskConfig,
    now: DateTime<Utc>,
) -> Result<Flow, StepError> {
    let resolve_opt = |template: &Option<String>| {
        template
            .as_deref()
            .map(|t| vm.variables.resolve(t))
            .filter(|v| !v.is_empty())
    };

    let assigned_to = resolve_opt(&config.assigned_to);
    // A task goes to one assignee: a named user takes precedence over a role
    let assigned_role = if assigned_to.is_some() {
        None
    } else {
        resolve_opt(&config.assigned_role)
    };

    let due_date = config
        .due_days
        .map(|days| shifted(now, Duration::try_days(i64::from(days)), step_id, "dueDays"))
        .transpose()?;

    let task = NewTask {
        org_id: vm.input.org_id.clone(),
        contact_id: vm.input.contact_id.clone(),
        title: vm.variables.resolve(&config.title),
        description: resolve_opt(&config.description),
        task_type: config.task_type.clone(),
        assigned_role,
        assigned_to,
        priority: config.priority,
        due_date,
        created_by_step_id: step_id.to_string(),
    };

    let task_id = ops.create_task(vm.execution_id(), &task).await?;
    debug!(execution_id = %vm.execution_id(), step_id, task_id = %task_id, "Task created");
    vm.variables.set(step_id, "taskId", task_id);
    Ok(Flow::Next)
}

async fn update_task(
    vm: &mut VM,
    ops: &dyn ExternalOperations,
    step_id: &str,
    config: &UpdateTaskConfig,
) -> Result<Flow, StepError> {
    let target = config.task_step_id.as_str();
    let definition = vm.definition.as_ref().ok_or_else(|| {
        StepError::Operation(anyhow::anyhow!("update_task executed before definition load"))
    })?;

    let position = definition
        .position(target)
        .ok_or_else(|| StepError::UnknownTaskStep {
            step_id: step_id.to_string(),
            target: target.to_string(),
        })?;
    if position >= vm.ip {
        return Err(StepError::ForwardTaskReference {
            step_id: step_id.to_string(),
            target: target.to_string(),
        });
    }

    let referenced = &definition.steps[position];
    if !matches!(referenced.kind, StepKind::AssignTask(_)) {
        return Err(StepError::NotAnAssignTaskStep {
            step_id: step_id.to_string(),
            target: target.to_string(),
            actual: referenced.kind.step_type(),
        });
    }

    let task_id = match vm.variables.lookup(target, "taskId") {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            return Err(StepError::MissingTaskId {
                step_id: step_id.to_string(),
                target: target.to_string(),
            })
        }
    };

    if config.fields.is_empty() {
        return Err(StepError::NoFieldsToUpdate {
            step_id: step_id.to_string(),
        });
    }

    // Every name is checked before any value
    if let Some(assignment) = config
        .fields
        .iter()
        .find(|a| !UPDATABLE_TASK_FIELDS.contains(&a.field.as_str()))
    {
        return Err(StepError::FieldNotUpdatable {
            step_id: step_id.to_string(),
            field: assignment.field.clone(),
        });
    }

    let resolved: Vec<(&str, String)> = config
        .fields
        .iter()
        .map(|a| (a.field.as_str(), vm.variables.resolve(&a.value)))
        .collect();

    for (_, value) in resolved.iter().filter(|(field, _)| *field == "status") {
        match TaskStatus::parse(value) {
            Some(TaskStatus::Done) => {
                return Err(StepError::TaskCompletionNotAllowed {
                    step_id: step_id.to_string(),
                })
            }
            Some(_) => {}
            None => {
                return Err(StepError::InvalidTaskStatus {
                    step_id: step_id.to_string(),
                    value: value.clone(),
                })
            }
        }
    }

    for (_, value) in resolved.iter().filter(|(field, _)| *field == "priority") {
        if TaskPriority::parse(value).is_none() {
            return Err(StepError::InvalidTaskPriority {
                step_id: step_id.to_string(),
                value: value.clone(),
            });
        }
    }

    let fields: BTreeMap<String, String> = resolved
        .into_iter()
        .map(|(field, value)| (field.to_string(), value))
        .collect();

    ops.update_task(&task_id, &fields).await?;
    Ok(Flow::Next)
}

/* ===================== Waits ===================== */

enum Wait<T> {
    Ready(T),
    Pending(Awaitable),
    TimedOut,
}

/// Shared suspension logic for both signal kinds
///
/// On first entry the latch is armed and, unless a signal is already waiting,
/// a pending wait with its deadline is recorded. On re-entry a delivered
/// signal wins over an expired deadline.
fn await_latch<T>(
    waiting: &mut Option<PendingWait>,
    latch: &mut Latch<T>,
    step_id: &str,
    kind: SignalKind,
    config: &WaitConfig,
    now: DateTime<Utc>,
) -> Result<Wait<T>, StepError> {
    let resuming = waiting.as_ref().is_some_and(|w| w.step_id == step_id);
    if !resuming {
        latch.arm();
    }

    if let Some(payload) = latch.take() {
        *waiting = None;
        return Ok(Wait::Ready(payload));
    }

    let awaitable = match waiting.as_ref() {
        Some(pending) if resuming => pending.awaitable.clone(),
        _ => {
            let deadline = config
                .timeout_days
                .map(|days| {
                    shifted(now, Duration::try_days(i64::from(days)), step_id, "timeoutDays")
                })
                .transpose()?;
            let awaitable = Awaitable::Signal { kind, deadline };
            *waiting = Some(PendingWait {
                step_id: step_id.to_string(),
                awaitable: awaitable.clone(),
            });
            awaitable
        }
    };

    match awaitable.wake_at() {
        Some(deadline) if now >= deadline => {
            *waiting = None;
            Ok(Wait::TimedOut)
        }
        _ => Ok(Wait::Pending(awaitable)),
    }
}

fn wait_for_task(
    vm: &mut VM,
    step_id: &str,
    config: &WaitConfig,
    now: DateTime<Utc>,
) -> Result<Flow, StepError> {
    let wait = await_latch(
        &mut vm.waiting,
        &mut vm.latches.task,
        step_id,
        SignalKind::TaskCompleted,
        config,
        now,
    )?;
    Ok(match wait {
        Wait::Ready(TaskCompleted {
            task_id,
            completed_by,
        }) => {
            vm.variables
                .set(step_id, "completedBy", completed_by.unwrap_or_default());
            vm.variables
                .set(step_id, "taskId", task_id.unwrap_or_default());
            Flow::Next
        }
        Wait::Pending(awaitable) => Flow::Suspend(awaitable),
        Wait::TimedOut => Flow::TimedOut,
    })
}

fn wait_for_approval(
    vm: &mut VM,
    step_id: &str,
    config: &WaitConfig,
    now: DateTime<Utc>,
) -> Result<Flow, StepError> {
    let wait = await_latch(
        &mut vm.waiting,
        &mut vm.latches.approval,
        step_id,
        SignalKind::ApprovalSubmitted,
        config,
        now,
    )?;
    Ok(match wait {
        Wait::Ready(ApprovalSubmitted {
            outcome,
            comment,
            approved_by,
        }) => {
            vm.variables.set(step_id, "outcome", outcome.as_str());
            vm.variables
                .set(step_id, "comment", comment.unwrap_or_default());
            vm.variables.set(step_id, "approvedBy", approved_by);
            Flow::Next
        }
        Wait::Pending(awaitable) => Flow::Suspend(awaitable),
        Wait::TimedOut => Flow::TimedOut,
    })
}

fn delay(
    vm: &mut VM,
    step_id: &str,
    config: &DelayConfig,
    now: DateTime<Utc>,
) -> Result<Flow, StepError> {
    let fire_at = match vm.waiting.as_ref() {
        Some(PendingWait {
            step_id: pending,
            awaitable: Awaitable::Timer { fire_at },
        }) if pending == step_id => *fire_at,
        _ => {
            let fire_at = shifted(now, config.as_duration(), step_id, "duration")?;
            vm.waiting = Some(PendingWait {
                step_id: step_id.to_string(),
                awaitable: Awaitable::Timer { fire_at },
            });
            fire_at
        }
    };

    if now >= fire_at {
        vm.waiting = None;
        Ok(Flow::Next)
    } else {
        Ok(Flow::Suspend(Awaitable::Timer { fire_at }))
    }
}

/* ===================== Status & Control Flow ===================== */

async fn update_status(
    vm: &mut VM,
    ops: &dyn ExternalOperations,
    step_id: &str,
    config: &UpdateStatusConfig,
) -> Result<Flow, StepError> {
    if !vm.status_guard().is_legal(&config.status) {
        return Err(StepError::IllegalStatus {
            step_id: step_id.to_string(),
            status: config.status.clone(),
        });
    }

    ops.set_workflow_status(vm.execution_id(), &config.status, &SetStatusOptions::default())
        .await?;
    vm.last_status = Some(config.status.clone());
    Ok(Flow::Next)
}

fn condition(vm: &VM, step_id: &str, config: &ConditionConfig) -> Flow {
    let value = vm.variables.resolve(&config.field);
    let target = config
        .branches
        .iter()
        .find(|branch| branch.value == value)
        .map(|branch| branch.goto_step_id.as_str())
        .or(config.default_step_id.as_deref());

    let Some(target) = target else {
        return Flow::Next;
    };

    match vm.definition.as_ref().and_then(|d| d.position(target)) {
        Some(index) => {
            debug!(execution_id = %vm.execution_id(), step_id, value = %value, target, "Condition jump");
            Flow::Jump(index)
        }
        None => {
            warn!(
                execution_id = %vm.execution_id(),
                step_id,
                target,
                "Condition target does not exist, falling through"
            );
            Flow::Next
        }
    }
}

/* ===================== Outbound ===================== */

async fn send_email(
    vm: &VM,
    ops: &dyn ExternalOperations,
    config: &SendEmailConfig,
) -> Result<Flow, StepError> {
    let to = vm.variables.resolve(&config.to);
    let subject = vm.variables.resolve(&config.subject);
    let body = vm.variables.resolve(&config.body);
    ops.send_email(&to, &subject, &body).await?;
    Ok(Flow::Next)
}

async fn update_contact(
    vm: &VM,
    ops: &dyn ExternalOperations,
    step_id: &str,
    config: &UpdateContactConfig,
) -> Result<Flow, StepError> {
    if config.fields.is_empty() {
        debug!(execution_id = %vm.execution_id(), step_id, "No contact fields configured, skipping");
        return Ok(Flow::Next);
    }

    let fields: BTreeMap<String, String> = config
        .fields
        .iter()
        .map(|a| (a.field.clone(), vm.variables.resolve(&a.value)))
        .collect();
    ops.update_contact(&vm.input.contact_id, &fields).await?;
    Ok(Flow::Next)
}
