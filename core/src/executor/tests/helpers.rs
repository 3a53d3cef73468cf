//! Test helpers for executor tests
//!
//! Step builders, a fixed clock origin, and a VM wired to the in-memory adapter.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::adapter::InMemoryOperations;
use crate::executor::{run_until_done, VM};
use crate::types::*;

pub const DEFINITION_ID: &str = "def-1";
pub const EXECUTION_ID: &str = "exec-1";

/// Fixed origin so deadlines are predictable
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

pub fn days(n: i64) -> DateTime<Utc> {
    t0() + Duration::days(n)
}

pub fn input() -> RunInput {
    RunInput {
        execution_id: EXECUTION_ID.to_string(),
        org_id: "org-1".to_string(),
        contact_id: "contact-1".to_string(),
        contact_email: "ada@example.com".to_string(),
        contact_first_name: "Ada".to_string(),
        contact_last_name: "Lovelace".to_string(),
        contact_phone: "555-0100".to_string(),
        definition_id: DEFINITION_ID.to_string(),
    }
}

pub fn definition(steps: Vec<Step>) -> WorkflowDefinition {
    WorkflowDefinition::new(steps, StatusSchema::default())
}

pub fn with_schema(steps: Vec<Step>, ids: &[&str]) -> WorkflowDefinition {
    let entries = ids
        .iter()
        .enumerate()
        .map(|(order, id)| StatusEntry {
            id: id.to_string(),
            label: id.to_string(),
            order: order as i32,
        })
        .collect();
    WorkflowDefinition::new(steps, StatusSchema::new(entries))
}

/// Build the adapter and a fresh VM for `definition`
pub fn setup(definition: WorkflowDefinition) -> (VM, InMemoryOperations) {
    let ops = InMemoryOperations::new().with_definition(DEFINITION_ID, definition);
    (VM::new(input()), ops)
}

pub async fn run(vm: &mut VM, ops: &InMemoryOperations, now: DateTime<Utc>) {
    run_until_done(vm, ops, now).await.unwrap();
}

/// Deliver a signal, clear the suspension, and run again
pub async fn deliver_and_run(
    vm: &mut VM,
    ops: &InMemoryOperations,
    signal: Signal,
    now: DateTime<Utc>,
) {
    vm.deliver(signal);
    vm.resume();
    run(vm, ops, now).await;
}

pub fn task_completed(task_id: &str, by: &str) -> Signal {
    Signal::TaskCompleted(TaskCompleted {
        task_id: Some(task_id.to_string()),
        completed_by: Some(by.to_string()),
    })
}

pub fn approval(outcome: ApprovalOutcome, by: &str, comment: Option<&str>) -> Signal {
    Signal::ApprovalSubmitted(ApprovalSubmitted {
        outcome,
        comment: comment.map(str::to_string),
        approved_by: by.to_string(),
    })
}

/* ===================== Step Builders ===================== */

pub fn trigger(id: &str) -> Step {
    Step::new(id, StepKind::Trigger)
}

pub fn assign_task(id: &str, title: &str) -> Step {
    Step::new(id, StepKind::AssignTask(AssignTaskConfig::titled(title)))
}

pub fn assign_task_with(id: &str, config: AssignTaskConfig) -> Step {
    Step::new(id, StepKind::AssignTask(config))
}

pub fn wait_for_task(id: &str, timeout_days: Option<u32>) -> Step {
    Step::new(id, StepKind::WaitForTask(WaitConfig { timeout_days }))
}

pub fn wait_for_approval(id: &str, timeout_days: Option<u32>) -> Step {
    Step::new(id, StepKind::WaitForApproval(WaitConfig { timeout_days }))
}

pub fn update_status(id: &str, status: &str) -> Step {
    Step::new(
        id,
        StepKind::UpdateStatus(UpdateStatusConfig {
            status: status.to_string(),
        }),
    )
}

pub fn condition(id: &str, field: &str, branches: &[(&str, &str)], default: Option<&str>) -> Step {
    Step::new(
        id,
        StepKind::Condition(ConditionConfig {
            field: field.to_string(),
            branches: branches
                .iter()
                .map(|(value, goto)| ConditionBranch {
                    value: value.to_string(),
                    goto_step_id: goto.to_string(),
                })
                .collect(),
            default_step_id: default.map(str::to_string),
        }),
    )
}

pub fn send_email(id: &str, to: &str, subject: &str, body: &str) -> Step {
    Step::new(
        id,
        StepKind::SendEmail(SendEmailConfig {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        }),
    )
}

pub fn delay(id: &str, duration: u32, unit: DelayUnit) -> Step {
    Step::new(id, StepKind::Delay(DelayConfig { duration, unit }))
}

pub fn update_contact(id: &str, fields: &[(&str, &str)]) -> Step {
    Step::new(
        id,
        StepKind::UpdateContact(UpdateContactConfig {
            fields: assignments(fields),
        }),
    )
}

pub fn update_task(id: &str, task_step_id: &str, fields: &[(&str, &str)]) -> Step {
    Step::new(
        id,
        StepKind::UpdateTask(UpdateTaskConfig {
            task_step_id: task_step_id.to_string(),
            fields: assignments(fields),
        }),
    )
}

fn assignments(fields: &[(&str, &str)]) -> Vec<FieldAssignment> {
    fields
        .iter()
        .map(|(field, value)| FieldAssignment::new(*field, *value))
        .collect()
}
