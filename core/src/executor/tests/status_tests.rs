//! Tests for business status gating

use super::helpers::*;
use crate::executor::{Control, Phase};
use crate::types::ExecutionState;

#[tokio::test]
async fn test_illegal_status_aborts_run() {
    let (mut vm, ops) = setup(with_schema(
        vec![update_status("reject", "rejected")],
        &["draft", "approved"],
    ));

    run(&mut vm, &ops, t0()).await;

    let Control::Throw(message) = &vm.control else {
        panic!("Expected Throw, got {:?}", vm.control);
    };
    assert!(message.contains("'rejected' is not defined"));
    assert_eq!(vm.phase, Phase::Failed);

    // Schema has no "failed": only the execution state is recorded
    let record = ops.record(EXECUTION_ID).unwrap();
    assert_eq!(record.status, None);
    assert_eq!(record.execution_state, Some(ExecutionState::Error));
    assert!(record.error_detail.unwrap().contains("rejected"));
}

#[tokio::test]
async fn test_legal_status_is_final_status() {
    let (mut vm, ops) = setup(with_schema(
        vec![update_status("approve", "approved")],
        &["draft", "approved"],
    ));

    run(&mut vm, &ops, t0()).await;

    let Control::Return(output) = &vm.control else {
        panic!("Expected Return, got {:?}", vm.control);
    };
    assert_eq!(output.final_status, "approved");
    assert_eq!(ops.record(EXECUTION_ID).unwrap().status.as_deref(), Some("approved"));
}

#[tokio::test]
async fn test_schema_less_definition_accepts_any_status() {
    let (mut vm, ops) = setup(definition(vec![
        update_status("a", "whatever"),
        update_status("b", "anything-else"),
    ]));

    run(&mut vm, &ops, t0()).await;

    let Control::Return(output) = &vm.control else {
        panic!("Expected Return, got {:?}", vm.control);
    };
    assert_eq!(output.final_status, "anything-else");
    assert_eq!(ops.calls_named("set_workflow_status").len(), 3);
}

#[tokio::test]
async fn test_status_is_not_template_resolved() {
    let (mut vm, ops) = setup(definition(vec![update_status("s", "{{contact.firstName}}")]));

    run(&mut vm, &ops, t0()).await;

    let Control::Return(output) = &vm.control else {
        panic!("Expected Return, got {:?}", vm.control);
    };
    assert_eq!(output.final_status, "{{contact.firstName}}");
}

#[tokio::test]
async fn test_failure_records_failed_status_when_schema_has_it() {
    let (mut vm, ops) = setup(with_schema(
        vec![
            update_status("open", "open"),
            update_status("bad", "nope"),
        ],
        &["open", "failed"],
    ));

    run(&mut vm, &ops, t0()).await;

    assert!(matches!(vm.control, Control::Throw(_)));
    assert_eq!(vm.last_status.as_deref(), Some("failed"));

    let record = ops.record(EXECUTION_ID).unwrap();
    assert_eq!(record.status.as_deref(), Some("failed"));
    assert_eq!(record.execution_state, Some(ExecutionState::Error));
    assert!(record.error_detail.is_some());
}

#[tokio::test]
async fn test_failure_without_failed_status_keeps_prior_status() {
    let (mut vm, ops) = setup(with_schema(
        vec![
            update_status("open", "open"),
            update_status("bad", "nope"),
        ],
        &["open", "closed"],
    ));

    run(&mut vm, &ops, t0()).await;

    assert!(matches!(vm.control, Control::Throw(_)));
    let record = ops.record(EXECUTION_ID).unwrap();
    assert_eq!(record.status.as_deref(), Some("open"));
    assert_eq!(record.execution_state, Some(ExecutionState::Error));
}
