//! Tests for the failure path and definition loading

use super::helpers::*;
use crate::adapter::InMemoryOperations;
use crate::executor::{run_until_done, Control, Phase, VM};
use crate::types::{ExecutionState, Step, StepKind};

#[tokio::test]
async fn test_adapter_failure_fails_the_run() {
    let (mut vm, ops) = setup(definition(vec![
        trigger("start"),
        send_email("email", "a@example.com", "s", "b"),
    ]));
    ops.fail_next("send_email", 1);

    run(&mut vm, &ops, t0()).await;

    let Control::Throw(message) = &vm.control else {
        panic!("Expected Throw, got {:?}", vm.control);
    };
    assert!(message.contains("injected failure"));
    assert_eq!(
        ops.record(EXECUTION_ID).unwrap().execution_state,
        Some(ExecutionState::Error)
    );
}

#[tokio::test]
async fn test_missing_definition_fails_the_run() {
    let ops = InMemoryOperations::new();
    let mut vm = VM::new(input());

    run_until_done(&mut vm, &ops, t0()).await.unwrap();

    assert_eq!(vm.phase, Phase::Failed);
    let Control::Throw(message) = &vm.control else {
        panic!("Expected Throw, got {:?}", vm.control);
    };
    assert!(message.contains("not found"));
}

#[tokio::test]
async fn test_invalid_definition_fails_the_run() {
    let (mut vm, ops) = setup(definition(vec![
        Step::new("dup", StepKind::Trigger),
        Step::new("dup", StepKind::Trigger),
    ]));

    run(&mut vm, &ops, t0()).await;

    let Control::Throw(message) = &vm.control else {
        panic!("Expected Throw, got {:?}", vm.control);
    };
    assert!(message.contains("Duplicate step id 'dup'"));
}

#[tokio::test]
async fn test_error_recording_failure_is_returned() {
    let (mut vm, ops) = setup(with_schema(vec![update_status("bad", "x")], &["open"]));
    ops.fail_next("set_workflow_execution_state", 1);

    let result = run_until_done(&mut vm, &ops, t0()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_terminal_vm_does_not_step() {
    let (mut vm, ops) = setup(definition(vec![trigger("start")]));

    run(&mut vm, &ops, t0()).await;
    let calls = ops.calls().len();

    run(&mut vm, &ops, t0()).await;
    assert_eq!(ops.calls().len(), calls);
}
