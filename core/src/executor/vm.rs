//! Interpreter working state
//!
//! The VM holds everything needed to resume an execution after a process
//! restart: the loaded definition, the instruction pointer, variables, the
//! signal latches, and the wait the current step is suspended on. It is
//! serialized after every step and rebuilt from that snapshot on resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::latch::SignalLatches;
use super::status_guard::StatusGuard;
use super::variables::VariableStore;
use crate::types::{RunInput, RunOutput, Signal, SignalKind, StatusSchema, WorkflowDefinition};

/// Default bound on steps executed between two suspensions
pub const DEFAULT_STEP_BUDGET: u32 = 10_000;

static EMPTY_SCHEMA: StatusSchema = StatusSchema(Vec::new());

/* ===================== Control ===================== */

/// What an execution is suspended on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum Awaitable {
    /// A signal of `kind`, or the deadline, whichever comes first
    Signal {
        kind: SignalKind,
        deadline: Option<DateTime<Utc>>,
    },
    /// Durable sleep
    Timer { fire_at: DateTime<Utc> },
}

impl Awaitable {
    /// When the execution must be woken even without a signal
    pub fn wake_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Awaitable::Signal { deadline, .. } => *deadline,
            Awaitable::Timer { fire_at } => Some(*fire_at),
        }
    }

    pub fn signal_kind(&self) -> Option<SignalKind> {
        match self {
            Awaitable::Signal { kind, .. } => Some(*kind),
            Awaitable::Timer { .. } => None,
        }
    }
}

/// Control state after a call to `step()`
///
/// `None` means the VM can keep stepping; the other variants stop the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Control {
    None,
    Suspend(Awaitable),
    Return(RunOutput),
    Throw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loading,
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::TimedOut | Phase::Failed)
    }
}

/// The wait a step entered and has not yet left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWait {
    pub step_id: String,
    pub awaitable: Awaitable,
}

/* ===================== VM ===================== */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VM {
    pub input: RunInput,

    /// Loaded once and never refetched for the life of the run
    pub definition: Option<WorkflowDefinition>,
    pub fingerprint: Option<String>,

    pub variables: VariableStore,

    /// Index into `definition.steps`, or one past the end
    pub ip: usize,

    pub last_status: Option<String>,
    pub latches: SignalLatches,
    pub waiting: Option<PendingWait>,

    pub phase: Phase,
    pub control: Control,

    /// Journal cursor at the last checkpoint
    pub op_seq: u64,

    pub steps_since_suspend: u32,
    pub step_budget: u32,
}

impl VM {
    /// Create a VM for a new run with the contact variables seeded
    pub fn new(input: RunInput) -> Self {
        VM {
            variables: VariableStore::seeded(&input),
            input,
            definition: None,
            fingerprint: None,
            ip: 0,
            last_status: None,
            latches: SignalLatches::default(),
            waiting: None,
            phase: Phase::Loading,
            control: Control::None,
            op_seq: 0,
            steps_since_suspend: 0,
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    pub fn with_step_budget(mut self, budget: u32) -> Self {
        self.step_budget = budget;
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.input.execution_id
    }

    pub fn statuses(&self) -> &StatusSchema {
        self.definition
            .as_ref()
            .map(|d| &d.statuses)
            .unwrap_or(&EMPTY_SCHEMA)
    }

    pub fn status_guard(&self) -> StatusGuard<'_> {
        StatusGuard::new(self.statuses())
    }

    /// Record a signal in its latch
    ///
    /// Returns true when the VM is currently suspended waiting for this kind.
    pub fn deliver(&mut self, signal: Signal) -> bool {
        let kind = signal.kind();
        self.latches.deliver(signal);
        self.waiting_on() == Some(kind)
    }

    /// Clear a suspension so the next `step()` re-enters the waiting step
    pub fn resume(&mut self) -> bool {
        if matches!(self.control, Control::Suspend(_)) {
            self.control = Control::None;
            true
        } else {
            false
        }
    }

    pub fn suspended_on(&self) -> Option<&Awaitable> {
        match &self.control {
            Control::Suspend(awaitable) => Some(awaitable),
            _ => None,
        }
    }

    pub fn waiting_on(&self) -> Option<SignalKind> {
        self.suspended_on().and_then(Awaitable::signal_kind)
    }

    pub fn wake_at(&self) -> Option<DateTime<Utc>> {
        self.suspended_on().and_then(Awaitable::wake_at)
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// True when the snapshot can keep stepping without waiting on anything,
    /// i.e. an activation stopped between two checkpoints
    pub fn is_runnable(&self) -> bool {
        matches!(self.control, Control::None) && !self.is_terminal()
    }

    /// True when the step at `step_id` already entered its wait
    pub fn is_resuming(&self, step_id: &str) -> bool {
        self.waiting
            .as_ref()
            .is_some_and(|pending| pending.step_id == step_id)
    }

    pub fn output(&self, final_status: impl Into<String>) -> RunOutput {
        RunOutput {
            execution_id: self.input.execution_id.clone(),
            final_status: final_status.into(),
            variables: self.variables.as_map().clone(),
        }
    }
}

/* ===================== Step Result ===================== */

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// Suspended or finished; inspect `vm.control`
    Done,
}
