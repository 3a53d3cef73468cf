//! Signal latches
//!
//! One latch per signal kind, each pairing a received flag with the most
//! recently delivered payload. Delivery is level-triggered: a signal that
//! arrives before the matching wait begins is observed as soon as the wait
//! starts. Once a wait of a kind has consumed a signal, every later wait of
//! that kind resets the latch on entry, so stray duplicates never satisfy an
//! unrelated wait.

use serde::{Deserialize, Serialize};

use crate::types::{ApprovalSubmitted, Signal, SignalKind, TaskCompleted};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Latch<T> {
    received: bool,
    payload: Option<T>,
    /// Set once a wait of this kind has consumed a signal
    consumed: bool,
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self {
            received: false,
            payload: None,
            consumed: false,
        }
    }
}

impl<T> Latch<T> {
    /// Record a delivery; a newer payload replaces an unconsumed older one
    pub fn set(&mut self, payload: T) {
        self.received = true;
        self.payload = Some(payload);
    }

    /// Called when a wait of this kind begins
    pub fn arm(&mut self) {
        if self.consumed {
            self.received = false;
            self.payload = None;
        }
    }

    /// Take the pending payload, if any
    pub fn take(&mut self) -> Option<T> {
        if !self.received {
            return None;
        }
        self.received = false;
        self.consumed = true;
        self.payload.take()
    }

    pub fn is_set(&self) -> bool {
        self.received
    }
}

/// Latch pair for the two signal kinds an execution accepts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalLatches {
    pub task: Latch<TaskCompleted>,
    pub approval: Latch<ApprovalSubmitted>,
}

impl SignalLatches {
    pub fn deliver(&mut self, signal: Signal) {
        match signal {
            Signal::TaskCompleted(payload) => self.task.set(payload),
            Signal::ApprovalSubmitted(payload) => self.approval.set(payload),
        }
    }

    pub fn arm(&mut self, kind: SignalKind) {
        match kind {
            SignalKind::TaskCompleted => self.task.arm(),
            SignalKind::ApprovalSubmitted => self.approval.arm(),
        }
    }

    pub fn take(&mut self, kind: SignalKind) -> Option<Signal> {
        match kind {
            SignalKind::TaskCompleted => self.task.take().map(Signal::TaskCompleted),
            SignalKind::ApprovalSubmitted => self.approval.take().map(Signal::ApprovalSubmitted),
        }
    }

    pub fn is_set(&self, kind: SignalKind) -> bool {
        match kind {
            SignalKind::TaskCompleted => self.task.is_set(),
            SignalKind::ApprovalSubmitted => self.approval.is_set(),
        }
    }
}
