//! # Executor - Resumable Step Interpreter
//!
//! Runs a workflow definition as a linear program with explicit jumps.
//!
//! ## Core Principles
//!
//! 1. **Linear program counter**: `vm.ip` indexes the step list; `condition` jumps, everything else advances
//! 2. **Checkpoint per step**: the VM is serializable and is saved after every `step()` call
//! 3. **Centralized control flow**: `Control` records suspend/return/throw
//! 4. **Side effects only through the adapter**: the executor never talks to storage directly
//!
//! Suspension points are `wait_for_task`, `wait_for_approval` and `delay`.
//! Every other step runs to completion without yielding.

pub mod errors;
pub mod exec_loop;
pub mod latch;
pub mod status_guard;
pub mod steps;
pub mod variables;
pub mod vm;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use errors::StepError;
pub use exec_loop::{run_until_done, step};
pub use latch::SignalLatches;
pub use status_guard::StatusGuard;
pub use steps::Flow;
pub use variables::VariableStore;
pub use vm::{Awaitable, Control, Phase, Step, VM};
