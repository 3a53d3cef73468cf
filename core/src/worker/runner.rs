//! Execution runner
//!
//! One activation loads the latest snapshot of an execution, delivers any
//! queued signals, steps the VM until it suspends or terminates, and persists
//! the result. Activations of the same execution are serialized: within one
//! process by an async mutex, across processes by a leased claim in the store.
//! Distinct executions run independently.

use anyhow::{anyhow, Result};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{ExternalOperations, JournaledOperations, RetryPolicy, RetryingOperations};
use crate::clock::Clock;
use crate::config::Config;
use crate::executor::vm::DEFAULT_STEP_BUDGET;
use crate::executor::{self, Awaitable, Control, Phase, Step, VM};
use crate::store::ExecutionStore;
use crate::types::{RunInput, RunOutput, Signal};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Execution {0} not found")]
    NotFound(String),

    #[error("Execution {0} has already been started")]
    AlreadyStarted(String),

    #[error("Execution {0} is claimed by another activation")]
    Claimed(String),

    #[error("Execution {execution_id} failed: {message}")]
    Failed {
        execution_id: String,
        message: String,
    },
}

/// Outcome of one activation
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Suspended(Awaitable),
    Completed(RunOutput),
    TimedOut(RunOutput),
}

impl RunStatus {
    pub fn output(&self) -> Option<&RunOutput> {
        match self {
            RunStatus::Suspended(_) => None,
            RunStatus::Completed(output) | RunStatus::TimedOut(output) => Some(output),
        }
    }
}

#[derive(Clone)]
pub struct Runner {
    store: Arc<dyn ExecutionStore>,
    ops: Arc<dyn ExternalOperations>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    step_budget: u32,
    owner: String,
    claim_lease: Duration,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Runner {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        ops: Arc<dyn ExternalOperations>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ops,
            clock,
            retry: RetryPolicy::default(),
            step_budget: DEFAULT_STEP_BUDGET,
            owner: format!("runner-{}", Uuid::new_v4()),
            claim_lease: Duration::minutes(5),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_config(self, config: &Config) -> Self {
        self.with_retry(RetryPolicy::from(&config.retry))
            .with_step_budget(config.worker.max_steps_per_activation)
            .with_claim_lease(std::time::Duration::from_millis(config.worker.claim_lease_ms))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_step_budget(mut self, step_budget: u32) -> Self {
        self.step_budget = step_budget;
        self
    }

    /// Lease length for claims; values chrono cannot represent keep the current lease
    pub fn with_claim_lease(mut self, lease: std::time::Duration) -> Self {
        if let Ok(lease) = Duration::from_std(lease) {
            self.claim_lease = lease;
        }
        self
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /* ===================== Entry Points ===================== */

    /// Start a new execution and run it until its first suspension or end
    pub async fn start(&self, input: RunInput) -> Result<RunStatus> {
        let execution_id = input.execution_id.clone();
        let lock = self.lock_for(&execution_id);
        let _guard = lock.lock().await;

        if self.store.load_context(&execution_id).await?.is_some() {
            return Err(RunnerError::AlreadyStarted(execution_id).into());
        }

        info!(
            execution_id = %execution_id,
            definition_id = %input.definition_id,
            "Starting workflow execution"
        );

        let vm = VM::new(input).with_step_budget(self.step_budget);
        self.store.save_context(&vm).await?;

        self.claim(&execution_id).await?;
        let result = self.drive(vm).await;
        self.release(&execution_id).await;
        result
    }

    /// Deliver a signal
    ///
    /// The signal is queued durably first. If the execution is currently
    /// suspended on this kind it is activated immediately; otherwise the
    /// signal waits in the inbox for a later wait step. The same holds when
    /// another activation currently owns the execution.
    pub async fn signal(&self, execution_id: &str, signal: Signal) -> Result<Option<RunStatus>> {
        let vm = self
            .store
            .load_context(execution_id)
            .await?
            .ok_or_else(|| RunnerError::NotFound(execution_id.to_string()))?;

        let kind = signal.kind();
        self.store.push_signal(execution_id, &signal).await?;
        debug!(execution_id, kind = %kind, "Signal queued");

        if vm.waiting_on() != Some(kind) {
            return Ok(None);
        }

        match self.activate(execution_id).await {
            Ok(status) => Ok(Some(status)),
            Err(e) if matches!(e.downcast_ref::<RunnerError>(), Some(RunnerError::Claimed(_))) => {
                debug!(execution_id, "Execution busy, signal left in inbox");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Activate every execution whose timer, deadline, or signal is due, along
    /// with any left runnable by an interrupted activation
    pub async fn resume_due(&self, limit: usize) -> Result<Vec<(String, Result<RunStatus>)>> {
        let due = self.store.due_executions(self.clock.now(), limit).await?;
        let mut results = Vec::with_capacity(due.len());
        for execution_id in due {
            let result = self.activate(&execution_id).await;
            results.push((execution_id, result));
        }
        Ok(results)
    }

    /// Claim, load, resume, and run an execution
    pub async fn activate(&self, execution_id: &str) -> Result<RunStatus> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;

        self.claim(execution_id).await?;
        let result = self.activate_claimed(execution_id).await;
        self.release(execution_id).await;
        result
    }

    async fn activate_claimed(&self, execution_id: &str) -> Result<RunStatus> {
        let mut vm = self
            .store
            .load_context(execution_id)
            .await?
            .ok_or_else(|| RunnerError::NotFound(execution_id.to_string()))?;

        let queued = self.store.queued_signals(execution_id).await?;
        if !queued.is_empty() {
            let ids: Vec<i64> = queued.iter().map(|q| q.id).collect();
            for q in queued {
                vm.deliver(q.signal);
            }
            // Acknowledged only together with the snapshot that holds them
            self.store.save_delivered(&vm, &ids).await?;
        }

        vm.resume();
        self.drive(vm).await
    }

    /* ===================== Execution ===================== */

    async fn drive(&self, mut vm: VM) -> Result<RunStatus> {
        let execution_id = vm.execution_id().to_string();
        let now = self.clock.now();

        let retrying = RetryingOperations::new(self.ops.clone(), self.retry);
        let ops = JournaledOperations::new(&retrying, self.store.as_ref(), &execution_id, vm.op_seq);

        loop {
            let step = executor::step(&mut vm, &ops, now).await?;
            vm.op_seq = ops.cursor();
            match step {
                Step::Continue => self.store.save_context(&vm).await?,
                Step::Done => break,
            }
        }

        match vm.control.clone() {
            Control::Suspend(awaitable) => {
                self.store.save_context(&vm).await?;
                debug!(execution_id = %execution_id, awaitable = ?awaitable, "Execution suspended");
                Ok(RunStatus::Suspended(awaitable))
            }
            Control::Return(output) => {
                self.finish(&execution_id).await?;
                if vm.phase == Phase::TimedOut {
                    Ok(RunStatus::TimedOut(output))
                } else {
                    Ok(RunStatus::Completed(output))
                }
            }
            Control::Throw(message) => {
                self.finish(&execution_id).await?;
                Err(RunnerError::Failed {
                    execution_id,
                    message,
                }
                .into())
            }
            Control::None => Err(anyhow!(
                "Execution {} stopped without a control state",
                execution_id
            )),
        }
    }

    /* ===================== Claims ===================== */

    async fn claim(&self, execution_id: &str) -> Result<()> {
        let now = self.clock.now();
        let until = now
            .checked_add_signed(self.claim_lease)
            .ok_or_else(|| anyhow!("Claim lease for {} overflows the clock", execution_id))?;

        if self
            .store
            .claim(execution_id, &self.owner, now, until)
            .await?
        {
            return Ok(());
        }

        if self.store.load_context(execution_id).await?.is_none() {
            Err(RunnerError::NotFound(execution_id.to_string()).into())
        } else {
            Err(RunnerError::Claimed(execution_id.to_string()).into())
        }
    }

    async fn release(&self, execution_id: &str) {
        // A claim that cannot be released lapses when its lease runs out
        if let Err(e) = self.store.release(execution_id, &self.owner).await {
            warn!(execution_id, error = %e, "Failed to release execution claim");
        }
    }

    async fn finish(&self, execution_id: &str) -> Result<()> {
        self.store.delete_context(execution_id).await?;
        self.store.clear_journal(execution_id).await?;
        self.release_lock(execution_id);
        Ok(())
    }

    fn lock_for(&self, execution_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(execution_id.to_string()).or_default().clone()
    }

    fn release_lock(&self, execution_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(execution_id);
    }
}
