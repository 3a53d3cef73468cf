//! Background worker
//!
//! Polls the store for executions whose timer or deadline has passed or whose
//! awaited signal has arrived, or that an interrupted activation left
//! runnable, and activates them concurrently up to a fixed bound. Activations
//! of the same execution never overlap, even across worker processes sharing
//! one store.

pub mod runner;

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;

pub use runner::{RunStatus, Runner, RunnerError};

pub struct Worker {
    runner: Runner,
    poll_interval: Duration,
    max_concurrent: usize,
}

impl Worker {
    pub fn new(runner: Runner, config: &WorkerConfig) -> Self {
        Self {
            runner,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            max_concurrent: config.max_concurrent_activations.max(1),
        }
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// In-flight activations finish before this returns.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_concurrent = self.max_concurrent,
            "Worker started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Failed to poll for due executions");
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Activate one batch of due executions; returns how many were activated
    pub async fn poll_once(&self) -> Result<usize> {
        let now = self.runner.clock().now();
        let due = self
            .runner
            .store()
            .due_executions(now, self.max_concurrent)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!(count = due.len(), "Activating due executions");
        let count = due.len();
        let mut activations = JoinSet::new();
        for execution_id in due {
            let runner = self.runner.clone();
            activations.spawn(async move {
                let result = runner.activate(&execution_id).await;
                (execution_id, result)
            });
        }

        while let Some(joined) = activations.join_next().await {
            match joined {
                Ok((execution_id, Ok(status))) => {
                    debug!(execution_id = %execution_id, status = ?status, "Activation finished");
                }
                Ok((execution_id, Err(e))) => match e.downcast_ref::<RunnerError>() {
                    Some(RunnerError::Failed { .. }) => {
                        warn!(execution_id = %execution_id, error = %e, "Execution failed");
                    }
                    Some(RunnerError::Claimed(_)) | Some(RunnerError::NotFound(_)) => {
                        debug!(execution_id = %execution_id, error = %e, "Activation skipped");
                    }
                    _ => {
                        error!(execution_id = %execution_id, error = ?e, "Activation error");
                    }
                },
                Err(e) => error!(error = %e, "Activation task panicked"),
            }
        }

        Ok(count)
    }
}
