//! Bounded retries for adapter calls
//!
//! Transient storage failures are retried with exponential backoff before the
//! error reaches the interpreter, where it fails the step.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::{ExternalOperations, SetStatusOptions};
use crate::config::RetryConfig;
use crate::types::{ExecutionState, NewTask, WorkflowDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Wraps an adapter and retries each call under a [`RetryPolicy`]
pub struct RetryingOperations<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O: ExternalOperations> RetryingOperations<O> {
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.policy.max_attempts => {
                    let backoff = self.policy.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err.context(format!(
                        "{} failed after {} attempts",
                        operation, attempt
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl<O: ExternalOperations> ExternalOperations for RetryingOperations<O> {
    async fn get_workflow_definition(&self, definition_id: &str) -> Result<WorkflowDefinition> {
        self.with_retry("get_workflow_definition", || {
            self.inner.get_workflow_definition(definition_id)
        })
        .await
    }

    async fn create_task(&self, execution_id: &str, task: &NewTask) -> Result<String> {
        self.with_retry("create_task", || self.inner.create_task(execution_id, task))
            .await
    }

    async fn set_workflow_status(
        &self,
        execution_id: &str,
        status: &str,
        options: &SetStatusOptions,
    ) -> Result<()> {
        self.with_retry("set_workflow_status", || {
            self.inner.set_workflow_status(execution_id, status, options)
        })
        .await
    }

    async fn set_workflow_execution_state(
        &self,
        execution_id: &str,
        state: ExecutionState,
        error_detail: Option<&str>,
    ) -> Result<()> {
        self.with_retry("set_workflow_execution_state", || {
            self.inner
                .set_workflow_execution_state(execution_id, state, error_detail)
        })
        .await
    }

    async fn set_workflow_progress(
        &self,
        execution_id: &str,
        step_id: &str,
        phase_id: Option<&str>,
    ) -> Result<()> {
        self.with_retry("set_workflow_progress", || {
            self.inner
                .set_workflow_progress(execution_id, step_id, phase_id)
        })
        .await
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.with_retry("send_email", || self.inner.send_email(to, subject, body))
            .await
    }

    async fn update_contact(
        &self,
        contact_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.with_retry("update_contact", || {
            self.inner.update_contact(contact_id, fields)
        })
        .await
    }

    async fn update_task(&self, task_id: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        self.with_retry("update_task", || self.inner.update_task(task_id, fields))
            .await
    }
}
