//! Postgres execution store

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgExecutor, PgPool, Row};

use super::{ExecutionStore, QueuedSignal};
use crate::adapter::JournalEntry;
use crate::executor::VM;
use crate::types::Signal;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Insert or replace a snapshot; claim columns are left alone
async fn upsert_context<'e, E>(executor: E, vm: &VM) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let vm_state = serde_json::to_value(vm).context("Failed to serialize VM state")?;

    sqlx::query(
        r#"
        INSERT INTO execution_contexts (execution_id, vm_state, wake_at, waiting_on, runnable)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (execution_id) DO UPDATE
        SET vm_state = EXCLUDED.vm_state,
            wake_at = EXCLUDED.wake_at,
            waiting_on = EXCLUDED.waiting_on,
            runnable = EXCLUDED.runnable,
            updated_at = NOW()
        "#,
    )
    .bind(vm.execution_id())
    .bind(vm_state)
    .bind(vm.wake_at())
    .bind(vm.waiting_on().map(|kind| kind.as_str()))
    .bind(vm.is_runnable())
    .execute(executor)
    .await
    .context("Failed to save execution context")?;

    Ok(())
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn save_context(&self, vm: &VM) -> Result<()> {
        upsert_context(&self.pool, vm).await
    }

    async fn load_context(&self, execution_id: &str) -> Result<Option<VM>> {
        let row = sqlx::query(
            r#"
            SELECT vm_state
            FROM execution_contexts
            WHERE execution_id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load execution context")?;

        row.map(|row| {
            let vm_state: JsonValue = row.get("vm_state");
            serde_json::from_value(vm_state).context("Failed to deserialize VM state")
        })
        .transpose()
    }

    async fn delete_context(&self, execution_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM execution_contexts WHERE execution_id = $1")
            .bind(execution_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete execution context")?;

        sqlx::query("DELETE FROM execution_signals WHERE execution_id = $1 AND NOT consumed")
            .bind(execution_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete pending signals")?;

        tx.commit().await?;
        Ok(())
    }

    async fn push_signal(&self, execution_id: &str, signal: &Signal) -> Result<()> {
        let payload = serde_json::to_value(signal).context("Failed to serialize signal")?;

        sqlx::query(
            r#"
            INSERT INTO execution_signals (execution_id, kind, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(execution_id)
        .bind(signal.kind().as_str())
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("Failed to insert signal")?;

        Ok(())
    }

    async fn queued_signals(&self, execution_id: &str) -> Result<Vec<QueuedSignal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload
            FROM execution_signals
            WHERE execution_id = $1 AND NOT consumed
            ORDER BY id
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load queued signals")?;

        rows.into_iter()
            .map(|row| {
                let payload: JsonValue = row.get("payload");
                Ok(QueuedSignal {
                    id: row.get("id"),
                    signal: serde_json::from_value(payload)
                        .context("Failed to deserialize signal")?,
                })
            })
            .collect()
    }

    async fn save_delivered(&self, vm: &VM, signal_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        upsert_context(&mut *tx, vm).await?;

        sqlx::query(
            r#"
            UPDATE execution_signals
            SET consumed = TRUE
            WHERE execution_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(vm.execution_id())
        .bind(signal_ids)
        .execute(&mut *tx)
        .await
        .context("Failed to acknowledge signals")?;

        tx.commit().await?;
        Ok(())
    }

    async fn journal_entry(&self, execution_id: &str, seq: u64) -> Result<Option<JournalEntry>> {
        let row = sqlx::query(
            r#"
            SELECT operation, result
            FROM operation_journal
            WHERE execution_id = $1 AND seq = $2
            "#,
        )
        .bind(execution_id)
        .bind(seq as i64)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read operation journal")?;

        Ok(row.map(|row| JournalEntry {
            seq,
            operation: row.get("operation"),
            result: row.get("result"),
        }))
    }

    async fn append_journal(&self, execution_id: &str, entry: &JournalEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operation_journal (execution_id, seq, operation, result)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(execution_id)
        .bind(entry.seq as i64)
        .bind(&entry.operation)
        .bind(&entry.result)
        .execute(&self.pool)
        .await
        .context("Failed to append operation journal")?;

        Ok(())
    }

    async fn clear_journal(&self, execution_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM operation_journal WHERE execution_id = $1")
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .context("Failed to clear operation journal")?;

        Ok(())
    }

    async fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT c.execution_id
            FROM execution_contexts c
            WHERE (c.claimed_until IS NULL OR c.claimed_until <= $1)
              AND (c.runnable
                OR (c.wake_at IS NOT NULL AND c.wake_at <= $1)
                OR (c.waiting_on IS NOT NULL AND EXISTS (
                    SELECT 1 FROM execution_signals s
                    WHERE s.execution_id = c.execution_id
                      AND s.kind = c.waiting_on
                      AND NOT s.consumed
                )))
            ORDER BY c.updated_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query due executions")?;

        Ok(rows.into_iter().map(|row| row.get("execution_id")).collect())
    }

    async fn claim(
        &self,
        execution_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            UPDATE execution_contexts
            SET claimed_by = $2,
                claimed_until = $3
            WHERE execution_id = (
                SELECT execution_id FROM execution_contexts
                WHERE execution_id = $1
                  AND (claimed_until IS NULL OR claimed_until <= $4 OR claimed_by = $2)
                FOR UPDATE SKIP LOCKED
            )
            RETURNING execution_id
            "#,
        )
        .bind(execution_id)
        .bind(owner)
        .bind(until)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim execution")?;

        Ok(row.is_some())
    }

    async fn release(&self, execution_id: &str, owner: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE execution_contexts
            SET claimed_by = NULL,
                claimed_until = NULL
            WHERE execution_id = $1 AND claimed_by = $2
            "#,
        )
        .bind(execution_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .context("Failed to release execution claim")?;

        Ok(())
    }
}
