//! In-memory execution store
//!
//! Snapshots are kept as JSON so every checkpoint goes through the same
//! serialization round trip as the Postgres store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{ExecutionStore, QueuedSignal};
use crate::adapter::JournalEntry;
use crate::executor::VM;
use crate::types::Signal;

struct Claim {
    owner: String,
    until: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    contexts: HashMap<String, JsonValue>,
    inbox: HashMap<String, Vec<QueuedSignal>>,
    next_signal_id: i64,
    journal: HashMap<String, BTreeMap<u64, JournalEntry>>,
    claims: HashMap<String, Claim>,
}

impl State {
    fn save(&mut self, vm: &VM) -> Result<()> {
        let snapshot = serde_json::to_value(vm).context("Failed to serialize VM state")?;
        self.contexts.insert(vm.execution_id().to_string(), snapshot);
        Ok(())
    }

    fn is_claimed(&self, execution_id: &str, now: DateTime<Utc>) -> bool {
        self.claims
            .get(execution_id)
            .is_some_and(|claim| claim.until > now)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().contexts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn pending_signals(&self, execution_id: &str) -> usize {
        self.lock().inbox.get(execution_id).map_or(0, Vec::len)
    }

    pub fn journal_len(&self, execution_id: &str) -> usize {
        self.lock().journal.get(execution_id).map_or(0, BTreeMap::len)
    }

    /// Current claim holder, expired or not
    pub fn claimed_by(&self, execution_id: &str) -> Option<String> {
        self.lock()
            .claims
            .get(execution_id)
            .map(|claim| claim.owner.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn save_context(&self, vm: &VM) -> Result<()> {
        self.lock().save(vm)
    }

    async fn load_context(&self, execution_id: &str) -> Result<Option<VM>> {
        let snapshot = self.lock().contexts.get(execution_id).cloned();
        snapshot
            .map(|s| serde_json::from_value(s).context("Failed to deserialize VM state"))
            .transpose()
    }

    async fn delete_context(&self, execution_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.contexts.remove(execution_id);
        state.inbox.remove(execution_id);
        state.claims.remove(execution_id);
        Ok(())
    }

    async fn push_signal(&self, execution_id: &str, signal: &Signal) -> Result<()> {
        let mut state = self.lock();
        state.next_signal_id += 1;
        let id = state.next_signal_id;
        state
            .inbox
            .entry(execution_id.to_string())
            .or_default()
            .push(QueuedSignal {
                id,
                signal: signal.clone(),
            });
        Ok(())
    }

    async fn queued_signals(&self, execution_id: &str) -> Result<Vec<QueuedSignal>> {
        Ok(self
            .lock()
            .inbox
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_delivered(&self, vm: &VM, signal_ids: &[i64]) -> Result<()> {
        let mut state = self.lock();
        state.save(vm)?;
        if let Some(queued) = state.inbox.get_mut(vm.execution_id()) {
            queued.retain(|q| !signal_ids.contains(&q.id));
        }
        Ok(())
    }

    async fn journal_entry(&self, execution_id: &str, seq: u64) -> Result<Option<JournalEntry>> {
        Ok(self
            .lock()
            .journal
            .get(execution_id)
            .and_then(|entries| entries.get(&seq))
            .cloned())
    }

    async fn append_journal(&self, execution_id: &str, entry: &JournalEntry) -> Result<()> {
        self.lock()
            .journal
            .entry(execution_id.to_string())
            .or_default()
            .insert(entry.seq, entry.clone());
        Ok(())
    }

    async fn clear_journal(&self, execution_id: &str) -> Result<()> {
        self.lock().journal.remove(execution_id);
        Ok(())
    }

    async fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let state = self.lock();
        let mut due = Vec::new();
        for (execution_id, snapshot) in &state.contexts {
            if state.is_claimed(execution_id, now) {
                continue;
            }

            let vm: VM = serde_json::from_value(snapshot.clone())
                .context("Failed to deserialize VM state")?;

            let timer_due = vm.wake_at().is_some_and(|at| at <= now);
            let signal_due = vm.waiting_on().is_some_and(|kind| {
                state
                    .inbox
                    .get(execution_id)
                    .is_some_and(|queued| queued.iter().any(|q| q.signal.kind() == kind))
            });
            if vm.is_runnable() || timer_due || signal_due {
                due.push(execution_id.clone());
            }
        }
        due.sort();
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(
        &self,
        execution_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.lock();
        if !state.contexts.contains_key(execution_id) {
            return Ok(false);
        }

        let held_by_other = state
            .claims
            .get(execution_id)
            .is_some_and(|claim| claim.owner != owner && claim.until > now);
        if held_by_other {
            return Ok(false);
        }

        state.claims.insert(
            execution_id.to_string(),
            Claim {
                owner: owner.to_string(),
                until,
            },
        );
        Ok(true)
    }

    async fn release(&self, execution_id: &str, owner: &str) -> Result<()> {
        let mut state = self.lock();
        if state
            .claims
            .get(execution_id)
            .is_some_and(|claim| claim.owner == owner)
        {
            state.claims.remove(execution_id);
        }
        Ok(())
    }
}
