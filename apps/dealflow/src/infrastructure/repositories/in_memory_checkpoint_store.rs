use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::repositories::CheckpointStore;
use crate::domain::run::SharedState;

struct Entry {
    state: SharedState,
    archived: bool,
    /// Insertion order, used to list active runs oldest first
    order: u64,
}

/// In-memory implementation of CheckpointStore
///
/// Keeps snapshots for the lifetime of the process. Suitable for tests,
/// demos and single-process deployments that do not need to survive a
/// restart.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of archived runs
    pub async fn list_archived(&self) -> Vec<Uuid> {
        let entries = self.entries.read().await;
        let mut archived: Vec<_> = entries
            .iter()
            .filter(|(_, e)| e.archived)
            .map(|(id, e)| (e.order, *id))
            .collect();
        archived.sort();
        archived.into_iter().map(|(_, id)| id).collect()
    }

    async fn write(&self, run_id: Uuid, state: &SharedState, archived: bool) -> Result<(), String> {
        if state.run_id() != run_id {
            return Err(format!(
                "Snapshot of run {} cannot be stored under {}",
                state.run_id(),
                run_id
            ));
        }

        let mut entries = self.entries.write().await;
        let next_order = entries.len() as u64;
        let entry = entries.entry(run_id).or_insert_with(|| Entry {
            state: state.clone(),
            archived: false,
            order: next_order,
        });
        if entry.archived {
            return Err(format!("Run {} is archived", run_id));
        }
        if state.version() < entry.state.version() {
            return Err(format!(
                "Stale snapshot of run {}: version {} is older than {}",
                run_id,
                state.version(),
                entry.state.version()
            ));
        }
        entry.state = state.clone();
        entry.archived = archived;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, run_id: Uuid, state: &SharedState) -> Result<(), String> {
        self.write(run_id, state, false).await
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<SharedState>, String> {
        let entries = self.entries.read().await;
        Ok(entries.get(&run_id).map(|e| e.state.clone()))
    }

    async fn archive(&self, run_id: Uuid, state: &SharedState) -> Result<(), String> {
        self.write(run_id, state, true).await
    }

    async fn list_active(&self) -> Result<Vec<Uuid>, String> {
        let entries = self.entries.read().await;
        let mut active: Vec<_> = entries
            .iter()
            .filter(|(_, e)| !e.archived)
            .map(|(id, e)| (e.order, *id))
            .collect();
        active.sort();
        Ok(active.into_iter().map(|(_, id)| id).collect())
    }
}
