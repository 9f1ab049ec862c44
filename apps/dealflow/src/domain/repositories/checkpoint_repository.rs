use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::run::SharedState;

/// Repository trait for run checkpoints
///
/// Key-value contract over run ids. The orchestrator writes a snapshot after
/// every step, so implementations must treat `put` as an upsert.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save the latest snapshot of a run (insert or update)
    async fn put(&self, run_id: Uuid, state: &SharedState) -> Result<(), String>;

    /// Find the latest snapshot of a run, archived or not
    async fn get(&self, run_id: Uuid) -> Result<Option<SharedState>, String>;

    /// Save the final snapshot of a terminal run and mark it archived
    async fn archive(&self, run_id: Uuid, state: &SharedState) -> Result<(), String>;

    /// Ids of runs that are not archived, oldest first
    async fn list_active(&self) -> Result<Vec<Uuid>, String>;
}
