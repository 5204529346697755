// ============================================================================
// Task Records
// ============================================================================
//
// Jobs are created by the submission path and afterwards only mutated by the
// reconciler. The store never deletes them.
//
// ============================================================================

pub mod model;

pub use model::{
    NewTask, PROGRESS_COMPLETE, Task, TaskPatch, TaskPlatform, TaskQuery, TaskStatus,
};

use crate::core::{Result, TaskRowId};
use async_trait::async_trait;

/// Persistence for job records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Records a job coming from the submission path.
    async fn insert(&self, task: NewTask) -> Result<Task>;

    async fn get(&self, id: TaskRowId) -> Result<Option<Task>>;

    /// Up to `limit` jobs whose progress is not complete, oldest first.
    async fn load_unfinished(&self, limit: usize) -> Result<Vec<Task>>;

    /// Applies `patch` to every job with one of the given internal ids.
    async fn bulk_update_by_ids(&self, ids: &[TaskRowId], patch: &TaskPatch) -> Result<u64>;

    /// Applies `patch` to every job with one of the given external ids.
    async fn bulk_update_by_external_ids(
        &self,
        external_ids: &[String],
        patch: &TaskPatch,
    ) -> Result<u64>;

    /// Overwrites the stored job with `task`.
    async fn update(&self, task: &Task) -> Result<()>;

    /// Matching jobs, newest first.
    async fn list(&self, query: &TaskQuery, offset: usize, limit: usize) -> Result<Vec<Task>>;
}
