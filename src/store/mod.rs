//! The remote store boundary.
//!
//! The engine treats the store as an opaque service: a filtered read, three
//! row mutations and a collection-wide change feed. [`memory::InMemoryStore`]
//! is the bundled implementation used by the terminal front end and tests.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::filter::Constraint;
use crate::task::{NewTask, TaskId, TaskPatch, TaskRecord, UserRecord};

/// Notification that a row changed. Not filtered: every subscriber sees
/// every change to the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChangeEvent {
    Created(TaskRecord),
    Updated(TaskRecord),
    Deleted(TaskId),
}

impl ChangeEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Created(task) | Self::Updated(task) => task.id,
            Self::Deleted(id) => *id,
        }
    }
}

/// Row order of a snapshot query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    IdAscending,
}

/// A live change subscription. Dropping the stream unsubscribes.
pub type ChangeFeed = BoxStream<'static, Result<ChangeEvent, StoreError>>;

/// Operations the engine consumes from the backing store.
///
/// Return values are trusted verbatim: the record returned by `insert` or
/// `update` is the authoritative row.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads every task matching all `constraints`.
    async fn query(
        &self,
        constraints: &[Constraint],
        order: Order,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Inserts a task and returns the stored row with its assigned id.
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError>;

    /// Applies `patch` to the row and returns the stored result.
    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskRecord, StoreError>;

    /// Deletes the row. Deleting an absent id succeeds.
    async fn delete(&self, id: TaskId) -> Result<(), StoreError>;

    /// Opens a subscription to the collection's change feed.
    async fn subscribe_changes(&self) -> Result<ChangeFeed, StoreError>;

    /// Lists users that may be assigned tasks.
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;
}
