//! In-process store with a broadcast change feed.
//!
//! [`InMemoryStore`] keeps the task table in a `BTreeMap` behind a
//! `parking_lot::Mutex` and publishes every committed change on a
//! `tokio::sync::broadcast` channel. Changes are published while the table
//! lock is held, so subscribers see one committer's writes in commit order.
//!
//! The table can be saved to and loaded from a JSON file, which is how the
//! terminal front end keeps tasks between runs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use super::{ChangeEvent, ChangeFeed, Order, RemoteStore};
use crate::error::StoreError;
use crate::filter::Constraint;
use crate::task::{NewTask, TaskId, TaskPatch, TaskRecord, UserId, UserRecord};

/// Events a slow subscriber may fall behind by before its feed drops.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    tasks: Vec<TaskRecord>,
}

#[derive(Debug)]
struct State {
    users: Vec<UserRecord>,
    tasks: BTreeMap<TaskId, TaskRecord>,
    next_id: TaskId,
}

impl State {
    fn from_tables(tables: Tables) -> Self {
        let tasks: BTreeMap<_, _> = tables.tasks.into_iter().map(|t| (t.id, t)).collect();
        let next_id = tasks.keys().next_back().map_or(1, |id| id + 1);
        Self {
            users: tables.users,
            tasks,
            next_id,
        }
    }

    fn is_registered(&self, user: &UserId) -> bool {
        self.users.iter().any(|u| &u.id == user)
    }

    fn user_by_email(&self, email: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.email.eq_ignore_ascii_case(email))
    }

    fn add_user(&mut self, id: UserId, email: String) -> Result<UserRecord, StoreError> {
        if self.is_registered(&id) || self.user_by_email(&email).is_some() {
            return Err(StoreError::Rejected(format!(
                "user {id} <{email}> is already registered"
            )));
        }
        let user = UserRecord {
            id,
            email,
            created_at: Utc::now(),
        };
        self.users.push(user.clone());
        Ok(user)
    }
}

#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self::from_tables(Tables::default(), capacity)
    }

    fn from_tables(tables: Tables, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(State::from_tables(tables)),
            changes,
        }
    }

    /// Sets the id the next insert receives.
    pub fn with_next_id(mut self, next_id: TaskId) -> Self {
        self.state.get_mut().next_id = next_id;
        self
    }

    /// Loads the tables from `path`. A missing file yields an empty store.
    pub fn load_from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = fs::read_to_string(path)?;
        let tables: Tables = serde_json::from_str(&data)?;
        debug!(
            path = %path.display(),
            tasks = tables.tasks.len(),
            users = tables.users.len(),
            "store loaded"
        );
        Ok(Self::from_tables(tables, DEFAULT_FEED_CAPACITY))
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let tables = {
            let state = self.state.lock();
            Tables {
                users: state.users.clone(),
                tasks: state.tasks.values().cloned().collect(),
            }
        };
        fs::write(path, serde_json::to_string_pretty(&tables)?)
    }

    /// Registers a user so tasks can be assigned to them. Ids are unique,
    /// and so are emails, ignoring ASCII case.
    pub fn register_user(
        &self,
        id: impl Into<UserId>,
        email: impl Into<String>,
    ) -> Result<UserRecord, StoreError> {
        self.state.lock().add_user(id.into(), email.into())
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<UserRecord> {
        self.state.lock().user_by_email(email).cloned()
    }

    /// Returns the user with `email`, registering them under the first free
    /// `user-N` id if they are new.
    pub fn ensure_user(&self, email: &str) -> Result<UserRecord, StoreError> {
        let mut state = self.state.lock();
        if let Some(user) = state.user_by_email(email) {
            return Ok(user.clone());
        }
        let mut n = state.users.len() + 1;
        let id = loop {
            let candidate = UserId::new(format!("user-{n}"));
            if !state.is_registered(&candidate) {
                break candidate;
            }
            n += 1;
        };
        state.add_user(id, email.to_string())
    }

    /// Number of change subscriptions currently open.
    pub fn open_subscriptions(&self) -> usize {
        self.changes.receiver_count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let _ = self.changes.send(event);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn query(
        &self,
        constraints: &[Constraint],
        order: Order,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock();
        let rows = state
            .tasks
            .values()
            .filter(|task| constraints.iter().all(|c| c.matches(task)))
            .cloned();
        Ok(match order {
            Order::IdAscending => rows.collect(),
        })
    }

    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        let mut state = self.state.lock();
        if !state.is_registered(&task.assignee_id) {
            return Err(StoreError::Rejected(format!(
                "assignee {} is not a registered user",
                task.assignee_id
            )));
        }
        let id = state.next_id;
        state.next_id += 1;
        let record = TaskRecord {
            id,
            description: Some(task.description),
            creator_id: task.creator_id,
            assignee_id: Some(task.assignee_id),
            assigned_by: task.assigned_by,
            due_at: task.due_at,
            is_complete: false,
            created_at: Utc::now(),
        };
        state.tasks.insert(id, record.clone());
        self.publish(ChangeEvent::Created(record.clone()));
        Ok(record)
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskRecord, StoreError> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::Rejected(format!("no task with id {id}")))?;
        patch.apply_to(task);
        let record = task.clone();
        self.publish(ChangeEvent::Updated(record.clone()));
        Ok(record)
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.tasks.remove(&id).is_some() {
            self.publish(ChangeEvent::Deleted(id));
        }
        Ok(())
    }

    async fn subscribe_changes(&self) -> Result<ChangeFeed, StoreError> {
        let feed = BroadcastStream::new(self.changes.subscribe()).map(|item| {
            item.map_err(|err| StoreError::Transport(format!("change feed dropped: {err}")))
        });
        Ok(feed.boxed())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        Ok(self.state.lock().users.clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn draft(description: &str, assignee: &str) -> NewTask {
        NewTask {
            description: description.to_string(),
            creator_id: "u1".into(),
            assignee_id: assignee.into(),
            assigned_by: "u1".into(),
            due_at: None,
        }
    }

    fn store_with_users() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.register_user("u1", "one@example.com").unwrap();
        store.register_user("u2", "two@example.com").unwrap();
        store
    }

    #[tokio::test]
    async fn insert_assigns_ascending_ids() {
        let store = store_with_users();
        let a = store.insert(draft("a", "u2")).await.unwrap();
        let b = store.insert(draft("b", "u1")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.assignee_id, Some(UserId::new("u2")));
        assert!(!a.is_complete);

        let all = store.query(&[], Order::IdAscending).await.unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn insert_rejects_unregistered_assignee() {
        let store = store_with_users();
        let err = store.insert(draft("a", "ghost")).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn query_applies_constraints() {
        let store = store_with_users();
        store.insert(draft("mine", "u1")).await.unwrap();
        store.insert(draft("theirs", "u2")).await.unwrap();

        let mine = store
            .query(&[Constraint::AssigneeIs("u1".into())], Order::IdAscending)
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].description(), "mine");
    }

    #[tokio::test]
    async fn changes_are_broadcast_in_commit_order() {
        let store = store_with_users();
        let mut feed = store.subscribe_changes().await.unwrap();
        assert_eq!(store.open_subscriptions(), 1);

        let created = store.insert(draft("a", "u2")).await.unwrap();
        let updated = store.update(created.id, TaskPatch::completion(true)).await.unwrap();
        store.delete(created.id).await.unwrap();
        store.delete(created.id).await.unwrap();

        assert_eq!(feed.next().await, Some(Ok(ChangeEvent::Created(created.clone()))));
        assert_eq!(feed.next().await, Some(Ok(ChangeEvent::Updated(updated))));
        assert_eq!(feed.next().await, Some(Ok(ChangeEvent::Deleted(created.id))));

        drop(feed);
        assert_eq!(store.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_a_transport_error() {
        let store = InMemoryStore::with_feed_capacity(1);
        store.register_user("u2", "two@example.com").unwrap();
        let mut feed = store.subscribe_changes().await.unwrap();

        store.insert(draft("a", "u2")).await.unwrap();
        store.insert(draft("b", "u2")).await.unwrap();

        assert!(matches!(feed.next().await, Some(Err(StoreError::Transport(_)))));
    }

    #[tokio::test]
    async fn update_of_missing_row_is_rejected() {
        let store = store_with_users();
        let err = store.update(9, TaskPatch::completion(true)).await.unwrap_err();
        assert_eq!(err, StoreError::Rejected("no task with id 9".to_string()));
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let store = store_with_users();
        assert!(store.register_user("u3", "one@example.com").is_err());
        assert!(store.register_user("u3", "One@Example.com").is_err());
        assert_eq!(store.ensure_user("ONE@example.com").unwrap().id, UserId::new("u1"));
        assert_eq!(store.ensure_user("three@example.com").unwrap().id, UserId::new("user-3"));
    }

    #[test]
    fn generated_ids_skip_taken_ones() {
        let store = store_with_users();
        store.register_user("user-3", "three@example.com").unwrap();

        let user = store.ensure_user("four@example.com").unwrap();
        assert_eq!(user.id, UserId::new("user-4"));
        assert_eq!(store.ensure_user("FOUR@example.com").unwrap(), user);
    }

    #[tokio::test]
    async fn tables_survive_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = store_with_users();
        store.insert(draft("a", "u2")).await.unwrap();
        store.insert(draft("b", "u2")).await.unwrap();
        store.save_to_file(&path).unwrap();

        let reloaded = InMemoryStore::load_from_file(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.list_users().await.unwrap().len(), 2);
        let next = reloaded.insert(draft("c", "u1")).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::load_from_file(dir.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
    }
}
