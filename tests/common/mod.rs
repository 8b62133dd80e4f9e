//! Shared fixtures: a store wrapper that can fail, stall or drop its feeds on
//! demand, and helpers for driving a session.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use taskers_live::filter::Constraint;
use taskers_live::session::Phase;
use taskers_live::store::memory::InMemoryStore;
use taskers_live::store::{ChangeFeed, Order};
use taskers_live::task::{NewTask, TaskPatch};
use taskers_live::{
    LiveTaskList, RemoteStore, StoreError, SyncConfig, TaskId, TaskRecord, UserRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Query,
    Insert,
    Update,
    Delete,
    Subscribe,
    ListUsers,
}

const OPS: usize = 6;

pub struct FlakyStore {
    pub inner: InMemoryStore,
    failing: [AtomicBool; OPS],
    calls: [AtomicUsize; OPS],
    query_delays: Mutex<VecDeque<Duration>>,
    completion_override: Mutex<Option<bool>>,
    kill: broadcast::Sender<()>,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        let (kill, _) = broadcast::channel(4);
        Self {
            inner,
            failing: Default::default(),
            calls: Default::default(),
            query_delays: Mutex::new(VecDeque::new()),
            completion_override: Mutex::new(None),
            kill,
        }
    }

    /// A store with users `u1` and `u2` registered.
    pub fn with_users() -> Self {
        Self::new(users(InMemoryStore::new()))
    }

    pub fn fail(&self, op: Op, failing: bool) {
        self.failing[op as usize].store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls[op as usize].load(Ordering::SeqCst)
    }

    /// The next query reads the table immediately but answers only after
    /// `delay`.
    pub fn delay_next_query(&self, delay: Duration) {
        self.query_delays.lock().push_back(delay);
    }

    /// Makes every update store `value` as the completion flag.
    pub fn override_completion(&self, value: Option<bool>) {
        *self.completion_override.lock() = value;
    }

    /// Fails every open change feed.
    pub fn kill_feeds(&self) {
        let _ = self.kill.send(());
    }

    fn enter(&self, op: Op) -> Result<(), StoreError> {
        self.calls[op as usize].fetch_add(1, Ordering::SeqCst);
        if self.failing[op as usize].load(Ordering::SeqCst) {
            return Err(StoreError::Transport(format!("{op:?} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn query(
        &self,
        constraints: &[Constraint],
        order: Order,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.enter(Op::Query)?;
        let rows = self.inner.query(constraints, order).await;
        let delay = self.query_delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        rows
    }

    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        self.enter(Op::Insert)?;
        self.inner.insert(task).await
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskRecord, StoreError> {
        self.enter(Op::Update)?;
        let forced = *self.completion_override.lock();
        let patch = match forced {
            Some(value) => TaskPatch::completion(value),
            None => patch,
        };
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        self.enter(Op::Delete)?;
        self.inner.delete(id).await
    }

    async fn subscribe_changes(&self) -> Result<ChangeFeed, StoreError> {
        self.enter(Op::Subscribe)?;
        let feed = self.inner.subscribe_changes().await?;
        let killed = BroadcastStream::new(self.kill.subscribe())
            .map(|_| Err(StoreError::Transport("feed killed".to_string())));
        Ok(futures::stream::select(feed, killed).boxed())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.enter(Op::ListUsers)?;
        self.inner.list_users().await
    }
}

pub fn users(store: InMemoryStore) -> InMemoryStore {
    store.register_user("u1", "one@example.com").unwrap();
    store.register_user("u2", "two@example.com").unwrap();
    store
}

pub fn draft(description: &str, creator: &str, assignee: &str) -> NewTask {
    NewTask {
        description: description.to_string(),
        creator_id: creator.into(),
        assignee_id: assignee.into(),
        assigned_by: creator.into(),
        due_at: None,
    }
}

/// Inserts straight into the wrapped store, as another client would.
pub async fn seed(store: &FlakyStore, description: &str, assignee: &str) -> TaskRecord {
    store.inner.insert(draft(description, "u1", assignee)).await.unwrap()
}

pub fn config() -> SyncConfig {
    SyncConfig {
        retry_backoff_ms: 500,
        ..SyncConfig::default()
    }
}

/// Processes one input, failing the test if none arrives.
pub async fn step<S: RemoteStore + ?Sized + 'static>(session: &mut LiveTaskList<S>) {
    tokio::time::timeout(Duration::from_secs(5), session.process_next())
        .await
        .expect("session stalled");
}

pub async fn until_live<S: RemoteStore + ?Sized + 'static>(session: &mut LiveTaskList<S>) {
    for _ in 0..16 {
        if session.phase() == Phase::Live {
            return;
        }
        step(session).await;
    }
    panic!("session never went live");
}

/// Asserts nothing is ready within `within`.
pub async fn assert_quiet<S: RemoteStore + ?Sized + 'static>(
    session: &mut LiveTaskList<S>,
    within: Duration,
) {
    assert!(
        tokio::time::timeout(within, session.next_input())
            .await
            .is_err(),
        "unexpected session input"
    );
}
