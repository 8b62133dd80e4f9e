//! Subscription lifecycle for one viewer's live task list.
//!
//! [`LiveTaskList`] owns everything that belongs to the current
//! (viewer, filter) pair: the change subscription, the in-flight snapshot
//! load, a pending retry timer and the [`Reconciler`] holding the list.
//! Changing the viewer or the filter tears all of that down and starts over:
//!
//! ```text
//! Idle ──set_view──▶ Loading ──snapshot──▶ Live
//!   ▲                  │  ▲                  │
//!   └──── close ───────┘  └── feed dropped ──┘
//! ```
//!
//! The session is a cooperative state machine. Nothing runs in the
//! background: [`next_input`](LiveTaskList::next_input) waits for whichever
//! of the load, the feed or the retry timer is ready and
//! [`apply_input`](LiveTaskList::apply_input) folds it. Every input carries
//! the generation it was started under, and inputs from an older generation
//! are dropped on arrival. Dropping the session, or the subscription it
//! holds, closes the feed.

use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Local;
use futures::future::BoxFuture;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use crate::commands;
use crate::config::SyncConfig;
use crate::error::{StoreError, SyncError};
use crate::feed::{FeedMessage, Subscription};
use crate::filter::{constraints_for, FilterSelector};
use crate::reconcile::{Applied, Membership, Reconciler};
use crate::snapshot::load_snapshot;
use crate::store::{ChangeEvent, RemoteStore};
use crate::task::{TaskId, TaskRecord, UserId, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No view: nobody signed in, or the session was closed.
    Idle,
    /// Subscribed (or retrying) and waiting for the snapshot. Events are
    /// buffered until it lands.
    Loading,
    /// Snapshot applied; events fold straight into the list.
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryKind {
    Snapshot,
    Restart,
}

/// Notices kept for a caller that is not draining them.
const MAX_NOTICES: usize = 64;

/// What happened while a snapshot was loading, replayed over it in arrival
/// order. Confirmed commands are kept alongside feed events because the
/// snapshot may have read the table before the command landed.
#[derive(Debug, Clone)]
enum Replay {
    Event(ChangeEvent),
    Inserted(TaskRecord),
    Deleted(TaskId),
    Completed(TaskId, bool),
}

struct PendingLoad {
    generation: u64,
    future: BoxFuture<'static, Result<Vec<TaskRecord>, StoreError>>,
}

struct PendingRetry {
    generation: u64,
    kind: RetryKind,
    timer: Pin<Box<Sleep>>,
}

enum Inbound {
    Snapshot {
        generation: u64,
        result: Result<Vec<TaskRecord>, StoreError>,
    },
    Feed {
        subscription: u64,
        message: FeedMessage,
    },
    Retry {
        generation: u64,
        kind: RetryKind,
    },
}

/// One ready input, produced by [`LiveTaskList::next_input`].
pub struct SessionInput(Inbound);

/// A filtered task list kept live against a [`RemoteStore`].
pub struct LiveTaskList<S: RemoteStore + ?Sized + 'static> {
    store: Arc<S>,
    config: SyncConfig,
    viewer: Option<UserId>,
    filter: FilterSelector,
    phase: Phase,
    generation: u64,
    list: Reconciler,
    subscription: Option<Subscription>,
    load: Option<PendingLoad>,
    retry: Option<PendingRetry>,
    buffered: Vec<Replay>,
    users: Vec<UserRecord>,
    error: Option<String>,
    notices: VecDeque<String>,
}

impl<S: RemoteStore + ?Sized + 'static> LiveTaskList<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        let filter = config.default_filter;
        Self {
            store,
            config,
            viewer: None,
            filter,
            phase: Phase::Idle,
            generation: 0,
            list: Reconciler::new(),
            subscription: None,
            load: None,
            retry: None,
            buffered: Vec::new(),
            users: Vec::new(),
            error: None,
            notices: VecDeque::new(),
        }
    }

    pub fn viewer(&self) -> Option<&UserId> {
        self.viewer.as_ref()
    }

    pub fn filter(&self) -> FilterSelector {
        self.filter
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The current list, in display order.
    pub fn tasks(&self) -> impl ExactSizeIterator<Item = &TaskRecord> + '_ {
        self.list.iter()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.list.ids()
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.list.get(id)
    }

    /// The last failure, until the next successful operation.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Users that may be assigned tasks, as of the last
    /// [`refresh_users`](Self::refresh_users).
    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    /// Drains informational notices about tasks that arrived live. Only the
    /// most recent ones are kept between calls.
    pub fn take_notices(&mut self) -> Vec<String> {
        self.notices.drain(..).collect()
    }

    pub fn membership(&self) -> Option<Membership> {
        self.viewer
            .clone()
            .map(|viewer| Membership::new(viewer, self.filter, self.config.insert_policy))
    }

    /// Switches to `viewer` looking through `filter`. A no-op if that view
    /// is already loading or live.
    pub async fn set_view(&mut self, viewer: UserId, filter: FilterSelector) {
        if self.phase != Phase::Idle && self.viewer.as_ref() == Some(&viewer) && self.filter == filter
        {
            return;
        }
        self.viewer = Some(viewer);
        self.filter = filter;
        self.restart().await;
    }

    pub async fn set_viewer(&mut self, viewer: UserId) {
        let filter = self.filter;
        self.set_view(viewer, filter).await;
    }

    /// Changes the filter. Without a viewer the choice is remembered for
    /// when one signs in.
    pub async fn set_filter(&mut self, filter: FilterSelector) {
        match self.viewer.clone() {
            Some(viewer) => self.set_view(viewer, filter).await,
            None => self.filter = filter,
        }
    }

    /// Signs the viewer out and discards the list.
    pub fn clear_viewer(&mut self) {
        self.close();
        self.viewer = None;
    }

    /// Reloads the current view from scratch.
    pub async fn refresh(&mut self) {
        self.restart().await;
    }

    /// Closes the subscription, abandons any load and discards the list.
    pub fn close(&mut self) {
        self.teardown();
        self.list = Reconciler::new();
    }

    pub async fn refresh_users(&mut self) -> Result<(), SyncError> {
        match self.store.list_users().await {
            Ok(users) => {
                debug!(count = users.len(), "users loaded");
                self.users = users;
                Ok(())
            }
            Err(err) => {
                let err = SyncError::from(err);
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Creates a task as the current viewer. `due_input` is read as local
    /// wall-clock time; blank means no due date.
    pub async fn create_task(
        &mut self,
        description: &str,
        assignee: &str,
        due_input: &str,
    ) -> Result<TaskRecord, SyncError> {
        let prepared = match &self.viewer {
            Some(creator) => {
                commands::prepare_task(creator, description, assignee, due_input, &Local)
            }
            None => Err(SyncError::Validation("no viewer is signed in".to_string())),
        };
        let result = match prepared {
            Ok(task) => commands::create_task(&*self.store, &mut self.list, task).await,
            Err(err) => Err(err),
        };
        if let Ok(record) = &result {
            self.remember(Replay::Inserted(record.clone()));
        }
        self.settle(result)
    }

    pub async fn delete_task(&mut self, id: TaskId) -> Result<(), SyncError> {
        let result = commands::delete_task(&*self.store, &mut self.list, id).await;
        if result.is_ok() {
            self.remember(Replay::Deleted(id));
        }
        self.settle(result)
    }

    /// Flips the completion flag and returns the value the store kept.
    pub async fn toggle_completion(&mut self, id: TaskId) -> Result<bool, SyncError> {
        let result = commands::toggle_completion(&*self.store, &mut self.list, id).await;
        if let Ok(stored) = result {
            self.remember(Replay::Completed(id, stored));
        }
        self.settle(result)
    }

    pub async fn set_completion(&mut self, id: TaskId, desired: bool) -> Result<bool, SyncError> {
        let result = commands::set_completion(&*self.store, &mut self.list, id, desired).await;
        if let Ok(stored) = result {
            self.remember(Replay::Completed(id, stored));
        }
        self.settle(result)
    }

    /// Waits for the next ready input. Cancel safe.
    pub async fn next_input(&mut self) -> SessionInput {
        let inbound = tokio::select! {
            inbound = finish_load(&mut self.load) => inbound,
            inbound = next_feed_message(&mut self.subscription) => inbound,
            inbound = fire_retry(&mut self.retry) => inbound,
        };
        SessionInput(inbound)
    }

    pub async fn apply_input(&mut self, input: SessionInput) {
        match input.0 {
            Inbound::Snapshot { generation, result } => self.on_snapshot(generation, result),
            Inbound::Feed {
                subscription,
                message,
            } => self.on_feed(subscription, message).await,
            Inbound::Retry { generation, kind } => self.on_retry(generation, kind).await,
        }
    }

    /// Waits for one input and folds it.
    pub async fn process_next(&mut self) {
        let input = self.next_input().await;
        self.apply_input(input).await;
    }

    /// Tears down the current view and enters it again. The old list stays
    /// visible until the new snapshot replaces it.
    async fn restart(&mut self) {
        self.teardown();
        let Some(viewer) = self.viewer.clone() else {
            return;
        };
        self.phase = Phase::Loading;
        info!(
            generation = self.generation,
            viewer = %viewer,
            filter = %self.filter,
            "entering view"
        );

        // Subscribe before reading so no change can fall between the two.
        match Subscription::open(&*self.store, self.generation).await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(err) => {
                self.report(&SyncError::from(err));
                self.schedule_retry(RetryKind::Restart);
            }
        }
        self.start_load(&viewer);
    }

    fn teardown(&mut self) {
        self.generation += 1;
        self.load = None;
        self.retry = None;
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.buffered.clear();
        self.phase = Phase::Idle;
    }

    fn start_load(&mut self, viewer: &UserId) {
        let constraints = constraints_for(self.filter, viewer, &Local::now());
        let store = Arc::clone(&self.store);
        self.load = Some(PendingLoad {
            generation: self.generation,
            future: Box::pin(async move { load_snapshot(&*store, &constraints).await }),
        });
    }

    fn schedule_retry(&mut self, kind: RetryKind) {
        let restart_pending = self
            .retry
            .as_ref()
            .is_some_and(|r| r.generation == self.generation && r.kind == RetryKind::Restart);
        if restart_pending {
            return;
        }
        let backoff = self.config.retry_backoff();
        debug!(generation = self.generation, ?kind, ?backoff, "retry scheduled");
        self.retry = Some(PendingRetry {
            generation: self.generation,
            kind,
            timer: Box::pin(tokio::time::sleep(backoff)),
        });
    }

    fn on_snapshot(&mut self, generation: u64, result: Result<Vec<TaskRecord>, StoreError>) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "discarding stale snapshot");
            return;
        }
        let Some(membership) = self.membership() else {
            return;
        };
        let records = match result {
            Ok(records) => records,
            Err(err) => {
                self.report(&SyncError::from(err));
                self.schedule_retry(RetryKind::Snapshot);
                return;
            }
        };

        let mut list = Reconciler::new();
        list.apply_snapshot(records);
        let buffered = std::mem::take(&mut self.buffered);
        let replayed = buffered.len();
        for change in buffered {
            if let Some(notice) = replay(&mut list, change, &membership) {
                self.notify(notice);
            }
        }
        self.list = list;
        self.phase = Phase::Live;
        if self.subscription.as_ref().is_some_and(Subscription::is_open) {
            self.error = None;
        }
        info!(generation, count = self.list.len(), replayed, "view live");
    }

    async fn on_feed(&mut self, subscription: u64, message: FeedMessage) {
        if subscription != self.generation {
            debug!(subscription, current = self.generation, "discarding event from closed subscription");
            return;
        }
        let event = match message {
            FeedMessage::Event(event) => event,
            FeedMessage::Dropped(err) => {
                self.report(&SyncError::from(err));
                self.restart().await;
                return;
            }
        };
        match self.phase {
            Phase::Loading => {
                if self.buffered.len() >= self.config.max_buffered_events {
                    warn!(
                        buffered = self.buffered.len(),
                        "too many events while loading; restarting view"
                    );
                    self.restart().await;
                    return;
                }
                self.buffered.push(Replay::Event(event));
            }
            Phase::Live => {
                let Some(membership) = self.membership() else {
                    return;
                };
                if let Some(notice) = fold_event(&mut self.list, event, &membership) {
                    self.notify(notice);
                }
            }
            Phase::Idle => {}
        }
    }

    async fn on_retry(&mut self, generation: u64, kind: RetryKind) {
        if generation != self.generation {
            return;
        }
        info!(generation, ?kind, "retrying");
        match kind {
            RetryKind::Snapshot => {
                if let Some(viewer) = self.viewer.clone() {
                    self.start_load(&viewer);
                }
            }
            RetryKind::Restart => self.restart().await,
        }
    }

    /// Keeps a confirmed command for replay if a snapshot is still loading.
    fn remember(&mut self, change: Replay) {
        if self.phase == Phase::Loading {
            debug!(generation = self.generation, ?change, "command confirmed during load");
            self.buffered.push(change);
        }
    }

    fn notify(&mut self, notice: String) {
        info!(notice = %notice, "live update");
        if self.notices.len() >= MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    fn report(&mut self, err: &SyncError) {
        warn!(error = %err, "live list error");
        self.error = Some(err.to_string());
    }

    fn settle<T>(&mut self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        match &result {
            Ok(_) => self.error = None,
            Err(err) => self.report(err),
        }
        result
    }
}

/// Folds one event and returns a notice when it brought a new task into view.
fn fold_event(list: &mut Reconciler, event: ChangeEvent, membership: &Membership) -> Option<String> {
    let description = match &event {
        ChangeEvent::Created(task) => Some(task.description().to_string()),
        _ => None,
    };
    match (list.apply_event(event, membership), description) {
        (Applied::Appended, Some(description)) => Some(format!("New task: {description}")),
        _ => None,
    }
}

fn replay(list: &mut Reconciler, change: Replay, membership: &Membership) -> Option<String> {
    match change {
        Replay::Event(event) => return fold_event(list, event, membership),
        Replay::Inserted(record) => list.apply_local_insert(record),
        Replay::Deleted(id) => list.apply_local_delete(id),
        Replay::Completed(id, is_complete) => list.apply_local_toggle(id, is_complete),
    };
    None
}

async fn finish_load(slot: &mut Option<PendingLoad>) -> Inbound {
    let Some(load) = slot.as_mut() else {
        return pending().await;
    };
    let result = load.future.as_mut().await;
    let generation = load.generation;
    *slot = None;
    Inbound::Snapshot { generation, result }
}

async fn next_feed_message(slot: &mut Option<Subscription>) -> Inbound {
    let Some(subscription) = slot.as_mut() else {
        return pending().await;
    };
    match subscription.next().await {
        Some(message) => Inbound::Feed {
            subscription: subscription.id(),
            message,
        },
        None => pending().await,
    }
}

async fn fire_retry(slot: &mut Option<PendingRetry>) -> Inbound {
    let Some(retry) = slot.as_mut() else {
        return pending().await;
    };
    retry.timer.as_mut().await;
    let (generation, kind) = (retry.generation, retry.kind);
    *slot = None;
    Inbound::Retry { generation, kind }
}
