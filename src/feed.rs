//! A single subscription to the store's change feed.

use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{ChangeEvent, ChangeFeed, RemoteStore};

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Event(ChangeEvent),
    /// The feed failed or ended. Delivered once; the subscription is closed
    /// afterwards.
    Dropped(StoreError),
}

/// Handle to an open change feed.
///
/// Closing is idempotent: [`unsubscribe`](Self::unsubscribe) may be called
/// any number of times, and dropping the handle closes it too.
pub struct Subscription {
    id: u64,
    feed: Option<ChangeFeed>,
}

impl Subscription {
    /// Opens a subscription tagged with `id`, which the caller uses to tell
    /// its events apart from those of earlier subscriptions.
    pub async fn open<S: RemoteStore + ?Sized>(store: &S, id: u64) -> Result<Self, StoreError> {
        let feed = store.subscribe_changes().await?;
        debug!(subscription = id, "subscribed to change feed");
        Ok(Self {
            id,
            feed: Some(feed),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.feed.is_some()
    }

    /// Waits for the next message. Returns `None` once closed.
    ///
    /// Cancel safe: dropping the future loses no event.
    pub async fn next(&mut self) -> Option<FeedMessage> {
        let feed = self.feed.as_mut()?;
        let error = match feed.next().await {
            Some(Ok(event)) => return Some(FeedMessage::Event(event)),
            Some(Err(err)) => err,
            None => StoreError::Transport("change feed closed".to_string()),
        };
        warn!(subscription = self.id, error = %error, "change feed dropped");
        self.feed = None;
        Some(FeedMessage::Dropped(error))
    }

    pub fn unsubscribe(&mut self) {
        if self.feed.take().is_some() {
            debug!(subscription = self.id, "unsubscribed from change feed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
