//! Live, filtered task lists over a shared remote store.
//!
//! A [`LiveTaskList`] loads a filtered snapshot of the task collection,
//! subscribes to the store's collection-wide change feed, and folds both,
//! together with the results of its own create/delete/toggle commands, into
//! one ordered list without duplicates. Changing the viewer or the filter
//! rebuilds the list and resubscribes.
//!
//! # Module Organization
//!
//! - [`filter`] - filter selectors and the query constraints they expand to
//! - [`snapshot`] - the filtered bulk read
//! - [`feed`] - one subscription to the change feed
//! - [`reconcile`] - the in-memory list and its idempotent merges
//! - [`commands`] - remote mutations folded back into the list
//! - [`session`] - subscription lifecycle per (viewer, filter)
//! - [`store`] - the remote store trait and an in-memory implementation

pub mod commands;
pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod reconcile;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod task;

pub use config::{AppConfig, SyncConfig};
pub use error::{StoreError, SyncError};
pub use filter::FilterSelector;
pub use reconcile::{InsertPolicy, Membership, Reconciler};
pub use session::{LiveTaskList, Phase};
pub use store::{ChangeEvent, RemoteStore};
pub use task::{TaskId, TaskRecord, UserId, UserRecord};
