use std::time::Instant;

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::filter::Constraint;
use crate::store::{Order, RemoteStore};
use crate::task::TaskRecord;

/// Runs one filtered read and returns its rows in ascending id order.
///
/// The reconciler keys positions off snapshot order, so rows a backend
/// returns out of order are re-sorted and repeated ids dropped.
pub async fn load_snapshot<S: RemoteStore + ?Sized>(
    store: &S,
    constraints: &[Constraint],
) -> Result<Vec<TaskRecord>, StoreError> {
    let started = Instant::now();
    let mut records = match store.query(constraints, Order::IdAscending).await {
        Ok(records) => records,
        Err(err) => {
            warn!(error = %err, "snapshot load failed");
            return Err(err);
        }
    };

    if !records.windows(2).all(|pair| pair[0].id < pair[1].id) {
        debug!("store returned unordered snapshot; sorting");
        records.sort_by_key(|task| task.id);
        records.dedup_by_key(|task| task.id);
    }

    debug!(
        count = records.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "snapshot loaded"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::store::ChangeFeed;
    use crate::task::{NewTask, TaskId, TaskPatch, UserRecord};

    /// Answers every query with a fixed row set.
    struct Canned(Result<Vec<TaskRecord>, StoreError>);

    #[async_trait]
    impl RemoteStore for Canned {
        async fn query(&self, _: &[Constraint], _: Order) -> Result<Vec<TaskRecord>, StoreError> {
            self.0.clone()
        }
        async fn insert(&self, _: NewTask) -> Result<TaskRecord, StoreError> {
            unimplemented!()
        }
        async fn update(&self, _: TaskId, _: TaskPatch) -> Result<TaskRecord, StoreError> {
            unimplemented!()
        }
        async fn delete(&self, _: TaskId) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn subscribe_changes(&self) -> Result<ChangeFeed, StoreError> {
            unimplemented!()
        }
        async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
            unimplemented!()
        }
    }

    fn task(id: TaskId) -> TaskRecord {
        TaskRecord {
            id,
            description: Some(format!("#{id}")),
            creator_id: "u1".into(),
            assignee_id: Some("u1".into()),
            assigned_by: "u1".into(),
            due_at: None,
            is_complete: false,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn unordered_rows_are_sorted_and_deduplicated() {
        let store = Canned(Ok(vec![task(3), task(1), task(3), task(2)]));
        let rows = load_snapshot(&store, &[]).await.unwrap();
        assert_eq!(rows.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failures_pass_through() {
        let store = Canned(Err(StoreError::Transport("offline".to_string())));
        let err = load_snapshot(&store, &[]).await.unwrap_err();
        assert_eq!(err, StoreError::Transport("offline".to_string()));
    }
}
