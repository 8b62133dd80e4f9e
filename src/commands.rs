//! Create, delete and completion commands.
//!
//! Each command is one remote request. The list is touched only after the
//! store confirms, and then with the store's answer rather than the request.

use chrono::TimeZone;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::reconcile::Reconciler;
use crate::store::RemoteStore;
use crate::task::{normalize_due_input_in, NewTask, TaskId, TaskPatch, TaskRecord, UserId};

/// Validates create input and builds the insert payload. Never touches the
/// store.
pub fn prepare_task<Tz: TimeZone>(
    creator: &UserId,
    description: &str,
    assignee: &str,
    due_input: &str,
    tz: &Tz,
) -> Result<NewTask, SyncError> {
    let description = description.trim();
    if description.is_empty() {
        return Err(SyncError::Validation(
            "task description cannot be empty".to_string(),
        ));
    }
    let assignee = assignee.trim();
    if assignee.is_empty() {
        return Err(SyncError::Validation("assignee cannot be empty".to_string()));
    }
    let due_at = normalize_due_input_in(due_input, tz)?;

    Ok(NewTask {
        description: description.to_string(),
        creator_id: creator.clone(),
        assignee_id: UserId::new(assignee),
        assigned_by: creator.clone(),
        due_at,
    })
}

pub async fn create_task<S: RemoteStore + ?Sized>(
    store: &S,
    list: &mut Reconciler,
    task: NewTask,
) -> Result<TaskRecord, SyncError> {
    let record = store.insert(task).await.map_err(|err| {
        warn!(error = %err, "create failed");
        SyncError::from(err)
    })?;
    list.apply_local_insert(record.clone());
    info!(task_id = record.id, "task created");
    Ok(record)
}

pub async fn delete_task<S: RemoteStore + ?Sized>(
    store: &S,
    list: &mut Reconciler,
    id: TaskId,
) -> Result<(), SyncError> {
    store.delete(id).await.map_err(|err| {
        warn!(task_id = id, error = %err, "delete failed");
        SyncError::from(err)
    })?;
    list.apply_local_delete(id);
    info!(task_id = id, "task deleted");
    Ok(())
}

/// Requests `desired` and folds whatever completion value the store
/// actually stored. Returns that value.
pub async fn set_completion<S: RemoteStore + ?Sized>(
    store: &S,
    list: &mut Reconciler,
    id: TaskId,
    desired: bool,
) -> Result<bool, SyncError> {
    let record = store
        .update(id, TaskPatch::completion(desired))
        .await
        .map_err(|err| {
            warn!(task_id = id, error = %err, "completion update failed");
            SyncError::from(err)
        })?;
    if record.is_complete != desired {
        debug!(task_id = id, desired, stored = record.is_complete, "store overrode completion");
    }
    list.apply_local_toggle(id, record.is_complete);
    Ok(record.is_complete)
}

/// Flips the completion flag of a task in `list`.
pub async fn toggle_completion<S: RemoteStore + ?Sized>(
    store: &S,
    list: &mut Reconciler,
    id: TaskId,
) -> Result<bool, SyncError> {
    let current = list
        .get(id)
        .map(|task| task.is_complete)
        .ok_or_else(|| SyncError::Validation(format!("task {id} is not in the current list")))?;
    set_completion(store, list, id, !current).await
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::memory::InMemoryStore;

    fn creator() -> UserId {
        UserId::new("u1")
    }

    #[test]
    fn blank_description_or_assignee_is_rejected() {
        let err = prepare_task(&creator(), "   ", "u2", "", &Utc).unwrap_err();
        assert_eq!(
            err,
            SyncError::Validation("task description cannot be empty".to_string())
        );
        let err = prepare_task(&creator(), "Ship report", " ", "", &Utc).unwrap_err();
        assert_eq!(err, SyncError::Validation("assignee cannot be empty".to_string()));
    }

    #[test]
    fn prepared_task_is_trimmed_and_attributed() {
        let task = prepare_task(&creator(), "  Ship report ", " u2 ", "", &Utc).unwrap();
        assert_eq!(task.description, "Ship report");
        assert_eq!(task.assignee_id, UserId::new("u2"));
        assert_eq!(task.creator_id, creator());
        assert_eq!(task.assigned_by, creator());
        assert_eq!(task.due_at, None);
    }

    #[tokio::test]
    async fn rejected_create_leaves_list_alone() {
        let store = InMemoryStore::new();
        let mut list = Reconciler::new();
        let task = prepare_task(&creator(), "orphan", "nobody", "", &Utc).unwrap();

        let err = create_task(&store, &mut list, task).await.unwrap_err();
        assert!(matches!(err, SyncError::Command(_)));
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn toggle_flips_and_folds_the_stored_value() {
        let store = InMemoryStore::new();
        store.register_user("u1", "u1@example.com").unwrap();
        let mut list = Reconciler::new();
        let task = prepare_task(&creator(), "a", "u1", "", &Utc).unwrap();
        let created = create_task(&store, &mut list, task).await.unwrap();

        assert_eq!(toggle_completion(&store, &mut list, created.id).await, Ok(true));
        assert!(list.get(created.id).unwrap().is_complete);
        assert_eq!(toggle_completion(&store, &mut list, created.id).await, Ok(false));
    }

    #[tokio::test]
    async fn toggle_of_untracked_task_is_a_validation_error() {
        let store = InMemoryStore::new();
        let mut list = Reconciler::new();
        let err = toggle_completion(&store, &mut list, 5).await.unwrap_err();
        assert!(err.is_validation());
    }
}
