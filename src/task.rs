use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Store-assigned task identifier.
pub type TaskId = i64;

/// Identity-provider user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the shared task collection, as the store returns it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub description: Option<String>,
    pub creator_id: UserId,
    pub assignee_id: Option<UserId>,
    pub assigned_by: UserId,
    pub due_at: Option<DateTime<Utc>>,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    pub fn is_assigned_to(&self, user: &UserId) -> bool {
        self.assignee_id.as_ref() == Some(user)
    }
}

/// A registered user. Only registered users can be assigned tasks.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new task. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub description: String,
    pub creator_id: UserId,
    pub assignee_id: UserId,
    pub assigned_by: UserId,
    pub due_at: Option<DateTime<Utc>>,
}

/// Partial update of a task row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub is_complete: Option<bool>,
}

impl TaskPatch {
    pub fn completion(is_complete: bool) -> Self {
        Self {
            is_complete: Some(is_complete),
        }
    }

    pub fn apply_to(&self, task: &mut TaskRecord) {
        if let Some(is_complete) = self.is_complete {
            task.is_complete = is_complete;
        }
    }
}

const LOCAL_DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Normalizes free-form due input, interpreting wall-clock forms in the
/// process-local time zone. See [`normalize_due_input_in`].
pub fn normalize_due_input(input: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
    normalize_due_input_in(input, &Local)
}

/// Normalizes due input to an absolute timestamp.
///
/// Blank input means "no due date". RFC 3339 input keeps its own offset;
/// `YYYY-MM-DDTHH:MM[:SS]`, `YYYY-MM-DD HH:MM` and `YYYY-MM-DD` (midnight)
/// are read as wall-clock time in `tz`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use taskers_live::task::normalize_due_input_in;
///
/// let due = normalize_due_input_in("2024-01-01T09:00", &Utc).unwrap();
/// assert_eq!(due, Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));
/// assert_eq!(normalize_due_input_in("   ", &Utc).unwrap(), None);
/// assert!(normalize_due_input_in("next tuesday", &Utc).is_err());
/// ```
pub fn normalize_due_input_in<Tz: TimeZone>(
    input: &str,
    tz: &Tz,
) -> Result<Option<DateTime<Utc>>, SyncError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    let naive = LOCAL_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
        .ok_or_else(|| SyncError::Validation(format!("unrecognized due date: {input}")))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|due| Some(due.with_timezone(&Utc)))
        .ok_or_else(|| {
            SyncError::Validation(format!("due date {input} does not exist in the local time zone"))
        })
}
