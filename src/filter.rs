//! Filter selectors and the query constraints they expand to.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{TaskRecord, UserId};

/// Which slice of the collection the viewer is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSelector {
    #[default]
    All,
    AssignedToMe,
    CreatedByMe,
    Overdue,
    DueToday,
}

impl FilterSelector {
    /// Every selector, in display order.
    pub const ALL: [FilterSelector; 5] = [
        FilterSelector::All,
        FilterSelector::AssignedToMe,
        FilterSelector::CreatedByMe,
        FilterSelector::Overdue,
        FilterSelector::DueToday,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::AssignedToMe => "Assigned to me",
            Self::CreatedByMe => "Created by me",
            Self::Overdue => "Overdue",
            Self::DueToday => "Due today",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::AssignedToMe => "assigned_to_me",
            Self::CreatedByMe => "created_by_me",
            Self::Overdue => "overdue",
            Self::DueToday => "due_today",
        }
    }
}

impl fmt::Display for FilterSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown filter: {0}")]
pub struct ParseFilterError(String);

impl FromStr for FilterSelector {
    type Err = ParseFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|selector| selector.as_str() == s.trim())
            .ok_or_else(|| ParseFilterError(s.to_string()))
    }
}

/// A single predicate of a filtered read. Constraints in a set are ANDed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    AssigneeIs(UserId),
    CreatorIs(UserId),
    /// Due strictly before the instant.
    DueBefore(DateTime<Utc>),
    /// Due at or after the instant.
    DueAtOrAfter(DateTime<Utc>),
}

impl Constraint {
    /// Evaluates the predicate against a record. A record with no due date
    /// never satisfies a due-date predicate.
    pub fn matches(&self, task: &TaskRecord) -> bool {
        match self {
            Self::AssigneeIs(user) => task.is_assigned_to(user),
            Self::CreatorIs(user) => &task.creator_id == user,
            Self::DueBefore(at) => task.due_at.is_some_and(|due| due < *at),
            Self::DueAtOrAfter(at) => task.due_at.is_some_and(|due| due >= *at),
        }
    }
}

/// Expands a selector into the constraints of its snapshot query.
///
/// `now` fixes both the overdue cut-off and, through its time zone, the
/// local day used by [`FilterSelector::DueToday`].
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use taskers_live::filter::{constraints_for, Constraint, FilterSelector};
/// use taskers_live::task::UserId;
///
/// let me = UserId::new("u1");
/// let constraints = constraints_for(FilterSelector::CreatedByMe, &me, &Utc::now());
/// assert_eq!(constraints, vec![Constraint::CreatorIs(me)]);
/// ```
pub fn constraints_for<Tz: TimeZone>(
    selector: FilterSelector,
    viewer: &UserId,
    now: &DateTime<Tz>,
) -> Vec<Constraint> {
    let assigned = Constraint::AssigneeIs(viewer.clone());
    match selector {
        FilterSelector::All | FilterSelector::AssignedToMe => vec![assigned],
        FilterSelector::CreatedByMe => vec![Constraint::CreatorIs(viewer.clone())],
        FilterSelector::Overdue => {
            vec![assigned, Constraint::DueBefore(now.with_timezone(&Utc))]
        }
        FilterSelector::DueToday => {
            let tz = now.timezone();
            let today = now.date_naive();
            let start = local_midnight(&tz, today);
            let end = today
                .succ_opt()
                .map(|tomorrow| local_midnight(&tz, tomorrow))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            vec![
                assigned,
                Constraint::DueAtOrAfter(start),
                Constraint::DueBefore(end),
            ]
        }
    }
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(start) = tz.from_local_datetime(&midnight).earliest() {
        return start.with_timezone(&Utc);
    }
    // Midnight skipped by a DST jump: the day starts at the first valid minute.
    (1..=180)
        .map(|minutes| midnight + TimeDelta::minutes(minutes))
        .find_map(|candidate| tz.from_local_datetime(&candidate).earliest())
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}
