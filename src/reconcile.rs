//! The authoritative in-memory task list.
//!
//! [`Reconciler`] folds three unordered inputs into one ordered,
//! de-duplicated list: the snapshot of a filtered read, change-feed events,
//! and the results of local commands. There is no global sequence number, so
//! every entry point is an idempotent merge keyed by task id:
//!
//! - inserts never duplicate an id that is already tracked,
//! - updates and deletes of untracked ids are no-ops,
//! - positions are fixed at first insertion.
//!
//! Because the change feed is collection-wide, only inserts need a
//! membership decision. That decision is delegated to [`Membership`], which
//! carries the viewer explicitly.

use chrono::{DateTime, Local, TimeZone};
use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::filter::{constraints_for, FilterSelector};
use crate::store::ChangeEvent;
use crate::task::{TaskId, TaskRecord, UserId};

/// Which live inserts a view accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPolicy {
    /// Accept records assigned to the viewer, whatever the active filter.
    /// A conservative stand-in for the filter: under `CreatedByMe`,
    /// `Overdue` or `DueToday` it can admit or miss inserts the snapshot
    /// query would have treated differently.
    #[default]
    AssignedToViewer,
    /// Re-evaluate the active filter's constraints against the record.
    ActiveFilter,
}

impl FromStr for InsertPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "assigned_to_viewer" => Ok(Self::AssignedToViewer),
            "active_filter" => Ok(Self::ActiveFilter),
            other => Err(format!("unknown insert policy: {other}")),
        }
    }
}

/// Who is looking and through which filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    viewer: UserId,
    filter: FilterSelector,
    policy: InsertPolicy,
}

impl Membership {
    pub fn new(viewer: UserId, filter: FilterSelector, policy: InsertPolicy) -> Self {
        Self {
            viewer,
            filter,
            policy,
        }
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    pub fn filter(&self) -> FilterSelector {
        self.filter
    }

    pub fn policy(&self) -> InsertPolicy {
        self.policy
    }

    /// Whether a live insert belongs in this view, evaluated now.
    pub fn admits(&self, task: &TaskRecord) -> bool {
        self.admits_at(task, &Local::now())
    }

    pub fn admits_at<Tz: TimeZone>(&self, task: &TaskRecord, now: &DateTime<Tz>) -> bool {
        match self.policy {
            InsertPolicy::AssignedToViewer => task.is_assigned_to(&self.viewer),
            InsertPolicy::ActiveFilter => constraints_for(self.filter, &self.viewer, now)
                .iter()
                .all(|c| c.matches(task)),
        }
    }
}

/// What an entry point did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended,
    Replaced,
    Removed,
    Ignored,
}

impl Applied {
    pub fn changed(self) -> bool {
        self != Self::Ignored
    }
}

/// Ordered task list keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    entries: IndexMap<TaskId, TaskRecord>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole list. Records keep the order they arrive in; a
    /// repeated id keeps its first position and its last value.
    pub fn apply_snapshot(&mut self, records: impl IntoIterator<Item = TaskRecord>) {
        self.entries.clear();
        for record in records {
            self.entries.insert(record.id, record);
        }
    }

    /// Folds a live insert. Appends only if `membership` admits the record
    /// and its id is not tracked yet.
    pub fn apply_created(&mut self, record: TaskRecord, membership: &Membership) -> Applied {
        if !membership.admits(&record) {
            return Applied::Ignored;
        }
        self.append_new(record)
    }

    /// Replaces a tracked record in place. Untracked ids are outside the view.
    pub fn apply_updated(&mut self, record: TaskRecord) -> Applied {
        match self.entries.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                Applied::Replaced
            }
            None => Applied::Ignored,
        }
    }

    pub fn apply_deleted(&mut self, id: TaskId) -> Applied {
        match self.entries.shift_remove(&id) {
            Some(_) => Applied::Removed,
            None => Applied::Ignored,
        }
    }

    /// Appends the store's answer to a successful create without waiting for
    /// its `Created` event, which is then absorbed as a duplicate.
    pub fn apply_local_insert(&mut self, record: TaskRecord) -> Applied {
        self.append_new(record)
    }

    pub fn apply_local_delete(&mut self, id: TaskId) -> Applied {
        self.apply_deleted(id)
    }

    pub fn apply_local_toggle(&mut self, id: TaskId, is_complete: bool) -> Applied {
        match self.entries.get_mut(&id) {
            Some(task) => {
                task.is_complete = is_complete;
                Applied::Replaced
            }
            None => Applied::Ignored,
        }
    }

    pub fn apply_event(&mut self, event: ChangeEvent, membership: &Membership) -> Applied {
        match event {
            ChangeEvent::Created(record) => self.apply_created(record, membership),
            ChangeEvent::Updated(record) => self.apply_updated(record),
            ChangeEvent::Deleted(id) => self.apply_deleted(id),
        }
    }

    fn append_new(&mut self, record: TaskRecord) -> Applied {
        match self.entries.entry(record.id) {
            Entry::Occupied(_) => Applied::Ignored,
            Entry::Vacant(slot) => {
                slot.insert(record);
                Applied::Appended
            }
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &TaskRecord> + '_ {
        self.entries.values()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.keys().copied().collect()
    }
}
