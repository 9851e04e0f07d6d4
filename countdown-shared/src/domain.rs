use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Task whose countdown also holds the foreground elevation.
pub const PRIMARY_TASK_ID: &str = "001";
pub const SECONDARY_TASK_ID: &str = "002";

pub const PRIMARY_PROGRESS_SLOT: NotificationSlot = NotificationSlot(0xCA7);
pub const SECONDARY_PROGRESS_SLOT: NotificationSlot = NotificationSlot(0xCA9);

/// Fallback progress slots are `clock_millis % FALLBACK_SLOT_MODULUS`.
pub const FALLBACK_SLOT_MODULUS: i32 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskIdError {
    #[error("task id must not be empty")]
    Empty,
}

/// Opaque, non-empty identifier of one countdown request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    pub fn parse(value: &str) -> Result<Self, TaskIdError> {
        if value.is_empty() {
            return Err(TaskIdError::Empty);
        }
        Ok(TaskId(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_primary(&self) -> bool {
        self.0 == PRIMARY_TASK_ID
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskId::parse(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = TaskIdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(TaskIdError::Empty);
        }
        Ok(TaskId(value))
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

/// Numeric key under which a notification is created, updated or replaced.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationSlot(pub i32);

impl fmt::Display for NotificationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl NotificationSlot {
    /// Next usable slot in the fallback range, wrapping at the modulus and
    /// skipping reserved slots.
    pub fn next_fallback(self) -> Self {
        let mut next = self;
        loop {
            next = NotificationSlot((next.0.rem_euclid(FALLBACK_SLOT_MODULUS) + 1) % FALLBACK_SLOT_MODULUS);
            if !next.is_reserved() {
                return next;
            }
        }
    }

    /// Slots owned by the recognized ids: their progress slots and their
    /// completion popups.
    pub fn is_reserved(self) -> bool {
        self == PRIMARY_PROGRESS_SLOT
            || self == SECONDARY_PROGRESS_SLOT
            || self.0 == java_string_hash(PRIMARY_TASK_ID)
            || self.0 == java_string_hash(SECONDARY_TASK_ID)
    }
}

/// Progress slot reserved for one of the recognized task ids.
pub fn fixed_progress_slot(task_id: &TaskId) -> Option<NotificationSlot> {
    match task_id.as_str() {
        PRIMARY_TASK_ID => Some(PRIMARY_PROGRESS_SLOT),
        SECONDARY_TASK_ID => Some(SECONDARY_PROGRESS_SLOT),
        _ => None,
    }
}

/// Resolves the progress slot for `task_id`.
///
/// Unrecognized ids get a slot derived from `now_millis`, moved forward if
/// it lands on a reserved slot. Two such ids resolved within the same
/// millisecond window collide; callers that run countdowns side by side must
/// de-duplicate.
pub fn resolve_progress_slot(task_id: &TaskId, now_millis: i64) -> NotificationSlot {
    fixed_progress_slot(task_id).unwrap_or_else(|| {
        let slot = NotificationSlot(now_millis.rem_euclid(FALLBACK_SLOT_MODULUS as i64) as i32);
        if slot.is_reserved() {
            slot.next_fallback()
        } else {
            slot
        }
    })
}

/// Slot of the completion popup: the Java `String.hashCode` of the id.
pub fn completion_slot(task_id: &TaskId) -> NotificationSlot {
    NotificationSlot(java_string_hash(task_id.as_str()))
}

/// `s[0]*31^(n-1) + ... + s[n-1]` over UTF-16 code units, wrapping.
pub fn java_string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}
