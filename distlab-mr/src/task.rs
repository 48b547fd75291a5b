//! Task bookkeeping shared by the map and reduce tables (spec §3).

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskStatus {
    Idle,
    InProgress,
    Completed,
}

/// One map or reduce unit of work. `file` is set only for map tasks; reduce
/// tasks address their inputs by glob (`mr-*-r`) rather than by a single
/// path. `assigned_at` is `None` until the task is first handed out and is
/// restamped on every reassignment.
#[derive(Clone, Debug)]
pub struct Task {
    pub id: u32,
    pub kind: TaskKind,
    pub file: Option<PathBuf>,
    pub status: TaskStatus,
    pub assigned_at: Option<Instant>,
}

impl Task {
    pub fn new_map(id: u32, file: PathBuf) -> Self {
        Self {
            id,
            kind: TaskKind::Map,
            file: Some(file),
            status: TaskStatus::Idle,
            assigned_at: None,
        }
    }

    pub fn new_reduce(id: u32) -> Self {
        Self {
            id,
            kind: TaskKind::Reduce,
            file: None,
            status: TaskStatus::Idle,
            assigned_at: None,
        }
    }

    /// Eligible for assignment if idle, or in progress for longer than
    /// `timeout` (spec §4.4 step 1).
    pub fn eligible(&self, now: Instant, timeout: std::time::Duration) -> bool {
        match self.status {
            TaskStatus::Idle => true,
            TaskStatus::InProgress => match self.assigned_at {
                Some(at) => now.duration_since(at) > timeout,
                None => true,
            },
            TaskStatus::Completed => false,
        }
    }

    pub fn assign(&mut self, now: Instant) {
        self.status = TaskStatus::InProgress;
        self.assigned_at = Some(now);
    }
}
