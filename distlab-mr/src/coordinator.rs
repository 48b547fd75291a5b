//! The Coordinator (spec §4.4): two task tables under one mutex, a phase
//! barrier between them, and timeout-driven reassignment. Exposes
//! `AssignTask` and `ReportTaskStatus` over [`distlab_rpc`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use distlab_rpc::{EndpointId, LocalNetwork};

use crate::task::{Task, TaskKind, TaskStatus};

/// Nominal worker timeout before a task is eligible for reassignment.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssignTaskArgs;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskReply {
    Map { id: u32, file: PathBuf, r: u32 },
    Reduce { id: u32, r: u32 },
    Wait,
    Done,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ReportedStatus {
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportTaskStatusArgs {
    pub kind: TaskKind,
    pub id: u32,
    pub status: ReportedStatus,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReportTaskStatusReply;

struct State {
    map_tasks: Vec<Task>,
    reduce_tasks: Vec<Task>,
    completed_maps: u32,
    completed_reduces: u32,
    /// Count of stale/duplicate completion reports dropped, for
    /// observability only — never consulted by scheduling logic.
    dropped_reports: u64,
}

pub struct Coordinator {
    state: Mutex<State>,
    timeout: Duration,
    n: u32,
    r: u32,
}

impl Coordinator {
    pub fn new(input_files: Vec<PathBuf>, r: u32) -> Self {
        Self::with_timeout(input_files, r, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(input_files: Vec<PathBuf>, r: u32, timeout: Duration) -> Self {
        let n = input_files.len() as u32;
        let map_tasks = input_files
            .into_iter()
            .enumerate()
            .map(|(i, file)| Task::new_map(i as u32, file))
            .collect();
        let reduce_tasks = (0..r).map(Task::new_reduce).collect();
        Self {
            state: Mutex::new(State {
                map_tasks,
                reduce_tasks,
                completed_maps: 0,
                completed_reduces: 0,
                dropped_reports: 0,
            }),
            timeout,
            n,
            r,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Scan-and-assign per spec §4.4: map tasks first, then (only once all
    /// `N` maps are `COMPLETED`) reduce tasks, else `WAIT`; `DONE` once both
    /// phases are fully complete. Tie-breaking among eligible tasks within
    /// a phase is unordered — first-found-in-table wins.
    pub fn assign_task(&self, _args: &AssignTaskArgs) -> TaskReply {
        let now = Instant::now();
        let mut state = self.lock();
        let r = self.r;

        if let Some(task) = state
            .map_tasks
            .iter_mut()
            .find(|t| t.eligible(now, self.timeout))
        {
            task.assign(now);
            let id = task.id;
            let file = task.file.clone().expect("map task always has a file");
            tracing::debug!(id, "assigning map task");
            return TaskReply::Map { id, file, r };
        }
        if state.completed_maps < self.n {
            return TaskReply::Wait;
        }

        if let Some(task) = state
            .reduce_tasks
            .iter_mut()
            .find(|t| t.eligible(now, self.timeout))
        {
            task.assign(now);
            let id = task.id;
            tracing::debug!(id, "assigning reduce task");
            return TaskReply::Reduce { id, r };
        }
        if state.completed_reduces < self.r {
            return TaskReply::Wait;
        }

        TaskReply::Done
    }

    /// First-completion-wins (spec §4.4): only an `IN_PROGRESS → COMPLETED`
    /// transition is accepted; a report against an already-`COMPLETED` task
    /// (a straggler whose work was redone after reassignment) is dropped.
    pub fn report_task_status(&self, args: &ReportTaskStatusArgs) -> ReportTaskStatusReply {
        let mut state = self.lock();
        let index = match args.kind {
            TaskKind::Map => state.map_tasks.iter().position(|t| t.id == args.id),
            TaskKind::Reduce => state.reduce_tasks.iter().position(|t| t.id == args.id),
        };
        let Some(index) = index else {
            tracing::warn!(id = args.id, ?args.kind, "report for unknown task id");
            return ReportTaskStatusReply;
        };
        let status = match args.kind {
            TaskKind::Map => state.map_tasks[index].status,
            TaskKind::Reduce => state.reduce_tasks[index].status,
        };
        match status {
            TaskStatus::InProgress => {
                match args.kind {
                    TaskKind::Map => {
                        state.map_tasks[index].status = TaskStatus::Completed;
                        state.completed_maps += 1;
                    }
                    TaskKind::Reduce => {
                        state.reduce_tasks[index].status = TaskStatus::Completed;
                        state.completed_reduces += 1;
                    }
                }
                tracing::debug!(id = args.id, ?args.kind, "task completed");
            }
            TaskStatus::Completed => {
                state.dropped_reports += 1;
                tracing::debug!(
                    id = args.id,
                    ?args.kind,
                    dropped_reports = state.dropped_reports,
                    "dropping duplicate completion report"
                );
            }
            TaskStatus::Idle => {
                tracing::warn!(id = args.id, ?args.kind, "completion report for idle task, ignoring");
            }
        }
        ReportTaskStatusReply
    }

    /// Safe to call concurrently with the RPC handlers; takes the same
    /// mutex.
    pub fn done(&self) -> bool {
        let state = self.lock();
        state.completed_maps == self.n && state.completed_reduces == self.r
    }

    pub fn register_on(self: &Arc<Self>, net: &LocalNetwork, endpoint: EndpointId) {
        let c = Arc::clone(self);
        net.register(endpoint, "Coordinator.AssignTask", move |args: AssignTaskArgs| {
            c.assign_task(&args)
        });
        let c = Arc::clone(self);
        net.register(
            endpoint,
            "Coordinator.ReportTaskStatus",
            move |args: ReportTaskStatusArgs| c.report_task_status(&args),
        );
    }
}
