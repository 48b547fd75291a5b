//! A MapReduce coordinator and worker pool (spec §4.4–§4.5) built on the
//! same [`distlab_rpc::Rpc`] primitive the KV subsystem uses.

pub mod coordinator;
pub mod task;
pub mod worker;

pub use coordinator::{
    AssignTaskArgs, Coordinator, ReportTaskStatusArgs, ReportTaskStatusReply, ReportedStatus,
    TaskReply,
};
pub use task::{Task, TaskKind, TaskStatus};
pub use worker::{run as run_worker, run_map, run_reduce, KeyValue};

#[cfg(test)]
mod integration_test;
