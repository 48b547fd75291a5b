//! The Worker (spec §4.5): a stateless loop driven entirely by
//! `AssignTask` replies. `RunMap` partitions by a fixed 32-bit hash into
//! `R` buckets; `RunReduce` sorts and groups by key. Both publish their
//! output by create-temp-then-rename so a reader never observes a partial
//! file from a crashed worker.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use distlab_base::{err, Result};
use distlab_rpc::{EndpointId, Rpc};

use crate::coordinator::{
    AssignTaskArgs, ReportTaskStatusArgs, ReportTaskStatusReply, ReportedStatus, TaskReply,
};
use crate::task::TaskKind;

/// Delay between `WAIT` replies, and between retries of a failed
/// `AssignTask` call.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
}

/// A `(key, value)` pair produced by a user `map` function.
pub type KeyValue = (String, String);

/// Clears the sign bit so the bucket index is never negative when cast
/// down, mirroring the original's `ihash(key) & 0x7fffffff`.
fn partition_hash(key: &str) -> u32 {
    (rapidhash::rapidhash(key.as_bytes()) as u32) & 0x7fff_ffff
}

fn intermediate_path(dir: &Path, m: u32, r: u32) -> PathBuf {
    dir.join(format!("mr-{m}-{r}"))
}

fn output_path(dir: &Path, r: u32) -> PathBuf {
    dir.join(format!("mr-out-{r}"))
}

/// Writes `content` to a uniquely-named temp file under `dir` and
/// atomically renames it to `dest`. Same publish discipline regardless of
/// whether the writer races another worker producing the same file: the
/// last rename wins and both contents are equivalent (map/reduce are
/// assumed deterministic for a given input).
fn publish_atomically(dir: &Path, dest: &Path, write: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
    let tmp_name = format!(
        ".tmp-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    );
    let tmp_path = dir.join(tmp_name);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, dest)?;
    Ok(())
}

/// Runs one map task: reads `file`, applies `map_fn`, partitions the
/// output into `r` buckets, and publishes `mr-<m>-<r>` for each bucket
/// (spec §4.5 `RunMap`).
pub fn run_map(
    dir: &Path,
    m: u32,
    file: &Path,
    r: u32,
    map_fn: &dyn Fn(&str, &str) -> Vec<KeyValue>,
) -> Result<()> {
    let mut content = String::new();
    File::open(file)?.read_to_string(&mut content)?;
    let file_name = file.to_string_lossy().to_string();
    let pairs = map_fn(&file_name, &content);

    let mut buckets: Vec<Vec<Record>> = (0..r).map(|_| Vec::new()).collect();
    for (key, value) in pairs {
        let bucket = (partition_hash(&key) % r.max(1)) as usize;
        buckets[bucket].push(Record { key, value });
    }

    for (bucket_id, records) in buckets.into_iter().enumerate() {
        let bucket_id = bucket_id as u32;
        let dest = intermediate_path(dir, m, bucket_id);
        publish_atomically(dir, &dest, |w| {
            for record in &records {
                let bytes = rmp_serde::to_vec(record)?;
                w.write_all(&(bytes.len() as u32).to_le_bytes())?;
                w.write_all(&bytes)?;
            }
            Ok(())
        })?;
        tracing::debug!(m, r = bucket_id, records = records.len(), "published intermediate bucket");
    }
    Ok(())
}

/// Runs one reduce task: globs `mr-*-<r>`, decodes every record, sorts and
/// groups by key, and publishes `mr-out-<r>` (spec §4.5 `RunReduce`).
pub fn run_reduce(dir: &Path, r: u32, reduce_fn: &dyn Fn(&str, &[String]) -> String) -> Result<()> {
    let suffix = format!("-{r}");
    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("mr-") && name.ends_with(&suffix) && !name.starts_with("mr-out-") {
            records.extend(read_intermediate_file(&entry.path())?);
        }
    }

    records.sort_by(|a, b| a.key.cmp(&b.key));

    let dest = output_path(dir, r);
    publish_atomically(dir, &dest, |w| {
        let mut i = 0;
        while i < records.len() {
            let key = records[i].key.clone();
            let mut j = i;
            let mut values = Vec::new();
            while j < records.len() && records[j].key == key {
                values.push(records[j].value.clone());
                j += 1;
            }
            let output = reduce_fn(&key, &values);
            writeln!(w, "{key} {output}")?;
            i = j;
        }
        Ok(())
    })?;
    tracing::debug!(r, records = records.len(), "published reduce output");
    Ok(())
}

fn read_intermediate_file(path: &Path) -> Result<Vec<Record>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let mut records = Vec::new();
    let mut cursor = 0usize;
    while cursor + 4 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + len > bytes.len() {
            return Err(err(format!("truncated intermediate record in {}", path.display())));
        }
        let record: Record = rmp_serde::from_slice(&bytes[cursor..cursor + len])?;
        cursor += len;
        records.push(record);
    }
    Ok(records)
}

/// Drives the stateless `AssignTask`/`RunMap`/`RunReduce`/`Report` loop
/// until a `DONE` reply, using `map_fn`/`reduce_fn` as the user business
/// logic (spec §6: "Worker constructor takes user `map` and `reduce`
/// callables").
///
/// A transport failure on `AssignTask` is retried after `poll_interval`
/// rather than treated as fatal (spec §9's sanctioned enhancement beyond
/// the original's "log and loop"); any local I/O failure in `RunMap`/
/// `RunReduce` is fatal, since the coordinator's timeout is the recovery
/// path for a dead worker, not a worker-side retry.
pub fn run<R: Rpc>(
    rpc: &R,
    coordinator: EndpointId,
    dir: &Path,
    map_fn: impl Fn(&str, &str) -> Vec<KeyValue>,
    reduce_fn: impl Fn(&str, &[String]) -> String,
    poll_interval: Duration,
) -> Result<()> {
    loop {
        let reply = loop {
            match rpc.call::<AssignTaskArgs, TaskReply>(coordinator, "Coordinator.AssignTask", &AssignTaskArgs) {
                Ok(Some(reply)) => break reply,
                Ok(None) => {
                    tracing::debug!("AssignTask undelivered, retrying");
                    std::thread::sleep(poll_interval);
                }
                Err(e) => {
                    tracing::error!(error = ?e, "AssignTask transport error, retrying");
                    std::thread::sleep(poll_interval);
                }
            }
        };

        match reply {
            TaskReply::Map { id, file, r } => {
                run_map(dir, id, &file, r, &map_fn)?;
                report(rpc, coordinator, TaskKind::Map, id)?;
            }
            TaskReply::Reduce { id, r } => {
                run_reduce(dir, r, &reduce_fn)?;
                report(rpc, coordinator, TaskKind::Reduce, id)?;
            }
            TaskReply::Wait => {
                std::thread::sleep(poll_interval);
            }
            TaskReply::Done => return Ok(()),
        }
    }
}

/// An undelivered report is just as fatal as a local I/O error (spec §4.5:
/// "any local I/O or RPC error is fatal to the worker process"). Unlike
/// `AssignTask`, nothing in the spec or its supplements sanctions retrying
/// `ReportTaskStatus`, so a dropped reply surfaces as an error rather than
/// being silently treated as success.
fn report<R: Rpc>(rpc: &R, coordinator: EndpointId, kind: TaskKind, id: u32) -> Result<()> {
    let args = ReportTaskStatusArgs {
        kind,
        id,
        status: ReportedStatus::Completed,
    };
    let reply: Option<ReportTaskStatusReply> =
        rpc.call(coordinator, "Coordinator.ReportTaskStatus", &args)?;
    reply.ok_or_else(|| err(format!("ReportTaskStatus undelivered for {kind:?} {id}")))?;
    Ok(())
}
