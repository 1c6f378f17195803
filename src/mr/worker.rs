//! The worker runtime: a stateless loop that pulls a task descriptor,
//! dispatches on its kind, executes Map or Reduce, and reports completion.
//!
//! Unlike the original source's `Worker` struct, nothing is retained
//! between iterations (spec §4.2): each poll produces a task, the task is
//! driven to completion (or the worker exits on failure), and the loop
//! goes around again. A transport failure on either RPC call is fatal for
//! the worker; the coordinator's timeout will re-dispatch the task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tarpc::context;
use tracing::{debug, info, warn};

use crate::mr::coordinator::ServerClient;
use crate::mr::error::MrError;
use crate::mr::function::{MapFn, ReduceFn};
use crate::mr::hash::shard_for_key;
use crate::mr::publish::{publish_lines, publish_records, read_records};
use crate::mr::types::{AllocateRequest, KeyValue, ResultKind, Task, TaskKind, TaskResult};

/// How long to sleep between polls when the coordinator has no work yet.
const WAIT_INTERVAL: Duration = Duration::from_secs(3);

/// Drive the worker loop to completion. Returns once the coordinator signals
/// Exit, or once a transport failure makes continuing impossible.
///
/// Intermediate and output files are published under `work_dir`, which must
/// be the same path on every worker that participates in the job (spec §6:
/// "a shared local filesystem is assumed").
pub async fn run(
    client: ServerClient,
    work_dir: PathBuf,
    map_fn: Arc<dyn MapFn>,
    reduce_fn: Arc<dyn ReduceFn>,
) -> anyhow::Result<()> {
    loop {
        let task = match client.allocate_task(context::current(), AllocateRequest::default()).await {
            Ok(task) => task,
            Err(e) => {
                // Preserves the original leniency of treating a dial/call
                // failure as clean termination (spec §9 open question),
                // but logs the distinction instead of masking it.
                warn!(error = %e, "transport failure calling AllocateTask, exiting");
                return Ok(());
            }
        };

        match task.kind {
            TaskKind::Map { .. } => {
                let result = match do_map(&task, &work_dir, &*map_fn).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(task_id = task.id, error = %e, "map task failed, exiting");
                        return Ok(());
                    }
                };
                if let Err(e) = client.task_complete(context::current(), result).await {
                    warn!(error = %e, "transport failure calling TaskComplete, exiting");
                    return Ok(());
                }
            }
            TaskKind::Reduce { .. } => {
                let result = match do_reduce(&task, &work_dir, &*reduce_fn).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(task_id = task.id, error = %e, "reduce task failed, exiting");
                        return Ok(());
                    }
                };
                if let Err(e) = client.task_complete(context::current(), result).await {
                    warn!(error = %e, "transport failure calling TaskComplete, exiting");
                    return Ok(());
                }
            }
            TaskKind::Wait => {
                debug!("no task available, waiting");
                tokio::time::sleep(WAIT_INTERVAL).await;
            }
            TaskKind::Exit => {
                info!("coordinator signaled exit");
                return Ok(());
            }
        }
    }
}

async fn do_map(task: &Task, work_dir: &Path, map_fn: &dyn MapFn) -> Result<TaskResult, MrError> {
    let TaskKind::Map { ref filename } = task.kind else {
        unreachable!("do_map called with a non-Map task");
    };

    let contents = tokio::fs::read_to_string(filename).await?;
    let pairs = map_fn.map(filename, &contents);

    let n_reduce = task.n_reduce;
    let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); n_reduce as usize];
    for kv in pairs {
        let shard = shard_for_key(&kv.key, n_reduce) as usize;
        buckets[shard].push(kv);
    }

    let mut shard_paths = Vec::with_capacity(n_reduce as usize);
    for (r, bucket) in buckets.into_iter().enumerate() {
        let final_path = work_dir.join(format!("mr-{}-{}", task.id, r));
        publish_records(work_dir, &final_path, &bucket).await?;
        shard_paths.push(final_path.to_string_lossy().into_owned());
    }

    info!(task_id = task.id, "map task finished");
    Ok(TaskResult { id: task.id, kind: ResultKind::Map { intermediates: shard_paths } })
}

async fn do_reduce(task: &Task, work_dir: &Path, reduce_fn: &dyn ReduceFn) -> Result<TaskResult, MrError> {
    let TaskKind::Reduce { ref intermediates } = task.kind else {
        unreachable!("do_reduce called with a non-Reduce task");
    };

    let paths: Vec<PathBuf> = intermediates.iter().map(PathBuf::from).collect();
    let mut kvs: Vec<KeyValue> = tokio::task::spawn_blocking(move || -> Result<_, MrError> {
        let mut all = Vec::new();
        for path in &paths {
            all.extend(read_records(path)?);
        }
        Ok(all)
    })
    .await
    .map_err(|e| MrError::Transport(e.to_string()))??;

    // Stable sort by key, then walk contiguous runs of equal keys.
    kvs.sort_by(|a, b| a.key.cmp(&b.key));

    let mut lines = Vec::new();
    let mut i = 0;
    while i < kvs.len() {
        let mut j = i + 1;
        while j < kvs.len() && kvs[j].key == kvs[i].key {
            j += 1;
        }
        let values: Vec<String> = kvs[i..j].iter().map(|kv| kv.value.clone()).collect();
        let output = reduce_fn.reduce(&kvs[i].key, &values);
        lines.push(format!("{} {}\n", kvs[i].key, output));
        i = j;
    }

    let final_path = work_dir.join(format!("mr-out-{}", task.id));
    publish_lines(work_dir, &final_path, &lines).await?;

    info!(task_id = task.id, "reduce task finished");
    Ok(TaskResult { id: task.id, kind: ResultKind::Reduce })
}
