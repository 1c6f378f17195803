//! The coordinator: task registry, dispatch queue, intermediate-shard
//! catalog, phase state, and the reaper that re-queues timed-out tasks.
//!
//! Exposes two RPC operations (`allocate_task`, `task_complete`) and one
//! local, non-RPC query (`done`), matching spec §4.3/§6.

use std::cmp::max;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::{ready, Ready};
use tarpc::context;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::mr::types::{
    Ack, AllocateRequest, Phase, ResultKind, Task, TaskKind, TaskMeta, TaskResult, TaskStatus,
};

/// How long a task may sit InProgress before the reaper re-queues it.
const TASK_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum sleep between reaper passes. The original source's reaper
/// busy-loops with no sleep at all; spec §9 calls that out as the one bug
/// that must be fixed in any faithful reimplementation.
const REAPER_INTERVAL: Duration = Duration::from_millis(750);

struct Registry {
    metas: HashMap<i64, TaskMeta>,
    catalog: Vec<Vec<String>>,
    phase: Phase,
    queue_rx: mpsc::Receiver<Task>,
    n_map: i64,
    n_reduce: i64,
}

impl Registry {
    /// Replace the registry with a fresh set of Reduce tasks built from the
    /// intermediate catalog, and enqueue them. Called either at
    /// construction time (when there are zero Map tasks to run) or from
    /// inside the completion handler that observed the last Map
    /// completion.
    fn enter_reduce_phase(&mut self, queue_tx: &mpsc::Sender<Task>) {
        self.phase = Phase::Reduce;
        self.metas.clear();
        for r in 0..self.n_reduce {
            let task = Task {
                id: r,
                kind: TaskKind::Reduce {
                    intermediates: self.catalog[r as usize].clone(),
                },
                n_map: self.n_map,
                n_reduce: self.n_reduce,
            };
            self.metas.insert(
                r,
                TaskMeta {
                    id: r,
                    status: TaskStatus::Idle,
                    task: task.clone(),
                    started_at: None,
                },
            );
            // Sized to hold n_reduce tasks (see Coordinator::new), so this
            // can't actually block or drop.
            if queue_tx.try_send(task).is_err() {
                warn!(reducer = r, "dispatch queue unexpectedly full at phase transition");
            }
        }
        // A job with n_reduce == 0 has no Reduce tasks to wait on; the
        // phase is vacuously complete the moment it's entered.
        self.advance_if_complete(queue_tx);
    }

    fn all_completed(&self) -> bool {
        self.metas.values().all(|m| m.status == TaskStatus::Completed)
    }

    /// If every task in the current phase is Completed (including
    /// vacuously, when there are none), perform the next phase
    /// transition. Called after every completion, and once up front so a
    /// job with zero Map or zero Reduce tasks doesn't stall.
    fn advance_if_complete(&mut self, queue_tx: &mpsc::Sender<Task>) {
        if !self.all_completed() {
            return;
        }
        match self.phase {
            Phase::Map => {
                info!("map phase complete, transitioning to reduce");
                self.enter_reduce_phase(queue_tx);
            }
            Phase::Reduce => {
                info!("reduce phase complete, transitioning to exit");
                self.phase = Phase::Exit;
            }
            Phase::Exit => {}
        }
    }
}

/// Owned, explicitly-passed coordinator state (spec §9: no hidden
/// process-wide singleton). `Coordinator` is cheap to clone: the registry
/// lives behind an `Arc<Mutex<_>>`, and `queue_tx` is itself a cloneable
/// multi-producer handle, so the tarpc dispatcher, the reaper task, and the
/// binary's `Done()` poller can each hold their own copy.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Mutex<Registry>>,
    queue_tx: mpsc::Sender<Task>,
}

impl Coordinator {
    /// Create a coordinator for `files` (one Map task per file) with
    /// `n_reduce` reducers, and seed the dispatch queue.
    pub fn new(files: Vec<String>, n_reduce: i64) -> Self {
        let n_map = files.len() as i64;
        let capacity = max(max(n_map, n_reduce), 1) as usize;
        let (queue_tx, queue_rx) = mpsc::channel(capacity);

        let mut registry = Registry {
            metas: HashMap::new(),
            catalog: vec![Vec::new(); n_reduce as usize],
            phase: Phase::Map,
            queue_rx,
            n_map,
            n_reduce,
        };

        if n_map == 0 {
            // Zero input files: the Map phase is trivially complete (spec
            // §8 seed case 5), so skip straight to Reduce with empty
            // shard sets for every reducer.
            registry.enter_reduce_phase(&queue_tx);
        } else {
            for (i, filename) in files.into_iter().enumerate() {
                let id = i as i64;
                let task = Task {
                    id,
                    kind: TaskKind::Map { filename },
                    n_map,
                    n_reduce,
                };
                registry.metas.insert(
                    id,
                    TaskMeta {
                        id,
                        status: TaskStatus::Idle,
                        task: task.clone(),
                        started_at: None,
                    },
                );
                queue_tx
                    .try_send(task)
                    .expect("dispatch queue is sized to hold every initial task");
            }
        }

        Self { inner: Arc::new(Mutex::new(registry)), queue_tx }
    }

    /// `AllocateTask`: Exit wins unconditionally once the phase is Exit;
    /// otherwise dequeue an Idle task if one is ready, else tell the
    /// worker to Wait.
    fn poll_allocate(&self) -> Task {
        let mut reg = self.inner.lock().unwrap();
        if reg.phase == Phase::Exit {
            return Task::exit();
        }
        match reg.queue_rx.try_recv() {
            Ok(task) => {
                if let Some(meta) = reg.metas.get_mut(&task.id) {
                    meta.status = TaskStatus::InProgress;
                    meta.started_at = Some(Instant::now());
                }
                debug!(task_id = task.id, "dispatched task");
                task
            }
            Err(_) => Task::wait(),
        }
    }

    /// `TaskComplete`: the already-Completed check is the first gate, so a
    /// completion racing a timeout re-dispatch can never double-append to
    /// the intermediate catalog (spec §9 open question).
    fn record_completion(&self, result: TaskResult) {
        let mut reg = self.inner.lock().unwrap();

        let Some(meta) = reg.metas.get(&result.id) else {
            warn!(task_id = result.id, "TaskComplete for unknown task id, ignoring");
            return;
        };
        if meta.status == TaskStatus::Completed {
            debug!(task_id = result.id, "duplicate completion, ignoring");
            return;
        }
        let phase_matches = matches!(
            (reg.phase, &result.kind),
            (Phase::Map, ResultKind::Map { .. }) | (Phase::Reduce, ResultKind::Reduce)
        );
        if !phase_matches {
            debug!(task_id = result.id, "stale completion from a previous phase, ignoring");
            return;
        }

        reg.metas.get_mut(&result.id).unwrap().status = TaskStatus::Completed;

        if let ResultKind::Map { intermediates } = &result.kind {
            for (r, path) in intermediates.iter().enumerate() {
                reg.catalog[r].push(path.clone());
            }
        }
        info!(task_id = result.id, "task completed");

        reg.advance_if_complete(&self.queue_tx);
    }

    /// Local query, not an RPC: polled by the host to decide when to tear
    /// down (spec §4.3/§6).
    pub fn done(&self) -> bool {
        self.inner.lock().unwrap().phase == Phase::Exit
    }
}

/// Background reaper ("catchTimeout"): periodically scans the registry for
/// InProgress tasks that have exceeded `TASK_TIMEOUT`, flips them back to
/// Idle, and re-enqueues their canonical `Task` descriptor. Holds the lock
/// only for the scan itself, and releases it between passes so allocation
/// and completion are never starved (spec §4.3/§5).
pub async fn run_reaper(coordinator: Coordinator) {
    loop {
        {
            let mut reg = coordinator.inner.lock().unwrap();
            if reg.phase == Phase::Exit {
                return;
            }
            let now = Instant::now();
            let timed_out: Vec<i64> = reg
                .metas
                .iter()
                .filter(|(_, meta)| {
                    meta.status == TaskStatus::InProgress
                        && meta
                            .started_at
                            .map(|started| now.duration_since(started) >= TASK_TIMEOUT)
                            .unwrap_or(false)
                })
                .map(|(id, _)| *id)
                .collect();
            for id in timed_out {
                if let Some(meta) = reg.metas.get_mut(&id) {
                    meta.status = TaskStatus::Idle;
                    let task = meta.task.clone();
                    if coordinator.queue_tx.try_send(task).is_err() {
                        warn!(task_id = id, "dispatch queue unexpectedly full while re-queueing");
                    } else {
                        warn!(task_id = id, "task timed out, re-dispatched");
                    }
                }
            }
        }
        tokio::time::sleep(REAPER_INTERVAL).await;
    }
}

/// RPC surface exposed to workers.
#[tarpc::service]
pub trait Server {
    async fn allocate_task(req: AllocateRequest) -> Task;
    async fn task_complete(result: TaskResult) -> Ack;
}

#[tarpc::server]
impl Server for Coordinator {
    type AllocateTaskFut = Ready<Task>;
    type TaskCompleteFut = Ready<Ack>;

    fn allocate_task(self, _: context::Context, _req: AllocateRequest) -> Self::AllocateTaskFut {
        ready(self.poll_allocate())
    }

    fn task_complete(self, _: context::Context, result: TaskResult) -> Self::TaskCompleteFut {
        self.record_completion(result);
        ready(Ack { ok: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_result(id: i64, n_reduce: i64) -> TaskResult {
        TaskResult {
            id,
            kind: ResultKind::Map {
                intermediates: (0..n_reduce).map(|r| format!("mr-{}-{}", id, r)).collect(),
            },
        }
    }

    #[test]
    fn allocate_returns_exit_when_there_is_nothing_to_do() {
        let c = Coordinator::new(Vec::new(), 0);
        // Zero files + zero reducers skips straight to Exit.
        assert!(matches!(c.poll_allocate().kind, TaskKind::Exit));
    }

    #[test]
    fn zero_input_files_skips_map_and_produces_empty_reduce_tasks() {
        let c = Coordinator::new(Vec::new(), 3);
        assert!(!c.done());
        for _ in 0..3 {
            let task = c.poll_allocate();
            match task.kind {
                TaskKind::Reduce { ref intermediates } => assert!(intermediates.is_empty()),
                other => panic!("expected a Reduce task, got {:?}", other),
            }
            c.record_completion(TaskResult { id: task.id, kind: ResultKind::Reduce });
        }
        assert!(c.done());
    }

    #[test]
    fn map_phase_transitions_to_reduce_only_once_all_map_tasks_complete() {
        let c = Coordinator::new(vec!["a.txt".into(), "b.txt".into()], 2);
        let t0 = c.poll_allocate();
        let t1 = c.poll_allocate();
        assert!(matches!(c.poll_allocate().kind, TaskKind::Wait));

        c.record_completion(map_result(t0.id, 2));
        // Still in Map phase: reduce tasks aren't available yet.
        assert!(matches!(c.poll_allocate().kind, TaskKind::Wait));

        c.record_completion(map_result(t1.id, 2));
        // Now both reduce tasks should be dispatchable.
        let r0 = c.poll_allocate();
        let r1 = c.poll_allocate();
        assert!(matches!(r0.kind, TaskKind::Reduce { .. }));
        assert!(matches!(r1.kind, TaskKind::Reduce { .. }));
    }

    #[test]
    fn catalog_has_n_map_entries_per_reducer_at_map_phase_end() {
        let c = Coordinator::new(vec!["a.txt".into(), "b.txt".into(), "c.txt".into()], 2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(c.poll_allocate().id);
        }
        for id in ids {
            c.record_completion(map_result(id, 2));
        }
        let r0 = c.poll_allocate();
        match &r0.kind {
            TaskKind::Reduce { intermediates } => assert_eq!(intermediates.len(), 3),
            other => panic!("expected Reduce, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_completion_is_silently_idempotent() {
        let c = Coordinator::new(vec!["a.txt".into()], 1);
        let t0 = c.poll_allocate();
        c.record_completion(map_result(t0.id, 1));
        let r0 = c.poll_allocate();
        match &r0.kind {
            TaskKind::Reduce { intermediates } => assert_eq!(intermediates.len(), 1),
            other => panic!("expected Reduce, got {:?}", other),
        }
        // A second completion for the already-completed map task must not
        // double-append to the catalog.
        c.record_completion(map_result(t0.id, 1));
        c.record_completion(TaskResult { id: r0.id, kind: ResultKind::Reduce });
        assert!(c.done());
    }

    #[test]
    fn stale_completion_from_previous_phase_is_ignored() {
        let c = Coordinator::new(vec!["a.txt".into()], 1);
        let t0 = c.poll_allocate();
        c.record_completion(map_result(t0.id, 1));
        let r0 = c.poll_allocate();
        c.record_completion(TaskResult { id: r0.id, kind: ResultKind::Reduce });
        assert!(c.done());

        // A late Map completion arriving after Reduce (and Exit) must be a
        // silent no-op, not a panic or an invariant violation.
        c.record_completion(map_result(t0.id, 1));
        assert!(c.done());
    }

    #[test]
    fn exit_wins_unconditionally_once_phase_is_exit() {
        let c = Coordinator::new(Vec::new(), 1);
        let r0 = c.poll_allocate();
        c.record_completion(TaskResult { id: r0.id, kind: ResultKind::Reduce });
        assert!(c.done());
        for _ in 0..5 {
            assert!(matches!(c.poll_allocate().kind, TaskKind::Exit));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_requeues_a_timed_out_task() {
        let c = Coordinator::new(vec!["a.txt".into()], 1);
        let t0 = c.poll_allocate();

        let reaper = tokio::spawn(run_reaper(c.clone()));

        // Not yet timed out: advancing by less than TASK_TIMEOUT must not
        // re-dispatch the task.
        tokio::time::advance(TASK_TIMEOUT - Duration::from_secs(1)).await;
        assert!(matches!(c.poll_allocate().kind, TaskKind::Wait));

        // Past the timeout (plus one reaper pass), the task comes back.
        tokio::time::advance(Duration::from_secs(1) + REAPER_INTERVAL).await;
        let redispatched = c.poll_allocate();
        assert_eq!(redispatched.id, t0.id);

        // Completing the task lets the reaper's own exit-on-Phase::Exit
        // path end the spawned loop instead of leaking it.
        c.record_completion(TaskResult { id: t0.id, kind: ResultKind::Map { intermediates: vec!["mr-0-0".into()] } });
        let r0 = c.poll_allocate();
        c.record_completion(TaskResult { id: r0.id, kind: ResultKind::Reduce });
        assert!(c.done());
        tokio::time::advance(REAPER_INTERVAL).await;
        reaper.await.unwrap();
    }
}
