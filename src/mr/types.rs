use serde::{Deserialize, Serialize};

/// A key-value pair as produced by a Map function and consumed by a Reduce
/// function. Stored one-per-line, JSON-encoded, in intermediate shard files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }
}

/// What kind of work a `Task` represents, and the data needed to perform it.
///
/// Replaces the shared-integer discriminant of the original source (see
/// spec §9): `TaskKind` and `Phase` are distinct types, so a `TaskComplete`
/// phase check is an explicit variant comparison rather than an int compare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskKind {
    Map { filename: String },
    Reduce { intermediates: Vec<String> },
    Wait,
    Exit,
}

/// A task descriptor as handed to a worker by `AllocateTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub n_map: i64,
    pub n_reduce: i64,
}

impl Task {
    pub fn wait() -> Self {
        Task { id: -1, kind: TaskKind::Wait, n_map: 0, n_reduce: 0 }
    }

    pub fn exit() -> Self {
        Task { id: -1, kind: TaskKind::Exit, n_map: 0, n_reduce: 0 }
    }
}

/// Coordinator-only bookkeeping for a task. Never sent over the wire.
#[derive(Debug, Clone)]
pub struct TaskMeta {
    pub id: i64,
    pub status: TaskStatus,
    pub task: Task,
    pub started_at: Option<std::time::Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Idle,
    InProgress,
    Completed,
}

/// The coordinator's overall phase. Monotonic: Map -> Reduce -> Exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Map,
    Reduce,
    Exit,
}

/// What a worker reports back to `TaskComplete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResultKind {
    /// Exactly `n_reduce` shard paths, ordered by reducer index.
    Map { intermediates: Vec<String> },
    Reduce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: i64,
    pub kind: ResultKind,
}

/// Reserved for future use, as in the original RPC contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocateRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}
