use thiserror::Error;

/// Errors local to a single worker or coordinator pass.
///
/// None of these ever cross the RPC boundary (see spec §7): a worker that
/// hits one logs and exits, relying on the coordinator's timeout to
/// re-dispatch the task to someone else.
#[derive(Debug, Error)]
pub enum MrError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to publish file atomically: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode intermediate record: {0}")]
    Decode(#[from] serde_json::Error),
}
