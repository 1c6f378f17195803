//! Atomic file publication and the intermediate record-stream encoding.
//!
//! Any file visible to another worker is written to a temp file in the
//! same directory first, then renamed into place, so a reader never
//! observes a partial write. When two workers complete the same task
//! after a timeout re-dispatch, the last rename wins; contents are
//! semantically equivalent because Map/Reduce are assumed deterministic.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::mr::error::MrError;
use crate::mr::types::KeyValue;

async fn publish_bytes(dir: PathBuf, final_path: PathBuf, buf: Vec<u8>) -> Result<(), MrError> {
    tokio::task::spawn_blocking(move || -> Result<(), MrError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&buf)?;
        tmp.flush()?;
        tmp.persist(&final_path)?;
        Ok(())
    })
    .await
    .map_err(|e| MrError::Transport(e.to_string()))?
}

/// Publish a Map task's shard: one JSON-encoded `KeyValue` per line.
pub async fn publish_records(
    dir: &Path,
    final_path: &Path,
    records: &[KeyValue],
) -> Result<(), MrError> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    publish_bytes(dir.to_path_buf(), final_path.to_path_buf(), buf).await
}

/// Publish a Reduce task's output: pre-formatted `"{key} {value}\n"` lines.
pub async fn publish_lines(
    dir: &Path,
    final_path: &Path,
    lines: &[String],
) -> Result<(), MrError> {
    let mut buf = Vec::new();
    for line in lines {
        buf.extend_from_slice(line.as_bytes());
    }
    publish_bytes(dir.to_path_buf(), final_path.to_path_buf(), buf).await
}

/// Decode a shard file's self-delimited record stream.
pub fn read_records(path: &Path) -> Result<Vec<KeyValue>, MrError> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(MrError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_records_through_a_shard_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mr-0-0");
        let records = vec![
            KeyValue::new("cat".into(), "1".into()),
            KeyValue::new("dog".into(), "1".into()),
        ];
        publish_records(dir.path(), &path, &records).await.unwrap();
        let decoded = read_records(&path).unwrap();
        assert_eq!(decoded, records);
    }

    #[tokio::test]
    async fn republishing_overwrites_the_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mr-out-0");
        publish_lines(dir.path(), &path, &["cat 1\n".to_string()])
            .await
            .unwrap();
        publish_lines(dir.path(), &path, &["cat 2\n".to_string()])
            .await
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "cat 2\n");
    }

    #[tokio::test]
    async fn publishing_an_empty_record_set_creates_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mr-out-2");
        publish_lines(dir.path(), &path, &[]).await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.is_empty());
    }
}
