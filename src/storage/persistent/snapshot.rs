//! Point-in-time snapshot of both collections.
//!
//! Compaction folds the WAL into `snapshot.dat` and then truncates the log.
//! The snapshot is written to a temporary file and renamed into place, so a
//! crash leaves either the previous snapshot or the new one, never a mix.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answer::AnswerRecord;
use crate::question::Question;

use super::codec;

const SNAPSHOT_FILE: &str = "snapshot.dat";

/// Contents of a snapshot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    /// Last WAL sequence reflected in this snapshot.
    pub sequence: u64,
    /// When the snapshot was taken.
    pub created_at: Option<DateTime<Utc>>,
    /// Every question document.
    pub questions: Vec<Question>,
    /// Every answer record.
    pub responses: Vec<AnswerRecord>,
}

impl SnapshotData {
    /// Total documents held.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.questions.len() + self.responses.len()
    }
}

/// Path of the snapshot inside a data directory.
#[must_use]
pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Load the snapshot, if one has been written.
pub fn load(dir: &Path) -> IoResult<Option<SnapshotData>> {
    let file = match File::open(snapshot_path(dir)) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;
    codec::decode(&mut reader).map(Some)
}

/// Atomically replace the snapshot.
pub fn write(dir: &Path, data: &SnapshotData) -> IoResult<PathBuf> {
    let final_path = snapshot_path(dir);
    let temp_path = dir.join(format!("{SNAPSHOT_FILE}.tmp.{}", Uuid::new_v4()));

    let result = (|| {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;
        writer.write_all(&codec::encode(data)?)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp_path, &final_path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    #[cfg(unix)]
    {
        // Make the rename itself durable.
        File::open(dir)?.sync_all()?;
    }

    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::AnswerSubmission;
    use tempfile::tempdir;

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn write_replaces_previous_snapshot() {
        let dir = tempdir().unwrap();
        let first = SnapshotData {
            sequence: 3,
            ..SnapshotData::default()
        };
        write(dir.path(), &first).unwrap();

        let second = SnapshotData {
            sequence: 9,
            created_at: Some(Utc::now()),
            questions: Vec::new(),
            responses: vec![AnswerRecord::new(AnswerSubmission::new(), None)],
        };
        let path = write(dir.path(), &second).unwrap();
        assert_eq!(path, snapshot_path(dir.path()));

        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.sequence, 9);
        assert_eq!(loaded.document_count(), 1);

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(".tmp.")
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
