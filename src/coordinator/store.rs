//! On-disk state for resuming a stopped coordinator.
//!
//! A store is a directory holding:
//!
//! | File | Contents |
//! |------|----------|
//! | `rounds.jsonl` | one [`RoundRecord`] per line, append-only |
//! | `snapshot.json` | latest [`CoordinatorSnapshot`], replaced atomically |

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::record::RoundRecord;
use crate::error::QoraError;
use crate::privacy::PrivacyBudgetAccountant;
use crate::types::GlobalParameters;

const RECORDS_FILE: &str = "rounds.jsonl";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Coordinator state between rounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    /// Current global parameters.
    pub parameters: GlobalParameters,
    /// Budget spent so far, with its ceiling and composition rule.
    pub accountant: PrivacyBudgetAccountant,
    /// Number the next round will take.
    pub next_round: u64,
    /// Whether the budget was exhausted.
    pub halted: bool,
}

/// Directory-backed store for round records and snapshots.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, QoraError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one record and flush it to disk.
    pub fn append_record(&self, record: &RoundRecord) -> Result<(), QoraError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(RECORDS_FILE))?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Every record, oldest first. Empty if nothing was ever appended.
    pub fn load_records(&self) -> Result<Vec<RoundRecord>, QoraError> {
        let file = match File::open(self.dir.join(RECORDS_FILE)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    /// Replace the snapshot. Written to a temporary file then renamed, so a
    /// crash leaves either the old or the new snapshot.
    pub fn save_snapshot(&self, snapshot: &CoordinatorSnapshot) -> Result<(), QoraError> {
        let tmp = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, snapshot)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(SNAPSHOT_FILE))?;
        Ok(())
    }

    /// Latest snapshot, if one was saved.
    pub fn load_snapshot(&self) -> Result<Option<CoordinatorSnapshot>, QoraError> {
        match fs::read(self.dir.join(SNAPSHOT_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
