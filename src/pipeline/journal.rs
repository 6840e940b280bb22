// Pipeline journal
// Append-only JSONL record of stage transitions for every processed event

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::PickingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Quality,
    Reference,
    Alignment,
    Stacking,
    Plot,
    Propagation,
}

/// A single journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,

    pub event_id: String,

    pub stage: Stage,

    /// Progress of the stage in [0.0, 1.0]
    pub progress: f32,

    pub message: String,

    /// Structured detail (counts, artifacts, rejections)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JournalEntry {
    pub fn new(event_id: &str, stage: Stage, progress: f32, message: impl Into<String>) -> Self {
        JournalEntry {
            timestamp: Utc::now().to_rfc3339(),
            event_id: event_id.to_string(),
            stage,
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            data: None,
        }
    }

    pub fn start(event_id: &str, stage: Stage, message: impl Into<String>) -> Self {
        Self::new(event_id, stage, 0.0, message)
    }

    pub fn complete(event_id: &str, stage: Stage, message: impl Into<String>) -> Self {
        Self::new(event_id, stage, 1.0, message)
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// JSON followed by a newline
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Appends entries to one JSONL file; safe to share between event workers
pub struct JournalWriter {
    file_path: PathBuf,
    lock: Mutex<()>,
}

impl JournalWriter {
    pub fn new(file_path: PathBuf) -> Self {
        JournalWriter {
            file_path,
            lock: Mutex::new(()),
        }
    }

    /// Append one entry, creating the file and its directory if needed
    pub fn write(&self, entry: &JournalEntry) -> PickingResult<()> {
        let line = entry.to_json_line()?;
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Write and log a failure instead of returning it; the journal never aborts an event
    pub fn record(&self, entry: JournalEntry) {
        if let Err(e) = self.write(&entry) {
            log::warn!("Failed to write journal {}: {}", self.file_path.display(), e);
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

pub fn read_journal(path: &Path) -> PickingResult<Vec<JournalEntry>> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(line)?);
    }

    Ok(entries)
}
