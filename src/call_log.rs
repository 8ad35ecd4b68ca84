//! Process-wide log of conversational turns and tool invocations.
//!
//! Entries are grouped by de-scoped session id (the session id without its
//! group prefix), so one actor's calls against several groups land together.
//! Nothing is written until [`CallLog::flush`] is called.

use crate::error::ManagerError;
use crate::session::SessionKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Default destination for [`CallLog::flush`].
pub const DEFAULT_LOG_PATH: &str = "log/log.jsonl";

/// One logged record.
///
/// Serializes as `{"chat": {...}}` or `{"tool": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntry {
    Chat {
        user: String,
        assistant: String,
    },
    Tool {
        tool_name: String,
        tool_args: Value,
        tool_result: String,
    },
}

#[derive(Default)]
pub struct CallLog {
    entries: Mutex<BTreeMap<String, Vec<LogEntry>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<String, Vec<LogEntry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `entry` under the de-scoped form of `session_id`.
    pub fn record(&self, session_id: &str, entry: LogEntry) {
        let key = SessionKey::parse(session_id).descoped().to_string();
        self.lock_entries().entry(key).or_default().push(entry);
    }

    pub fn record_chat(&self, session_id: &str, user: &str, assistant: &str) {
        self.record(
            session_id,
            LogEntry::Chat {
                user: user.to_string(),
                assistant: assistant.to_string(),
            },
        );
    }

    pub fn record_tool(&self, session_id: &str, tool_name: &str, tool_args: Value, tool_result: &str) {
        self.record(
            session_id,
            LogEntry::Tool {
                tool_name: tool_name.to_string(),
                tool_args,
                tool_result: tool_result.to_string(),
            },
        );
    }

    /// Snapshot of the entries for a de-scoped id.
    pub fn entries(&self, descoped_id: &str) -> Vec<LogEntry> {
        self.lock_entries()
            .get(descoped_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of distinct de-scoped ids with entries.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Append one JSON line `{"<id>": [entries...]}` per id to `destination`.
    ///
    /// The in-memory log is kept, so a second flush writes the same records
    /// again. Returns the number of lines written.
    pub fn flush(&self, destination: &Path) -> Result<usize, ManagerError> {
        let snapshot = self.lock_entries().clone();

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)?;
        let mut writer = BufWriter::new(file);
        for (id, entries) in &snapshot {
            let mut record = serde_json::Map::new();
            record.insert(id.clone(), serde_json::to_value(entries).map_err(std::io::Error::from)?);
            serde_json::to_writer(&mut writer, &record).map_err(std::io::Error::from)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        info!(path = %destination.display(), records = snapshot.len(), "Flushed call log");
        Ok(snapshot.len())
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
        debug!("Call log cleared");
    }
}
