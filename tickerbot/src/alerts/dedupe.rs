//! Last-alerted state per (alert kind, symbol), persisted as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::AlertKind;
use crate::data::Symbol;

/// File name inside the state directory.
pub const STATE_FILE: &str = "alert_state.json";

/// What was last alerted for one (kind, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupeRecord {
    pub condition: String,
    #[serde(default)]
    pub level: Option<f64>,
    pub alerted_at: DateTime<Utc>,
}

/// Dedupe records keyed by `"{kind}:{symbol}"`.
pub struct DedupeStore {
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, DedupeRecord>>,
    /// Held from snapshot to rename so file writes land in record order.
    write_lock: Mutex<()>,
}

impl DedupeStore {
    /// Load `alert_state.json` from `state_dir`. A missing or corrupt file starts empty.
    pub fn load(state_dir: &Path) -> Self {
        let path = state_dir.join(STATE_FILE);
        let records = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<HashMap<String, DedupeRecord>>(&content) {
                Ok(records) => {
                    info!(path = %path.display(), count = records.len(), "Alert state loaded");
                    records
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Alert state unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read alert state");
                HashMap::new()
            }
        };

        Self {
            path: Some(path),
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, kind: AlertKind, symbol: &Symbol) -> Option<DedupeRecord> {
        let records = match self.records.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.get(&key(kind, symbol)).cloned()
    }

    /// Record an alert and rewrite the state file.
    ///
    /// The in-memory record is kept even when the write fails.
    pub fn record(
        &self,
        kind: AlertKind,
        symbol: &Symbol,
        condition: String,
        level: Option<f64>,
    ) -> io::Result<()> {
        let _writer = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let snapshot = {
            let mut records = match self.records.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            records.insert(
                key(kind, symbol),
                DedupeRecord {
                    condition,
                    level,
                    alerted_at: Utc::now(),
                },
            );
            serde_json::to_vec_pretty(&*records)?
        };

        match &self.path {
            Some(path) => tickerbot_common::util::write_atomic(path, &snapshot),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        match self.records.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key(kind: AlertKind, symbol: &Symbol) -> String {
    format!("{kind}:{symbol}")
}
