//! Crash-safe persisted descriptors of open sessions
//! (`.opta/browser/runtime-sessions.json`, spec §4.8).

use std::path::Path;
use std::path::PathBuf;

use opta_browser_artifacts::StoreError;
use opta_browser_artifacts::atomic_write_json;
use opta_browser_protocol::Session;
use opta_browser_protocol::now_iso8601;
use serde::Deserialize;
use serde::Serialize;
use tokio::fs;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSessionsFile {
    pub schema_version: u32,
    pub updated_at: String,
    pub sessions: Vec<Session>,
}

impl Default for RuntimeSessionsFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            updated_at: now_iso8601(),
            sessions: Vec::new(),
        }
    }
}

/// Owns `runtime-sessions.json`. `replace_sessions` is the only mutation
/// path (spec §4.8): the daemon always writes the full descriptor list.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(browser_root: &Path) -> Self {
        Self {
            path: browser_root.join("runtime-sessions.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file, sanitizing unknown or malformed shapes down to an
    /// empty descriptor list rather than failing the caller. Individual
    /// malformed session entries are dropped; a fully malformed document
    /// (not even a JSON object) yields a fresh default.
    pub async fn read(&self) -> Result<RuntimeSessionsFile, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RuntimeSessionsFile::default());
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let raw: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(_) => return Ok(RuntimeSessionsFile::default()),
        };

        let schema_version = raw
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(SCHEMA_VERSION);
        let updated_at = raw
            .get("updated_at")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(now_iso8601);

        let sessions = raw
            .get("sessions")
            .and_then(serde_json::Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| serde_json::from_value::<Session>(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(RuntimeSessionsFile {
            schema_version,
            updated_at,
            sessions,
        })
    }

    /// Atomically replaces the full descriptor list (spec §4.8).
    pub async fn replace_sessions(&self, sessions: Vec<Session>) -> Result<(), StoreError> {
        let file = RuntimeSessionsFile {
            schema_version: SCHEMA_VERSION,
            updated_at: now_iso8601(),
            sessions,
        };
        atomic_write_json(&self.path, &file).await
    }
}
