//! Persistence layer.
//!
//! Defines the `StateStore` trait the engine writes through, plus a JSON
//! file store for real runs and an in-memory store for tests and
//! ephemeral sessions.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::{EngineState, PersistenceError};

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "harvester_state.json";

/// Durable storage for the engine's state.
///
/// `load` returns `Ok(None)` when nothing has been saved yet; it only fails
/// when stored content exists but cannot be decoded into a valid state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<Option<EngineState>, PersistenceError>;
    async fn save(&self, state: &EngineState) -> Result<(), PersistenceError>;
}

/// Decode and sanity-check a serialized state.
fn decode(json: &str) -> Result<EngineState, PersistenceError> {
    let mut state: EngineState = serde_json::from_str(json)?;
    state.validate().map_err(PersistenceError::Corrupt)?;
    state.rebuild_index();
    Ok(state)
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Saves and loads engine state to/from a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the state file (for testing or reset).
    pub async fn delete(&self) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<EngineState>, PersistenceError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No saved state found, starting fresh");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if json.trim().is_empty() {
            info!(path = %self.path.display(), "State file is empty, starting fresh");
            return Ok(None);
        }

        let state = decode(&json)?;
        info!(
            path = %self.path.display(),
            open = state.open_count(),
            settled = state.history().len(),
            "State loaded from disk"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &EngineState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(state)?;

        // Write-then-rename so a crash mid-write leaves the previous file intact.
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(
            path = %self.path.display(),
            open = state.open_count(),
            settled = state.history().len(),
            "State saved"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps the last saved state as serialized JSON in memory.
///
/// Storing the encoded form (rather than a clone) means `load` exercises
/// the same decode path as the file store. Saves can be made to fail on
/// demand to simulate an unavailable disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<String>>,
    fail_saves: AtomicBool,
    save_count: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw content, as if written by an earlier run.
    pub fn with_raw(json: impl Into<String>) -> Self {
        let store = Self::default();
        *store.lock() = Some(json.into());
        store
    }

    /// Make every subsequent `save` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.save_count.load(Ordering::SeqCst)
    }

    /// The raw JSON last written, if any.
    pub fn raw(&self) -> Option<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<EngineState>, PersistenceError> {
        let raw = self.lock().clone();
        match raw.as_deref() {
            None => Ok(None),
            Some(json) => decode(json).map(Some),
        }
    }

    async fn save(&self, state: &EngineState) -> Result<(), PersistenceError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        let json = serde_json::to_string(state)?;
        *self.lock() = Some(json);
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
