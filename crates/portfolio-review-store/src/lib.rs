#![warn(missing_docs)]
//! # portfolio-review-store
//!
//! ## Purpose
//! Keeps the most recent successful analysis so a read-only view can show it.
//!
//! ## Responsibilities
//! - Hold one [`AnalysisRecord`] slot per [`ScopeId`].
//! - Overwrite unconditionally on store; no history or versioning.
//! - Offer an in-memory store and a single-file JSON store.
//!
//! ## Data flow
//! Gateway success or a `store_analysis` post -> [`ResultStore::store_latest`]
//! -> feedback view -> [`ResultStore::read_latest`].
//!
//! ## Ownership and lifetimes
//! Stores own their records; reads return clones.
//!
//! ## Error model
//! I/O and codec failures of the file store are [`StoreError`] values. Lock
//! poisoning is reported, never unwrapped. A file that no longer decodes
//! fails reads but is replaced by the next write.
//!
//! ## Security and privacy notes
//! Stored HTML may come from any client holding a token. Stores keep it as
//! given; callers sanitize before writing and again before rendering.
//! Concurrent writers race; the last one wins. File-store calls block and
//! belong off the async executor.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use portfolio_review_core::AnalysisRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Scope used when callers do not choose one.
pub const DEFAULT_SCOPE: &str = "default";

/// Key separating tenants or sessions in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(String);

impl ScopeId {
    /// Creates a scope id.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidScope`] for blank ids.
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(StoreError::InvalidScope);
        }
        Ok(Self(id))
    }

    /// Scope id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self(DEFAULT_SCOPE.to_string())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest-result persistence.
pub trait ResultStore: Send + Sync {
    /// Replaces the scope's record with `html`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backing storage cannot be written.
    fn store_latest(&self, scope: &ScopeId, html: &str, now_ms: u64) -> Result<(), StoreError>;

    /// Reads the scope's record, if any.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backing storage cannot be read.
    fn read_latest(&self, scope: &ScopeId) -> Result<Option<AnalysisRecord>, StoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    slots: RwLock<HashMap<ScopeId, AnalysisRecord>>,
}

impl MemoryResultStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryResultStore {
    fn store_latest(&self, scope: &ScopeId, html: &str, now_ms: u64) -> Result<(), StoreError> {
        let mut slots = self.slots.write().map_err(|_| StoreError::Poisoned)?;
        slots.insert(
            scope.clone(),
            AnalysisRecord {
                html: html.to_string(),
                stored_at_ms: now_ms,
            },
        );
        Ok(())
    }

    fn read_latest(&self, scope: &ScopeId) -> Result<Option<AnalysisRecord>, StoreError> {
        let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
        Ok(slots.get(scope).cloned())
    }
}

/// Store backed by one JSON document mapping scope ids to records.
///
/// Writes go to a sibling temp file that is renamed over the target.
#[derive(Debug)]
pub struct JsonFileResultStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    records: HashMap<ScopeId, AnalysisRecord>,
}

impl JsonFileResultStore {
    /// Creates a store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreDocument, StoreError> {
        match fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(StoreError::Codec),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(StoreDocument::default())
            }
            Err(error) => Err(StoreError::Io(error)),
        }
    }

    fn save(&self, document: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let raw = serde_json::to_vec_pretty(document)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, raw)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl ResultStore for JsonFileResultStore {
    fn store_latest(&self, scope: &ScopeId, html: &str, now_ms: u64) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut document = match self.load() {
            Ok(document) => document,
            Err(StoreError::Codec(error)) => {
                warn!(error = %error, path = %self.path.display(), "discarding unreadable store file");
                StoreDocument::default()
            }
            Err(error) => return Err(error),
        };
        document.records.insert(
            scope.clone(),
            AnalysisRecord {
                html: html.to_string(),
                stored_at_ms: now_ms,
            },
        );
        self.save(&document)?;
        debug!(scope = %scope, path = %self.path.display(), "stored latest analysis");
        Ok(())
    }

    fn read_latest(&self, scope: &ScopeId) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.load()?.records.remove(scope))
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Scope id was blank.
    #[error("scope id must be non-empty")]
    InvalidScope,
    /// File access failed.
    #[error("store i/o failure: {0}")]
    Io(#[from] std::io::Error),
    /// Stored document could not be encoded/decoded.
    #[error("store codec failure: {0}")]
    Codec(#[from] serde_json::Error),
    /// A lock holder panicked.
    #[error("store lock poisoned")]
    Poisoned,
}
