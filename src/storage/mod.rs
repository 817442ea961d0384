//! Persistence of schedule and controller configuration.
//!
//! Documents are JSON values stored under a key derived from the object
//! reference (see [`document_key`]). Backends only need to load and save
//! whole documents; the mapping between documents and live objects lives in
//! [`document`].

pub mod document;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};

pub use document::{
    ControllerDocument, ScheduleDocument, StoredBinding, StoredStartTime, StoredValue,
    restore_controller, restore_schedule, save_controller, save_schedule,
};

const MEMORY_URI: &str = "memory:";
const FILE_SCHEME: &str = "file://";

/// A store of JSON documents addressed by key.
pub trait StorageBackend: Send + Sync {
    /// Returns the document under `key`, or `None` if there is none.
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Stores `document` under `key`, replacing any previous one.
    fn save(&self, key: &str, document: &serde_json::Value) -> Result<()>;
}

/// Storage key for an object reference: `.` becomes `_`, `/` becomes `__`,
/// and `.json` is appended.
///
/// # Examples
///
/// ```
/// use der_scheduler::storage::document_key;
///
/// assert_eq!(document_key("IED1LD0/FSCH1"), "IED1LD0__FSCH1.json");
/// ```
pub fn document_key(reference: &str) -> String {
    let mut key = reference.replace('.', "_").replace('/', "__");
    key.push_str(".json");
    key
}

/// One JSON file per document inside a directory.
#[derive(Debug)]
pub struct JsonFileStorage {
    dir: PathBuf,
    pretty: bool,
    // Serialises saves; every save of a key shares one staging file.
    write_lock: Mutex<()>,
}

impl JsonFileStorage {
    /// Opens `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::StorageIo`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>, pretty: bool) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SchedulerError::StorageIo {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            pretty,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl StorageBackend for JsonFileStorage {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.dir.join(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SchedulerError::StorageIo { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| SchedulerError::Document {
                key: key.to_string(),
                source,
            })
    }

    fn save(&self, key: &str, document: &serde_json::Value) -> Result<()> {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(document)
        } else {
            serde_json::to_string(document)
        }
        .map_err(|source| SchedulerError::Document {
            key: key.to_string(),
            source,
        })?;

        // Write then rename so readers never see a partial document.
        let _guard = self.write_lock.lock();
        let path = self.dir.join(key);
        let staging = self.dir.join(format!("{key}.tmp"));
        fs::write(&staging, encoded).map_err(|source| SchedulerError::StorageIo {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| SchedulerError::StorageIo {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "document saved");
        Ok(())
    }
}

/// Documents kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    documents: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.documents.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl StorageBackend for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.documents.lock().get(key).cloned())
    }

    fn save(&self, key: &str, document: &serde_json::Value) -> Result<()> {
        self.documents
            .lock()
            .insert(key.to_string(), document.clone());
        Ok(())
    }
}

/// Opens the backend named by `uri`.
///
/// `memory:` selects [`MemoryStorage`]. Anything else is a directory for
/// [`JsonFileStorage`], optionally written as a `file://` URI. The only
/// parameter is `pretty` (default `true`).
///
/// # Errors
///
/// Returns [`SchedulerError::StorageUri`] for an empty URI or another
/// scheme, [`SchedulerError::StorageParam`] for a bad parameter, and
/// [`SchedulerError::StorageIo`] if the directory cannot be created.
pub fn open(uri: &str, params: &BTreeMap<String, String>) -> Result<Arc<dyn StorageBackend>> {
    let mut pretty = true;
    for (key, value) in params {
        match key.as_str() {
            "pretty" => {
                pretty = value
                    .parse()
                    .map_err(|_| SchedulerError::StorageParam(format!("{key}={value}")))?;
            }
            _ => return Err(SchedulerError::StorageParam(format!("{key}={value}"))),
        }
    }

    let uri = uri.trim();
    if uri == MEMORY_URI || uri == "memory" {
        info!("using in-memory storage");
        return Ok(Arc::new(MemoryStorage::new()));
    }

    let dir = uri.strip_prefix(FILE_SCHEME).unwrap_or(uri);
    if dir.is_empty() || dir.contains("://") {
        return Err(SchedulerError::StorageUri(uri.to_string()));
    }

    info!(dir = %dir, pretty, "using json file storage");
    Ok(Arc::new(JsonFileStorage::new(dir, pretty)?))
}

/// Storage handle shared by the scheduler, its schedules and controllers.
///
/// Empty until a backend is attached; persistence calls are no-ops until
/// then.
#[derive(Clone, Default)]
pub struct SharedStorage {
    backend: Arc<RwLock<Option<Arc<dyn StorageBackend>>>>,
}

impl SharedStorage {
    /// Installs `backend`, replacing any previous one.
    pub fn attach(&self, backend: Arc<dyn StorageBackend>) {
        *self.backend.write() = Some(backend);
    }

    pub fn backend(&self) -> Option<Arc<dyn StorageBackend>> {
        self.backend.read().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.backend.read().is_some()
    }
}

impl std::fmt::Debug for SharedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStorage")
            .field("attached", &self.is_attached())
            .finish()
    }
}
