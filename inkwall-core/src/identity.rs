//! Per-profile session identity.
//!
//! The identifier is minted once (UUID v4 from OS randomness), persisted, and
//! read back on every later load. If storage is unavailable the provider falls
//! back to an in-memory identifier that stays stable for the process lifetime.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use uuid::Uuid;

use crate::model::SessionId;

/// Directory under the platform data dir that holds Inkwall state.
pub const APP_DIR: &str = "inkwall";
/// File name of the persisted identifier.
pub const SESSION_FILE: &str = "session_id";

/// Backing storage for the session identifier.
pub trait IdentityStorage: Send + Sync {
    fn load(&self) -> io::Result<Option<String>>;
    fn store(&self, value: &str) -> io::Result<()>;
}

/// Stores the identifier in a single file.
#[derive(Debug, Clone)]
pub struct FileIdentityStorage {
    path: PathBuf,
}

impl FileIdentityStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/inkwall/session_id`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(APP_DIR).join(SESSION_FILE))
    }

    /// Storage under the platform data dir, if the platform has one.
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map(|dir| Self::in_data_dir(&dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStorage for FileIdentityStorage {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn store(&self, value: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, value)
    }
}

/// Volatile storage, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryIdentityStorage {
    value: Mutex<Option<String>>,
}

impl MemoryIdentityStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStorage for MemoryIdentityStorage {
    fn load(&self) -> io::Result<Option<String>> {
        let guard = self
            .value
            .lock()
            .map_err(|_| io::Error::other("identity storage poisoned"))?;
        Ok(guard.clone())
    }

    fn store(&self, value: &str) -> io::Result<()> {
        let mut guard = self
            .value
            .lock()
            .map_err(|_| io::Error::other("identity storage poisoned"))?;
        *guard = Some(value.to_string());
        Ok(())
    }
}

/// Hands out the session identifier, caching it after the first read.
pub struct SessionIdentityProvider {
    storage: Option<Box<dyn IdentityStorage>>,
    cached: Mutex<Option<SessionId>>,
}

impl SessionIdentityProvider {
    pub fn new(storage: impl IdentityStorage + 'static) -> Self {
        Self {
            storage: Some(Box::new(storage)),
            cached: Mutex::new(None),
        }
    }

    /// Provider backed by the platform data directory. Without one, the
    /// identifier lives only as long as the process.
    pub fn with_default_storage() -> Self {
        match FileIdentityStorage::default_location() {
            Some(storage) => Self::new(storage),
            None => {
                log::warn!("No platform data directory; session id will not persist");
                Self::ephemeral()
            }
        }
    }

    /// Provider with no persistent storage at all.
    pub fn ephemeral() -> Self {
        Self {
            storage: None,
            cached: Mutex::new(None),
        }
    }

    /// Return the session id, creating and persisting it on first use.
    pub fn get_session_id(&self) -> SessionId {
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = self.load_or_create();
        *cached = Some(id.clone());
        id
    }

    fn load_or_create(&self) -> SessionId {
        let Some(storage) = self.storage.as_ref() else {
            return fresh_session_id();
        };

        match storage.load() {
            Ok(Some(value)) if !value.trim().is_empty() => {
                return SessionId::new(value.trim());
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("Session storage unavailable ({e}); using in-memory session id");
                return fresh_session_id();
            }
        }

        let id = fresh_session_id();
        if let Err(e) = storage.store(id.as_str()) {
            log::warn!("Failed to persist session id ({e}); it will not survive a restart");
        } else {
            log::info!("Created session id {id}");
        }
        id
    }
}

fn fresh_session_id() -> SessionId {
    SessionId::new(Uuid::new_v4().to_string())
}
