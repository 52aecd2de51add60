use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// A stored account. Holds only the password hash, never the raw password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub pw_hash: String,
    #[serde(default)]
    pub created_unix: u64,
}

impl Credential {
    pub fn new(username: impl Into<String>, pw_hash: impl Into<String>) -> Self {
        let created_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            username: username.into(),
            pw_hash: pw_hash.into(),
            created_unix,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store closed")]
    Closed,
    #[error("user {0:?} already exists")]
    Exists(String),
}

/// Credential lookup and persistence keyed by username.
///
/// Each call is atomic on its own; callers get no transaction across calls.
pub trait UserStore: Send + Sync {
    fn find_by_username(&self, name: &str) -> Result<Option<Credential>, StoreError>;

    /// Add a new account. Fails with [`StoreError::Exists`] if the username is taken.
    fn save(&self, cred: Credential) -> Result<(), StoreError>;

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    by_name: Mutex<HashMap<String, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryStore {
    fn find_by_username(&self, name: &str) -> Result<Option<Credential>, StoreError> {
        let m = self.by_name.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(m.get(name).cloned())
    }

    fn save(&self, cred: Credential) -> Result<(), StoreError> {
        let mut m = self.by_name.lock().map_err(|_| StoreError::Poisoned)?;
        if m.contains_key(&cred.username) {
            return Err(StoreError::Exists(cred.username));
        }
        m.insert(cred.username.clone(), cred);
        Ok(())
    }
}

#[derive(Debug)]
struct FileState {
    by_name: HashMap<String, Credential>,
    closed: bool,
}

/// Accounts kept in memory and written out as a JSON array on every save.
///
/// Writes go to `<path>.tmp` and are renamed over `<path>`, so a crash mid-write
/// leaves the previous file intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store; an unreadable or
    /// malformed one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut by_name = HashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(s) => {
                for c in serde_json::from_str::<Vec<Credential>>(&s)? {
                    by_name.insert(c.username.clone(), c);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            path,
            state: Mutex::new(FileState {
                by_name,
                closed: false,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.by_name.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_file(&self, by_name: &HashMap<String, Credential>) -> Result<(), StoreError> {
        let mut v = by_name.values().cloned().collect::<Vec<_>>();
        v.sort_by(|a, b| a.username.cmp(&b.username));
        let s = serde_json::to_string_pretty(&v)?;
        let tmp = format!("{}.tmp", self.path.display());
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl UserStore for JsonFileStore {
    fn find_by_username(&self, name: &str) -> Result<Option<Credential>, StoreError> {
        let st = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        if st.closed {
            return Err(StoreError::Closed);
        }
        Ok(st.by_name.get(name).cloned())
    }

    fn save(&self, cred: Credential) -> Result<(), StoreError> {
        let mut st = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        if st.closed {
            return Err(StoreError::Closed);
        }
        if st.by_name.contains_key(&cred.username) {
            return Err(StoreError::Exists(cred.username));
        }
        let name = cred.username.clone();
        st.by_name.insert(name.clone(), cred);
        if let Err(e) = self.write_file(&st.by_name) {
            // Keep memory in line with what is on disk.
            st.by_name.remove(&name);
            return Err(e);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut st = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        st.closed = true;
        Ok(())
    }
}
