#![deny(warnings)]

//! Persistence layer: a small key-value store and the journey stores built on it.
//!
//! Every value is JSON. Reads never fail on bad data: a missing or malformed
//! value is the default. Writes are flushed before the in-memory copy changes.

use journey_core::{Lang, StepId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "JOURNEY_DATA_DIR";

pub const PROGRESS_KEY: &str = "journey.progress";
pub const HEARTS_KEY: &str = "journey.hearts";
pub const WELCOMED_KEY: &str = "journey.welcomed";
pub const MESSAGE_INDEX_KEY: &str = "journey.message-index";
pub const LANG_KEY: &str = "journey.lang";
/// Prefix of the per-step scratch flag, followed by the step id.
pub const SCRATCH_PREFIX: &str = "journey.scratched.";

/// Prefix shared by every key this app writes.
pub const KEY_NAMESPACE: &str = "journey.";

/// Returns the default directory used for local saves.
pub fn default_data_dir() -> &'static str {
    "./saves/journey"
}

/// Data directory from `JOURNEY_DATA_DIR`, falling back to the default.
pub fn data_dir_from_env() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default_data_dir()))
}

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot encode value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
}

/// String-keyed store of JSON values.
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Persist `value` before returning.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

fn check_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// One `<key>.json` file per key inside a directory.
///
/// Writes go to a hidden temporary file that is synced and then renamed over
/// the target, so a crash leaves either the old or the new value.
#[derive(Clone, Debug)]
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        check_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

/// Flush the directory entry so a completed rename survives power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

impl KvStore for FileKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(value.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &path).map_err(io_err)?;
        sync_dir(&self.dir).map_err(io_err)?;
        debug!(key, "persisted");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let io_err = |source| StoreError::Io {
            key: self.dir.display().to_string(),
            source,
        };
        let mut keys = Vec::new();
        for ent in fs::read_dir(&self.dir).map_err(io_err)? {
            let ent = ent.map_err(io_err)?;
            let name = ent.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = name.strip_suffix(".json") {
                if check_key(key).is_ok() {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store. Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryKv {
    map: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        check_key(key)?;
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        check_key(key)?;
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.keys().cloned().collect())
    }
}

/// Read and decode `key`, treating absence, I/O failure and bad JSON as `None`.
fn read_json<K: KvStore, T: DeserializeOwned>(kv: &K, key: &str) -> Option<T> {
    let raw = match kv.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(key, error = %e, "unreadable value, using default");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, error = %e, "malformed value, using default");
            None
        }
    }
}

fn write_json<K: KvStore, T: Serialize + ?Sized>(
    kv: &K,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let text = serde_json::to_string(value)?;
    kv.set(key, &text)
}

/// Names the persisted key of a `SetStore`.
pub trait SetKind {
    const KEY: &'static str;
}

/// Completed steps.
#[derive(Debug)]
pub struct Progress;

impl SetKind for Progress {
    const KEY: &'static str = PROGRESS_KEY;
}

/// Hidden hearts found.
#[derive(Debug)]
pub struct Hearts;

impl SetKind for Hearts {
    const KEY: &'static str = HEARTS_KEY;
}

/// A persisted set of step ids stored as a JSON array under `S::KEY`.
#[derive(Debug)]
pub struct SetStore<K, S> {
    kv: K,
    ids: BTreeSet<StepId>,
    _kind: PhantomData<S>,
}

pub type ProgressStore<K> = SetStore<K, Progress>;
pub type CollectibleStore<K> = SetStore<K, Hearts>;

impl<K: KvStore, S: SetKind> SetStore<K, S> {
    /// Load the set; empty if absent or malformed.
    pub fn load(kv: K) -> Self {
        let ids = Self::read(&kv);
        debug!(key = S::KEY, count = ids.len(), "loaded set");
        Self {
            kv,
            ids,
            _kind: PhantomData,
        }
    }

    fn read(kv: &K) -> BTreeSet<StepId> {
        read_json::<K, Vec<StepId>>(kv, S::KEY)
            .map(|v| v.into_iter().collect())
            .unwrap_or_default()
    }

    /// Re-read the persisted value, replacing the in-memory set.
    pub fn reload(&mut self) {
        self.ids = Self::read(&self.kv);
    }

    pub fn key(&self) -> &'static str {
        S::KEY
    }

    pub fn ids(&self) -> &BTreeSet<StepId> {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Insert `id` and persist. Returns whether it was new.
    ///
    /// The set is written even when `id` was already present. The in-memory set
    /// only changes once the write has succeeded.
    pub fn add(&mut self, id: &StepId) -> Result<bool, StoreError> {
        let mut next = self.ids.clone();
        let inserted = next.insert(id.clone());
        let list: Vec<&StepId> = next.iter().collect();
        write_json(&self.kv, S::KEY, &list)?;
        self.ids = next;
        Ok(inserted)
    }

    /// Remove the persisted value and clear the set.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.kv.remove(S::KEY)?;
        self.ids.clear();
        Ok(())
    }
}

/// Small persisted flags and settings.
#[derive(Clone, Debug)]
pub struct Preferences<K> {
    kv: K,
}

impl<K: KvStore> Preferences<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    fn scratch_key(id: &StepId) -> String {
        format!("{SCRATCH_PREFIX}{id}")
    }

    pub fn welcomed(&self) -> bool {
        read_json::<K, bool>(&self.kv, WELCOMED_KEY).unwrap_or(false)
    }

    pub fn mark_welcomed(&self) -> Result<(), StoreError> {
        write_json(&self.kv, WELCOMED_KEY, &true)
    }

    pub fn scratch_revealed(&self, id: &StepId) -> bool {
        read_json::<K, bool>(&self.kv, &Self::scratch_key(id)).unwrap_or(false)
    }

    pub fn mark_scratch_revealed(&self, id: &StepId) -> Result<(), StoreError> {
        write_json(&self.kv, &Self::scratch_key(id), &true)
    }

    pub fn message_index(&self) -> usize {
        read_json::<K, usize>(&self.kv, MESSAGE_INDEX_KEY).unwrap_or(0)
    }

    /// Return the index to show now and persist the following one, cycling
    /// through `0..len`.
    pub fn next_message_index(&self, len: usize) -> Result<usize, StoreError> {
        if len == 0 {
            return Ok(0);
        }
        let current = self.message_index() % len;
        write_json(&self.kv, MESSAGE_INDEX_KEY, &((current + 1) % len))?;
        Ok(current)
    }

    pub fn language(&self) -> Lang {
        read_json::<K, Lang>(&self.kv, LANG_KEY).unwrap_or_default()
    }

    pub fn set_language(&self, lang: Lang) -> Result<(), StoreError> {
        write_json(&self.kv, LANG_KEY, &lang)
    }
}
