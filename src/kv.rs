//! kv.rs
//!     Defines the foundational structure and API of the key-value store:
//!     an insertion-ordered JSON mapping guarded by a lock, and flushed
//!     to a single file after every mutation.

use std::fs;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::errors::{KVError, Result};
use crate::namespace::Namespace;

/// Defines the directory, relative to the home directory, where stores opened
/// by name alone are kept.
const DEFAULT_WORKSPACE_PATH: &str = ".jsonkv";

/// Extension given to store files resolved from a database name.
const DEFAULT_EXTENSION: &str = "json";

/// Default indentation width of the written file.
const DEFAULT_INDENT: usize = 4;

/// `KV` represents an alias to the base data structure. An `IndexMap` keeps
/// keys in insertion order, which is also the order they are written in.
pub type KV = IndexMap<String, Value>;

/// `JsonKV` defines the main interface structure in order to represent the
/// most recent state of the data store.
///
/// Cloning a `JsonKV` yields another handle onto the same storage and lock,
/// so clones can be moved into threads freely.
#[derive(Clone, Debug)]
pub struct JsonKV {
    path: PathBuf,

    // stores the actual key-value store encapsulated with a RwLock
    storage: Arc<RwLock<KV>>,

    // indentation width used when persisting
    indent: usize,
}

impl JsonKV {
    /// `open()` binds a store to the file at `path`. The parent directory chain is
    /// created if missing, then the file is loaded:
    ///
    /// * a missing file yields an empty store;
    /// * a file that is not a JSON object is logged and yields an empty store,
    ///   leaving the file untouched until the next mutation overwrites it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;

        let kv = load(&path)?;
        Ok(Self {
            path,
            storage: Arc::new(RwLock::new(kv)),
            indent: DEFAULT_INDENT,
        })
    }

    /// `open_with_base_path()` opens the store named `dbname` inside `base_path`,
    /// i.e. `<base_path>/<dbname>.json`.
    pub fn open_with_base_path(dbname: &str, base_path: impl AsRef<Path>) -> Result<Self> {
        Self::open(get_db_path(dbname, base_path.as_ref()))
    }

    /// `open_default()` opens the store named `dbname` inside the default
    /// workspace, `~/.jsonkv/`.
    pub fn open_default(dbname: &str) -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| KVError::Directory {
            path: PathBuf::from(DEFAULT_WORKSPACE_PATH),
            source: io::Error::new(ErrorKind::NotFound, "cannot resolve home directory"),
        })?;
        Self::open_with_base_path(dbname, home.join(DEFAULT_WORKSPACE_PATH))
    }

    /// `with_indent()` changes the indentation width of the persisted file. Only
    /// affects subsequent writes.
    pub fn with_indent(mut self, width: usize) -> Self {
        self.indent = width;
        self
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `namespace()` returns a view whose keys are scoped as `<namespace>@<key>`.
    pub fn namespace(&self, namespace: impl AsRef<str>) -> Namespace<'_> {
        Namespace::new(namespace, self)
    }

    /// `namespace_default()` returns a view over the whole, unprefixed key space.
    pub fn namespace_default(&self) -> Namespace<'_> {
        Namespace::new("", self)
    }

    ///////////////////////////////////////
    // Primitive key-value store operations
    ///////////////////////////////////////

    /// `get()` retrieves a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let data = self.read()?;
        Ok(data.get(key).cloned())
    }

    /// `get_or()` retrieves the value stored under `key`, or `default` if the key
    /// was never set.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    /// `get_as()` retrieves the value under `key` and deserializes it into `V`.
    pub fn get_as<V>(&self, key: &str) -> Result<Option<V>>
    where
        V: DeserializeOwned,
    {
        match self.get(key)? {
            Some(value) => from_value(key, value).map(Some),
            None => Ok(None),
        }
    }

    /// `set()` stores `value` under `key` and persists the store.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let mut data = self.write()?;
        data.insert(key.into(), value.into());
        self.persist(&data)
    }

    /// `put()` serializes any `Serialize` type into a JSON value, then stores it
    /// like `set()`. The conversion happens before the lock is taken.
    pub fn put<V>(&self, key: impl Into<String>, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        let key = key.into();
        let value = to_value(&key, value)?;
        self.set(key, value)
    }

    /// `delete()` removes an entry, returning whether it existed. The file is only
    /// rewritten when something was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut data = self.write()?;
        if data.shift_remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&data)?;
        Ok(true)
    }

    /// `clear()` empties the store and persists, even if it was already empty.
    pub fn clear(&self) -> Result<()> {
        let mut data = self.write()?;
        data.clear();
        self.persist(&data)
    }

    /// `exists()` is a helper routine that acquires a reader lock and checks if a
    /// key exists within the store.
    pub fn exists(&self, key: &str) -> Result<bool> {
        let data = self.read()?;
        Ok(data.contains_key(key))
    }

    /// `update()` merges all `entries` into the store, overwriting existing keys,
    /// and persists once for the whole batch.
    pub fn update<I, K, V>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut data = self.write()?;
        data.extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self.persist(&data)
    }

    /// `get_all()` returns an independent copy of the entire mapping.
    pub fn get_all(&self) -> Result<KV> {
        let data = self.read()?;
        Ok(data.clone())
    }

    //////////////////////////////////////////
    // Other key-value store helper operations
    //////////////////////////////////////////

    /// `keys()` returns the keys in insertion order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let data = self.read()?;
        Ok(data.keys().cloned().collect())
    }

    /// `sorted_keys()` returns the keys in lexicographic order.
    pub fn sorted_keys(&self) -> Result<Vec<String>> {
        let mut keys = self.keys()?;
        keys.sort();
        Ok(keys)
    }

    /// `len()` returns the number of entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// `is_empty()` checks whether the store holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// `lock_read()` is an arbitrary read-lock that encapsulates a read-only closure.
    /// Multiple concurrent readers can hold the lock at once.
    pub fn lock_read<C, R>(&self, callback: C) -> Result<R>
    where
        C: FnOnce(&KV) -> R,
    {
        let data = self.read()?;
        Ok(callback(&data))
    }

    /// `lock_write()` is an arbitrary write-lock that encapsulates a mutating closure.
    /// Only one writer can hold the lock, blocking any other readers/writers until
    /// the closure has run and the result has been persisted exactly once.
    pub fn lock_write<C, R>(&self, callback: C) -> Result<R>
    where
        C: FnOnce(&mut KV) -> R,
    {
        let mut data = self.write()?;
        let ret = callback(&mut data);
        self.persist(&data)?;
        Ok(ret)
    }

    ///////////////////
    // I/O Operations
    ///////////////////

    /// `reload()` discards the in-memory state and loads the backing file again,
    /// with the same recovery rules as `open()`.
    pub fn reload(&self) -> Result<()> {
        let mut data = self.write()?;
        *data = load(&self.path)?;
        Ok(())
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, KV>> {
        self.storage.read().map_err(|_| KVError::Poison)
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, KV>> {
        self.storage.write().map_err(|_| KVError::Poison)
    }

    /// `persist()` writes `data` to a temporary file next to the target and
    /// atomically renames it into place. Callers must already hold the write lock
    /// and pass the guarded mapping in; this never locks on its own.
    pub(crate) fn persist(&self, data: &KV) -> Result<()> {
        let storage_err = |source: io::Error| KVError::Storage {
            path: self.path.clone(),
            source,
        };

        let prefix = temp_prefix(&self.path);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(".tmp");

        // a fresh file gets the umask default rather than tempfile's owner-only mode
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o666));
        }

        let mut tmp = builder
            .tempfile_in(parent_dir(&self.path))
            .map_err(storage_err)?;

        // an existing file keeps its mode across the rename
        if let Ok(meta) = fs::metadata(&self.path) {
            if meta.is_file() {
                tmp.as_file()
                    .set_permissions(meta.permissions())
                    .map_err(storage_err)?;
            }
        }

        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let indent = vec![b' '; self.indent];
            let mut ser =
                serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(&indent));
            data.serialize(&mut ser).map_err(|e| {
                if e.is_io() {
                    storage_err(e.into())
                } else {
                    KVError::Serialize(e)
                }
            })?;
            writer.write_all(b"\n").map_err(storage_err)?;
            writer.flush().map_err(storage_err)?;
        }
        tmp.as_file().sync_all().map_err(storage_err)?;

        // on failure the temp file is handed back and removed when dropped
        tmp.persist(&self.path).map_err(|e| storage_err(e.error))?;

        tracing::debug!("persisted {} entries to {}", data.len(), self.path.display());
        Ok(())
    }
}

/// Forms the path of a named store inside `base_path`.
#[inline]
fn get_db_path(name: &str, base_path: &Path) -> PathBuf {
    base_path.join(format!("{}.{}", name, DEFAULT_EXTENSION))
}

/// Directory holding `path`; a bare file name lives in the working directory.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn temp_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("jsonkv"));
    format!(".{}.", name)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|source| KVError::Directory {
        path: dir.to_path_buf(),
        source,
    })
}

/// Reads the store file at `path`. Absence and corruption both yield an empty
/// mapping; any other read failure is returned.
fn load(path: &Path) -> Result<KV> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("no store file at {}, starting empty", path.display());
            return Ok(KV::new());
        }
        Err(source) => {
            return Err(KVError::Load {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match decode(&raw) {
        Ok(kv) => {
            tracing::debug!("loaded {} entries from {}", kv.len(), path.display());
            Ok(kv)
        }
        Err(reason) => {
            tracing::warn!(
                "invalid JSON file at {} ({}), starting with empty data",
                path.display(),
                reason
            );
            Ok(KV::new())
        }
    }
}

/// Decodes raw file content into a mapping. A well-formed document whose top
/// level is not an object counts as corrupt.
fn decode(raw: &[u8]) -> std::result::Result<KV, String> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(other) => Err(format!("top-level value is {}, not an object", kind_of(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn to_value<V>(key: &str, value: &V) -> Result<Value>
where
    V: Serialize + ?Sized,
{
    serde_json::to_value(value).map_err(|source| KVError::Conversion {
        key: key.to_string(),
        source,
    })
}

pub(crate) fn from_value<V>(key: &str, value: Value) -> Result<V>
where
    V: DeserializeOwned,
{
    serde_json::from_value(value).map_err(|source| KVError::Conversion {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_path() {
        let path = get_db_path("settings", Path::new("/tmp/base"));
        assert_eq!(path, PathBuf::from("/tmp/base/settings.json"));

        // dots in the name are kept, not treated as an extension
        let path = get_db_path("settings.v2", Path::new("base"));
        assert_eq!(path, PathBuf::from("base/settings.v2.json"));
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("settings.json")), Path::new("."));
        assert_eq!(parent_dir(Path::new("a/b/settings.json")), Path::new("a/b"));
    }

    #[test]
    fn test_temp_prefix() {
        assert_eq!(temp_prefix(Path::new("dir/settings.json")), ".settings.json.");
    }

    #[test]
    fn test_decode_object_keeps_order() {
        let kv = decode(br#"{"b": 1, "a": [true, null], "c": {"z": 1, "y": 2}}"#).unwrap();
        assert_eq!(kv.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(kv["a"], serde_json::json!([true, null]));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(decode(b"5").unwrap_err().contains("a number"));
        assert!(decode(b"[1, 2]").unwrap_err().contains("an array"));
        assert!(decode(b"\"5\"").unwrap_err().contains("a string"));
        assert!(decode(b"null").is_err());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode(b"{ invalid json").is_err());
        assert!(decode(b"").is_err());
        assert!(decode(&[0xff, 0xfe, 0x7b]).is_err());
    }
}
