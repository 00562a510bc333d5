//! namespace.rs
//!     Scoped views over a single store. Keys written through a
//!     namespace are stored as `<namespace>@<key>` in the shared file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::Result;
use crate::kv::{self, JsonKV};

#[derive(Clone, Debug)]
pub struct Namespace<'a> {
    /// namespace, empty for the whole key space
    namespace: String,
    /// store the view operates on
    kv: &'a JsonKV,
}

fn format_key(namespace: &str, key: impl AsRef<str>) -> String {
    if namespace.is_empty() {
        key.as_ref().to_string()
    } else {
        format!("{}@{}", namespace, key.as_ref())
    }
}

impl<'a> Namespace<'a> {
    pub fn new(namespace: impl AsRef<str>, kv: &'a JsonKV) -> Self {
        Self {
            namespace: namespace.as_ref().to_string(),
            kv,
        }
    }

    pub fn name(&self) -> &str {
        &self.namespace
    }

    /// Whether a raw store key falls inside this namespace.
    fn owns(&self, data_key: &str) -> bool {
        self.namespace.is_empty() || data_key.starts_with(&format_key(&self.namespace, ""))
    }

    /// Strips the namespace prefix from a raw store key.
    fn strip<'k>(&self, data_key: &'k str) -> &'k str {
        if self.namespace.is_empty() {
            return data_key;
        }
        &data_key[self.namespace.len() + 1..]
    }

    pub fn get(&self, key: impl AsRef<str>) -> Result<Option<Value>> {
        self.kv.get(&format_key(&self.namespace, key))
    }

    pub fn get_or(&self, key: impl AsRef<str>, default: impl Into<Value>) -> Result<Value> {
        self.kv.get_or(&format_key(&self.namespace, key), default)
    }

    /// Retrieves a value and deserializes it into `V`.
    pub fn get_as<V>(&self, key: impl AsRef<str>) -> Result<Option<V>>
    where
        V: DeserializeOwned,
    {
        self.kv.get_as(&format_key(&self.namespace, key))
    }

    pub fn set(&self, key: impl AsRef<str>, value: impl Into<Value>) -> Result<()> {
        self.kv.set(format_key(&self.namespace, key), value)
    }

    /// Serializes `value` and stores it under the namespaced key.
    pub fn put<V>(&self, key: impl AsRef<str>, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        let data_key = format_key(&self.namespace, key);
        let value = kv::to_value(&data_key, value)?;
        self.kv.set(data_key, value)
    }

    /// Delete removes an entry, returning whether it existed.
    pub fn delete(&self, key: impl AsRef<str>) -> Result<bool> {
        self.kv.delete(&format_key(&self.namespace, key))
    }

    pub fn exists(&self, key: impl AsRef<str>) -> Result<bool> {
        self.kv.exists(&format_key(&self.namespace, key))
    }

    /// Keys inside this namespace, prefix stripped, in insertion order. The
    /// default namespace sees every key in the store as-is.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.kv.lock_read(|data| {
            data.keys()
                .filter(|k| self.owns(k))
                .map(|k| self.strip(k).to_string())
                .collect()
        })
    }

    pub fn sorted_keys(&self) -> Result<Vec<String>> {
        let mut keys = self.keys()?;
        keys.sort();
        Ok(keys)
    }

    /// Removes every entry of this namespace with a single write. Clearing the
    /// default namespace empties the whole store.
    pub fn clear(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return self.kv.clear();
        }
        let mut data = self.kv.write()?;
        data.retain(|key, _| !self.owns(key));
        self.kv.persist(&data)
    }
}
