//! lib.rs
//!     Defines modules within the library crate that can be
//!     exported for interfacing.
//!
//! `jsonkv` is a small key-value store for settings and local caches. The
//! whole store lives in memory behind a lock and is written back to a single
//! JSON file, atomically, after every mutation.
//!
//! ```no_run
//! use jsonkv::JsonKV;
//!
//! # fn main() -> jsonkv::Result<()> {
//! let settings = JsonKV::open("./storage/data/settings.json")?;
//! settings.set("theme", "dark")?;
//! settings.update(vec![("language", "en-us"), ("theme", "light")])?;
//!
//! assert_eq!(settings.get_or("theme", "dark")?, "light");
//! assert!(settings.delete("language")?);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod kv;
pub mod namespace;

pub use crate::errors::{KVError, Result};
pub use crate::kv::{JsonKV, KV};
pub use crate::namespace::Namespace;

/// Value type of every entry: null, boolean, number, string, array or object.
pub use serde_json::Value;
