//! main.rs
//!     Defines the command-line interface to a jsonkv store. Every
//!     subcommand opens the store, performs one operation and exits.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jsonkv::{JsonKV, Value};

#[derive(Parser)]
#[command(name = "jsonkv", version, about = "Inspect and edit a jsonkv store file")]
struct Cli {
    /// Path to the store file
    #[arg(long, conflicts_with_all = ["name", "base_dir"])]
    path: Option<PathBuf>,

    /// Store name, resolved to `<base-dir>/<name>.json`
    #[arg(long)]
    name: Option<String>,

    /// Directory holding named stores (defaults to ~/.jsonkv)
    #[arg(long, requires = "name")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the value stored under a key
    Get {
        key: String,
        /// JSON value printed when the key is missing
        #[arg(long)]
        default: Option<String>,
    },
    /// Store a value; parsed as JSON, otherwise kept as a plain string
    Set { key: String, value: String },
    /// Remove a key, printing whether it existed
    Delete { key: String },
    /// Print whether a key exists
    Exists { key: String },
    /// Merge a JSON object into the store with a single write
    Update { entries: String },
    /// Print the whole store
    List,
    /// Print all keys
    Keys {
        #[arg(long)]
        sorted: bool,
    },
    /// Remove every entry
    Clear,
}

impl Cli {
    fn open(&self) -> Result<JsonKV> {
        let kv = match (&self.path, &self.name, &self.base_dir) {
            (Some(path), _, _) => JsonKV::open(path),
            (None, Some(name), Some(base)) => JsonKV::open_with_base_path(name, base),
            (None, Some(name), None) => JsonKV::open_default(name),
            (None, None, _) => JsonKV::open_default("default"),
        };
        kv.context("cannot open store")
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    let kv = cli.open()?;

    match cli.command {
        Command::Get { key, default } => {
            let default = default.as_deref().map(parse_value).unwrap_or(Value::Null);
            let value = kv.get_or(&key, default)?;
            println!("{}", value);
        }
        Command::Set { key, value } => {
            kv.set(key.as_str(), parse_value(&value))
                .with_context(|| format!("cannot set '{}'", key))?;
        }
        Command::Delete { key } => {
            let existed = kv
                .delete(&key)
                .with_context(|| format!("cannot delete '{}'", key))?;
            println!("{}", existed);
        }
        Command::Exists { key } => {
            println!("{}", kv.exists(&key)?);
        }
        Command::Update { entries } => {
            let entries = match serde_json::from_str::<Value>(&entries).context("update takes a JSON object")? {
                Value::Object(map) => map,
                _ => bail!("update takes a JSON object"),
            };
            kv.update(entries).context("cannot update store")?;
        }
        Command::List => {
            println!("{}", serde_json::to_string_pretty(&kv.get_all()?)?);
        }
        Command::Keys { sorted } => {
            let keys = if sorted { kv.sorted_keys()? } else { kv.keys()? };
            for key in keys {
                println!("{}", key);
            }
        }
        Command::Clear => {
            kv.clear().context("cannot clear store")?;
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
