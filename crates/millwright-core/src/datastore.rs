use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::store::{
    Listener, ListenerRegistry, Record, RecordStore, Snapshot, Subscription, generate_key,
    split_record_path,
};

#[derive(Debug)]
pub struct JsonlStore {
    pub data_dir: PathBuf,
    write_lock: Mutex<()>,
    listeners: ListenerRegistry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    record: Record,
}

impl JsonlStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened datastore");

        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
            listeners: ListenerRegistry::default(),
        })
    }

    pub fn collection_path(&self, collection: &str) -> anyhow::Result<PathBuf> {
        validate_collection_name(collection)?;
        Ok(self.data_dir.join(format!("{collection}.jsonl")))
    }

    #[tracing::instrument(skip(self))]
    pub fn load_collection(&self, collection: &str) -> anyhow::Result<Snapshot> {
        let path = self.collection_path(collection)?;
        load_jsonl(&path).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn active_listeners(&self) -> usize {
        self.listeners.active()
    }

    /// Load, mutate and rewrite one collection, then notify its listeners.
    /// Nothing is written or announced when `change` reports no change.
    fn modify(
        &self,
        collection: &str,
        change: impl FnOnce(&mut Snapshot) -> bool,
    ) -> anyhow::Result<bool> {
        let path = self.collection_path(collection)?;
        let records = {
            let _guard = self.write_lock.lock();
            let mut records =
                load_jsonl(&path).with_context(|| format!("failed to load {}", path.display()))?;
            if !change(&mut records) {
                return Ok(false);
            }
            save_jsonl_atomic(&path, &records)
                .with_context(|| format!("failed to save {}", path.display()))?;
            records
        };
        self.listeners.notify(collection, &records);
        Ok(true)
    }
}

impl RecordStore for JsonlStore {
    #[tracing::instrument(skip(self, on_change))]
    fn subscribe(&self, collection: &str, on_change: Listener) -> anyhow::Result<Subscription> {
        let snapshot = self.load_collection(collection)?;
        Ok(self.listeners.register(collection, on_change, &snapshot))
    }

    #[tracing::instrument(skip(self, record))]
    fn insert(&self, collection: &str, record: Record) -> anyhow::Result<String> {
        let key = generate_key();
        self.modify(collection, |records| {
            records.insert(key.clone(), record);
            true
        })?;
        debug!(collection, key = %key, "inserted record");
        Ok(key)
    }

    #[tracing::instrument(skip(self, partial))]
    fn merge(&self, path: &str, partial: Record) -> anyhow::Result<()> {
        let (collection, key) = split_record_path(path)?;
        self.modify(collection, |records| {
            records.entry(key.to_string()).or_default().extend(partial);
            true
        })?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn delete(&self, path: &str) -> anyhow::Result<()> {
        let (collection, key) = split_record_path(path)?;
        let removed = self.modify(collection, |records| records.remove(key).is_some())?;
        debug!(collection, key, removed, "deleted record");
        Ok(())
    }
}

fn validate_collection_name(collection: &str) -> anyhow::Result<()> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid collection name '{collection}'"))
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Snapshot> {
    debug!(file = %path.display(), "loading jsonl");
    let mut out = Snapshot::new();
    if !path.exists() {
        return Ok(out);
    }

    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let stored: StoredRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.insert(stored.key, stored.record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic(path: &Path, records: &Snapshot) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for (key, record) in records {
        let serialized = serde_json::to_string(&StoredRecord {
            key: key.clone(),
            record: record.clone(),
        })?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
