use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use anyhow::anyhow;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use uuid::Uuid;

pub type Record = Map<String, Value>;

pub type Snapshot = BTreeMap<String, Record>;

/// Change callback. Runs on the writer's thread with the full collection
/// snapshot, after the store has released its locks. It may read the store
/// or release subscriptions, but writing to its own collection recurses.
pub type Listener = Box<dyn FnMut(&Snapshot) + Send>;

pub trait RecordStore {
    /// Calls `on_change` immediately with the current snapshot, then after
    /// every change to the collection until the subscription is released.
    fn subscribe(&self, collection: &str, on_change: Listener) -> anyhow::Result<Subscription>;

    fn insert(&self, collection: &str, record: Record) -> anyhow::Result<String>;

    fn merge(&self, path: &str, partial: Record) -> anyhow::Result<()>;

    fn delete(&self, path: &str) -> anyhow::Result<()>;
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn subscribe(&self, collection: &str, on_change: Listener) -> anyhow::Result<Subscription> {
        (**self).subscribe(collection, on_change)
    }

    fn insert(&self, collection: &str, record: Record) -> anyhow::Result<String> {
        (**self).insert(collection, record)
    }

    fn merge(&self, path: &str, partial: Record) -> anyhow::Result<()> {
        (**self).merge(path, partial)
    }

    fn delete(&self, path: &str) -> anyhow::Result<()> {
        (**self).delete(path)
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn subscribe(&self, collection: &str, on_change: Listener) -> anyhow::Result<Subscription> {
        (**self).subscribe(collection, on_change)
    }

    fn insert(&self, collection: &str, record: Record) -> anyhow::Result<String> {
        (**self).insert(collection, record)
    }

    fn merge(&self, path: &str, partial: Record) -> anyhow::Result<()> {
        (**self).merge(path, partial)
    }

    fn delete(&self, path: &str) -> anyhow::Result<()> {
        (**self).delete(path)
    }
}

pub fn record_path(collection: &str, key: &str) -> String {
    format!("{collection}/{key}")
}

pub fn split_record_path(path: &str) -> anyhow::Result<(&str, &str)> {
    match path.rsplit_once('/') {
        Some((collection, key)) if !collection.is_empty() && !key.is_empty() => {
            Ok((collection, key))
        }
        _ => Err(anyhow!("invalid record path '{path}' (expected collection/key)")),
    }
}

/// Time-ordered key, so snapshot order follows insertion order.
pub fn generate_key() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn read_snapshot<S: RecordStore + ?Sized>(
    store: &S,
    collection: &str,
) -> anyhow::Result<Snapshot> {
    let captured: Arc<Mutex<Option<Snapshot>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&captured);
    let subscription = store.subscribe(
        collection,
        Box::new(move |snapshot: &Snapshot| {
            let mut slot = sink.lock();
            if slot.is_none() {
                *slot = Some(snapshot.clone());
            }
        }),
    )?;
    subscription.unsubscribe();

    let snapshot = captured.lock().take();
    snapshot.ok_or_else(|| anyhow!("store did not deliver a snapshot for '{collection}'"))
}

struct ListenerEntry {
    id: u64,
    collection: String,
    callback: Arc<Mutex<Listener>>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<ListenerEntry>,
}

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Listeners>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("active", &self.active())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn register(
        &self,
        collection: &str,
        mut callback: Listener,
        initial: &Snapshot,
    ) -> Subscription {
        callback(initial);

        let mut listeners = self.inner.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push(ListenerEntry {
            id,
            collection: collection.to_string(),
            callback: Arc::new(Mutex::new(callback)),
        });
        debug!(collection, listener = id, "listener registered");

        Subscription {
            registry: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    pub fn notify(&self, collection: &str, snapshot: &Snapshot) {
        let targets: Vec<(u64, Arc<Mutex<Listener>>)> = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.collection == collection)
            .map(|entry| (entry.id, Arc::clone(&entry.callback)))
            .collect();

        for (id, callback) in targets {
            if !self.is_registered(id) {
                trace!(collection, listener = id, "released during notify; skipping");
                continue;
            }
            trace!(collection, listener = id, records = snapshot.len(), "notifying");
            let mut listener = callback.lock();
            (*listener)(snapshot);
        }
    }

    fn is_registered(&self, id: u64) -> bool {
        self.inner.lock().entries.iter().any(|entry| entry.id == id)
    }

    pub fn active(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<Mutex<Listeners>>,
    id: Option<u64>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some() && self.registry.strong_count() > 0
    }

    fn release(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().entries.retain(|entry| entry.id != id);
            debug!(listener = id, "listener released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, Snapshot>>,
    listeners: ListenerRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_listeners(&self) -> usize {
        self.listeners.active()
    }

    fn collection_snapshot(&self, collection: &str) -> Snapshot {
        self.collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

impl RecordStore for MemoryStore {
    fn subscribe(&self, collection: &str, on_change: Listener) -> anyhow::Result<Subscription> {
        let snapshot = self.collection_snapshot(collection);
        Ok(self.listeners.register(collection, on_change, &snapshot))
    }

    fn insert(&self, collection: &str, record: Record) -> anyhow::Result<String> {
        let key = generate_key();
        let snapshot = {
            let mut collections = self.collections.lock();
            let records = collections.entry(collection.to_string()).or_default();
            records.insert(key.clone(), record);
            records.clone()
        };
        self.listeners.notify(collection, &snapshot);
        Ok(key)
    }

    fn merge(&self, path: &str, partial: Record) -> anyhow::Result<()> {
        let (collection, key) = split_record_path(path)?;
        let snapshot = {
            let mut collections = self.collections.lock();
            let records = collections.entry(collection.to_string()).or_default();
            records.entry(key.to_string()).or_default().extend(partial);
            records.clone()
        };
        self.listeners.notify(collection, &snapshot);
        Ok(())
    }

    fn delete(&self, path: &str) -> anyhow::Result<()> {
        let (collection, key) = split_record_path(path)?;
        let snapshot = {
            let mut collections = self.collections.lock();
            let Some(records) = collections.get_mut(collection) else {
                return Ok(());
            };
            if records.remove(key).is_none() {
                return Ok(());
            }
            records.clone()
        };
        self.listeners.notify(collection, &snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    fn recording_listener() -> (Arc<Mutex<Vec<Snapshot>>>, Listener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener = Box::new(move |snapshot: &Snapshot| {
            sink.lock().push(snapshot.clone());
        });
        (seen, listener)
    }

    #[test]
    fn subscribe_delivers_current_then_every_change() {
        let store = MemoryStore::new();
        let key = store
            .insert("machines", record(json!({ "name": "Lathe" })))
            .expect("insert");

        let (seen, listener) = recording_listener();
        let subscription = store.subscribe("machines", listener).expect("subscribe");
        assert_eq!(seen.lock().len(), 1);

        store
            .merge(&record_path("machines", &key), record(json!({ "code": "L-1" })))
            .expect("merge");
        store.insert("machines", record(json!({ "name": "Press" }))).expect("insert");

        let seen_now = seen.lock().clone();
        assert_eq!(seen_now.len(), 3);
        assert_eq!(seen_now[1][&key]["name"], "Lathe");
        assert_eq!(seen_now[1][&key]["code"], "L-1");
        assert_eq!(seen_now[2].len(), 2);

        subscription.unsubscribe();
        assert_eq!(store.active_listeners(), 0);
    }

    #[test]
    fn listeners_only_hear_their_collection() {
        let store = MemoryStore::new();
        let (seen, listener) = recording_listener();
        let _subscription = store.subscribe("machines", listener).expect("subscribe");

        store.insert("spareParts", record(json!({ "name": "Belt" }))).expect("insert");
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn subscription_outliving_store_is_inactive() {
        let (_, listener) = recording_listener();
        let subscription = {
            let store = MemoryStore::new();
            let subscription = store.subscribe("tasks", listener).expect("subscribe");
            assert!(subscription.is_active());
            subscription
        };
        assert!(!subscription.is_active());
        subscription.unsubscribe();
    }

    #[test]
    fn dropping_subscription_unsubscribes_once() {
        let store = MemoryStore::new();
        let (seen, listener) = recording_listener();
        {
            let _subscription = store.subscribe("tasks", listener).expect("subscribe");
            assert_eq!(store.active_listeners(), 1);
        }
        assert_eq!(store.active_listeners(), 0);

        store.insert("tasks", record(json!({ "taskName": "x" }))).expect("insert");
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn delete_is_idempotent_and_quiet_when_missing() {
        let store = MemoryStore::new();
        let key = store.insert("tasks", record(json!({ "taskName": "x" }))).expect("insert");
        let (seen, listener) = recording_listener();
        let _subscription = store.subscribe("tasks", listener).expect("subscribe");

        store.delete(&record_path("tasks", &key)).expect("delete");
        store.delete(&record_path("tasks", &key)).expect("delete again");
        store.delete("other/missing").expect("delete in unknown collection");

        let seen_now = seen.lock().clone();
        assert_eq!(seen_now.len(), 2);
        assert!(seen_now[1].is_empty());
    }

    #[test]
    fn read_snapshot_leaves_no_listener_behind() {
        let store = MemoryStore::new();
        store.insert("tasks", record(json!({ "taskName": "x" }))).expect("insert");
        let snapshot = read_snapshot(&store, "tasks").expect("read");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.active_listeners(), 0);
    }

    #[test]
    fn listener_can_read_the_store_it_listens_to() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("machines", record(json!({ "name": "Lathe" })))
            .expect("insert machine");

        let (tx, rx) = std::sync::mpsc::channel();
        let reader = Arc::clone(&store);
        let subscription = store
            .subscribe(
                "maintenanceSchedule",
                Box::new(move |snapshot: &Snapshot| {
                    let machines = read_snapshot(&*reader, "machines").map(|m| m.len());
                    let tasks = read_snapshot(&*reader, "maintenanceSchedule").map(|t| t.len());
                    let _ = tx.send((snapshot.len(), machines.ok(), tasks.ok()));
                }),
            )
            .expect("subscribe");
        assert_eq!(rx.recv().expect("initial"), (0, Some(1), Some(0)));

        let writer = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            writer
                .insert("maintenanceSchedule", record(json!({ "taskName": "Oil ways" })))
                .expect("insert task")
        });
        let seen = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("insert returned and notified");
        assert_eq!(seen, (1, Some(1), Some(1)));
        handle.join().expect("writer thread");

        subscription.unsubscribe();
        assert_eq!(store.active_listeners(), 0);
    }

    #[test]
    fn listener_released_mid_notify_is_skipped() {
        let store = MemoryStore::new();
        let (seen, listener) = recording_listener();
        let second = Arc::new(Mutex::new(None::<Subscription>));

        let slot = Arc::clone(&second);
        let _first = store
            .subscribe(
                "tasks",
                Box::new(move |snapshot: &Snapshot| {
                    if !snapshot.is_empty() {
                        slot.lock().take();
                    }
                }),
            )
            .expect("subscribe first");
        *second.lock() = Some(store.subscribe("tasks", listener).expect("subscribe second"));
        assert_eq!(store.active_listeners(), 2);

        store.insert("tasks", record(json!({ "taskName": "x" }))).expect("insert");
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(store.active_listeners(), 1);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(split_record_path("tasks").is_err());
        assert!(split_record_path("tasks/").is_err());
        assert!(split_record_path("/key").is_err());
        assert_eq!(
            split_record_path("maintenanceSchedule/abc").expect("split"),
            ("maintenanceSchedule", "abc")
        );
    }
}
