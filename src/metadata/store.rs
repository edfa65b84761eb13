//! The typed facade over the coordination store.
//!
//! [`CoordinationStore`] is the raw byte-level contract a backend has to
//! provide: atomic create, last-writer-wins update, and prefix watches.
//! [`MetadataStore`] layers one entity kind's schema on top and owns the
//! path layout.
//!
//! A cached [`MetadataStore`] keeps a local snapshot of its folder
//! refreshed by a watch thread; `list_sync` then reads the local snapshot
//! instead of round-tripping to the store. If the watch channel drops (a
//! session expiry on a real backend) the thread re-establishes the watch
//! and performs a full resync before serving further reads.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::errors::{Error, Result};
use crate::metadata::{from_bytes, to_bytes, MetadataEntity};

/// A change to one entry, as reported by a backend watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Entry at `path` was created or updated.
    Put { path: String, payload: Vec<u8> },
    /// Entry at `path` was deleted.
    Delete { path: String },
}

/// Byte-level contract of the watchable hierarchical store.
///
/// `create` is atomic and fails with [`Error::AlreadyExists`] on a name
/// collision; `put` is last-writer-wins and requires the entry to exist.
/// Compare-and-set is deliberately not part of the contract.
pub trait CoordinationStore: Send + Sync + 'static {
    fn create(&self, path: &str, payload: &[u8]) -> Result<()>;
    fn put(&self, path: &str, payload: &[u8]) -> Result<()>;
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
    fn delete(&self, path: &str) -> Result<()>;
    fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
    /// Register a watch on every entry under `prefix`. Events arrive in
    /// the order the writes were applied.
    fn watch(&self, prefix: &str) -> Result<Receiver<WatchEvent>>;
}

/// A typed change event delivered through [`MetadataStore::subscribe`].
#[derive(Debug, Clone)]
pub enum EntityWatchEvent<T> {
    Put(T),
    Delete(String),
}

struct EntityCache<T> {
    entries: RwLock<HashMap<String, T>>,
    subscribers: Mutex<Vec<Sender<EntityWatchEvent<T>>>>,
    shutdown: AtomicBool,
}

/// CRUD + watch for one entity kind.
pub struct MetadataStore<T> {
    store: Arc<dyn CoordinationStore>,
    folder: String,
    cache: Option<Arc<EntityCache<T>>>,
    entity_type: PhantomData<T>,
}

impl<T: MetadataEntity> MetadataStore<T> {
    /// An uncached store: every operation round-trips to the backend.
    pub fn new(store: Arc<dyn CoordinationStore>, cluster_prefix: &str) -> Self {
        Self {
            store,
            folder: entity_folder::<T>(cluster_prefix),
            cache: None,
            entity_type: PhantomData,
        }
    }

    /// A cached store: spawns the watch thread and waits for the initial
    /// resync so the first `list_sync` already sees the full folder.
    pub fn new_cached(store: Arc<dyn CoordinationStore>, cluster_prefix: &str) -> Result<Self> {
        let folder = entity_folder::<T>(cluster_prefix);
        let cache = Arc::new(EntityCache {
            entries: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        });

        // Watch before the initial list so no write can fall between the
        // two; replayed events are idempotent upserts.
        let events = store.watch(&folder)?;
        resync(&*store, &folder, &cache)?;

        // The thread keeps only a weak handle on the backend so a dropped
        // store does not stay alive just to feed its own watcher.
        let thread_store = Arc::downgrade(&store);
        let thread_cache = Arc::clone(&cache);
        let thread_folder = folder.clone();
        thread::Builder::new()
            .name(format!("meta-watch-{}", T::STORE_FOLDER))
            .spawn(move || watch_loop(thread_store, thread_folder, thread_cache, events))
            .map_err(|err| Error::MetadataStore(format!("spawning watch thread: {err}")))?;

        Ok(Self {
            store,
            folder,
            cache: Some(cache),
            entity_type: PhantomData,
        })
    }

    fn path_for(&self, name: &str) -> String {
        format!("{}/{name}", self.folder)
    }

    pub fn create_sync(&self, entity: &T) -> Result<()> {
        self.store
            .create(&self.path_for(entity.name()), &to_bytes(entity)?)
    }

    pub fn update_sync(&self, entity: &T) -> Result<()> {
        self.store
            .put(&self.path_for(entity.name()), &to_bytes(entity)?)
    }

    pub fn get_sync(&self, name: &str) -> Result<Option<T>> {
        match self.store.get(&self.path_for(name))? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_sync(&self, name: &str) -> Result<()> {
        self.store.delete(&self.path_for(name))
    }

    /// All records in this folder. A cached store reads its local
    /// snapshot; an uncached store lists the backend.
    pub fn list_sync(&self) -> Result<Vec<T>> {
        match &self.cache {
            Some(cache) => {
                let entries = cache.entries.read().expect("entity cache lock poisoned");
                Ok(entries.values().cloned().collect())
            }
            None => {
                let mut entities = Vec::new();
                for (_path, bytes) in self.store.list(&self.folder)? {
                    entities.push(from_bytes(&bytes)?);
                }
                Ok(entities)
            }
        }
    }

    /// Typed change feed. Only a cached store has a watch thread to feed
    /// it from.
    pub fn subscribe(&self) -> Result<Receiver<EntityWatchEvent<T>>> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            Error::MetadataStore(format!(
                "subscribe requires a cached store for {}",
                T::STORE_FOLDER
            ))
        })?;
        let (tx, rx) = unbounded();
        cache
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(tx);
        Ok(rx)
    }
}

impl<T> Drop for MetadataStore<T> {
    fn drop(&mut self) {
        if let Some(cache) = &self.cache {
            cache.shutdown.store(true, Ordering::Relaxed);
        }
    }
}

fn entity_folder<T: MetadataEntity>(cluster_prefix: &str) -> String {
    format!(
        "{}/{}",
        cluster_prefix.trim_end_matches('/'),
        T::STORE_FOLDER
    )
}

fn entry_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn resync<T: MetadataEntity>(
    store: &dyn CoordinationStore,
    folder: &str,
    cache: &EntityCache<T>,
) -> Result<()> {
    let mut fresh = HashMap::new();
    for (path, bytes) in store.list(folder)? {
        let entity: T = from_bytes(&bytes)?;
        fresh.insert(entry_name(&path).to_string(), entity);
    }
    let mut entries = cache.entries.write().expect("entity cache lock poisoned");
    *entries = fresh;
    Ok(())
}

fn apply_event<T: MetadataEntity>(cache: &EntityCache<T>, event: WatchEvent) -> Result<()> {
    let typed = match event {
        WatchEvent::Put { path, payload } => {
            let entity: T = from_bytes(&payload)?;
            let mut entries = cache.entries.write().expect("entity cache lock poisoned");
            entries.insert(entry_name(&path).to_string(), entity.clone());
            EntityWatchEvent::Put(entity)
        }
        WatchEvent::Delete { path } => {
            let name = entry_name(&path).to_string();
            let mut entries = cache.entries.write().expect("entity cache lock poisoned");
            entries.remove(&name);
            EntityWatchEvent::Delete(name)
        }
    };

    // Notify after the cache update so a subscriber that turns around and
    // reads the store sees at least this event's state. Disconnected
    // subscribers are dropped.
    let mut subscribers = cache.subscribers.lock().expect("subscriber lock poisoned");
    subscribers.retain(|tx| tx.send(typed.clone()).is_ok());
    Ok(())
}

fn watch_loop<T: MetadataEntity>(
    store: std::sync::Weak<dyn CoordinationStore>,
    folder: String,
    cache: Arc<EntityCache<T>>,
    mut events: Receiver<WatchEvent>,
) {
    loop {
        // Drain events until the channel drops, polling the shutdown flag
        // so a dropped typed store does not strand this thread.
        loop {
            if cache.shutdown.load(Ordering::Relaxed) {
                return;
            }
            match events.recv_timeout(Duration::from_secs(1)) {
                Ok(event) => {
                    if let Err(err) = apply_event(&cache, event) {
                        tracing::error!("dropping corrupt {} watch event: {err}", folder);
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }

        // The watch channel dropped: the backend session expired. Keep
        // re-registering and resyncing until it comes back or we shut
        // down.
        loop {
            if cache.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let Some(store) = store.upgrade() else {
                return;
            };
            match store.watch(&folder).and_then(|rx| {
                resync(&*store, &folder, &cache)?;
                Ok(rx)
            }) {
                Ok(rx) => {
                    tracing::info!("re-established watch on {folder}");
                    events = rx;
                    break;
                }
                Err(err) => {
                    tracing::warn!("re-establishing watch on {folder}: {err}");
                    thread::sleep(Duration::from_millis(500));
                }
            }
        }
    }
}
