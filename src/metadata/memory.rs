//! In-process implementation of the coordination store.
//!
//! Authoritative for tests and single-node runs, and the reference
//! semantics for any networked backend: atomic create, last-writer-wins
//! update, and per-prefix watches that deliver events in write order.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::errors::{Error, Result};
use crate::metadata::store::{CoordinationStore, WatchEvent};

struct Watcher {
    prefix: String,
    tx: Sender<WatchEvent>,
}

#[derive(Default)]
pub struct MemoryCoordinationStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    watchers: Mutex<Vec<Watcher>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Fan an event out to every watcher whose prefix covers the path.
    // Watchers whose receiver is gone are dropped.
    fn notify(&self, path: &str, event: WatchEvent) {
        let mut watchers = self.watchers.lock().expect("watcher lock poisoned");
        watchers.retain(|watcher| {
            if !path.starts_with(watcher.prefix.as_str()) {
                return true;
            }
            watcher.tx.send(event.clone()).is_ok()
        });
    }
}

impl CoordinationStore for MemoryCoordinationStore {
    fn create(&self, path: &str, payload: &[u8]) -> Result<()> {
        {
            let mut entries = self.entries.lock().expect("entry lock poisoned");
            if entries.contains_key(path) {
                return Err(Error::AlreadyExists(path.to_string()));
            }
            entries.insert(path.to_string(), payload.to_vec());
        }
        self.notify(
            path,
            WatchEvent::Put {
                path: path.to_string(),
                payload: payload.to_vec(),
            },
        );
        Ok(())
    }

    fn put(&self, path: &str, payload: &[u8]) -> Result<()> {
        {
            let mut entries = self.entries.lock().expect("entry lock poisoned");
            match entries.get_mut(path) {
                Some(existing) => *existing = payload.to_vec(),
                None => {
                    return Err(Error::MetadataStore(format!("no entry at {path}")));
                }
            }
        }
        self.notify(
            path,
            WatchEvent::Put {
                path: path.to_string(),
                payload: payload.to_vec(),
            },
        );
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().expect("entry lock poisoned");
        Ok(entries.get(path).cloned())
    }

    fn delete(&self, path: &str) -> Result<()> {
        {
            let mut entries = self.entries.lock().expect("entry lock poisoned");
            if entries.remove(path).is_none() {
                return Err(Error::MetadataStore(format!("no entry at {path}")));
            }
        }
        self.notify(
            path,
            WatchEvent::Delete {
                path: path.to_string(),
            },
        );
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.lock().expect("entry lock poisoned");
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, payload)| (path.clone(), payload.clone()))
            .collect())
    }

    fn watch(&self, prefix: &str) -> Result<Receiver<WatchEvent>> {
        let (tx, rx) = unbounded();
        self.watchers
            .lock()
            .expect("watcher lock poisoned")
            .push(Watcher {
                prefix: prefix.to_string(),
                tx,
            });
        Ok(rx)
    }
}
