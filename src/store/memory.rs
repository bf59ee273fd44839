//! In-process [`SharedStore`] for tests and local runs without Redis.
//!
//! Sets keep insertion order. Every publish is recorded so callers can
//! inspect what was sent, and all operations can be made to fail on demand.

use async_trait::async_trait;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use super::{SharedStore, Subscription};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    sets: HashMap<String, IndexSet<String>>,
    values: HashMap<String, String>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    published: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every `(channel, payload)` published so far, oldest first.
    pub fn published(&self) -> Vec<(String, String)> {
        self.lock().published.clone()
    }

    /// Payloads published on `channel`, oldest first.
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear_published(&self) {
        self.lock().published.clear();
    }

    /// Current value stored under `key`.
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable(format!("{op}: memory store set to fail")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn replace_set(&self, set: &str, members: &[String]) -> Result<usize> {
        self.check("replace_set")?;
        let fresh: IndexSet<String> = members.iter().cloned().collect();
        let added = fresh.len();
        let mut inner = self.lock();
        if fresh.is_empty() {
            inner.sets.remove(set);
        } else {
            inner.sets.insert(set.to_string(), fresh);
        }
        Ok(added)
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        self.check("set_many")?;
        let mut inner = self.lock();
        for (k, v) in entries {
            inner.values.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.check("get_many")?;
        let inner = self.lock();
        Ok(keys.iter().map(|k| inner.values.get(k).cloned()).collect())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        self.check("delete_many")?;
        let mut inner = self.lock();
        for k in keys {
            inner.values.remove(k);
        }
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        self.check("members")?;
        Ok(self
            .lock()
            .sets
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.check("publish")?;
        let mut inner = self.lock();
        inner
            .published
            .push((channel.to_string(), payload.to_string()));
        if let Some(subs) = inner.subscribers.get_mut(channel) {
            subs.retain(|tx| tx.send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.check("subscribe")?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel, rx))
    }
}
