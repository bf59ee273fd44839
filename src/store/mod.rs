//! Shared key-value store and pub/sub channel.
//!
//! The controller materializes the inventory here for workers to read and
//! uses the same store's pub/sub to talk to them. [`RedisStore`] is the
//! production backend; [`MemoryStore`] backs the tests.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Operations the controller needs from the shared store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically delete `set` and re-add `members`. Returns the number added.
    async fn replace_set(&self, set: &str, members: &[String]) -> Result<usize>;

    /// Write all key/value pairs.
    async fn set_many(&self, entries: &[(String, String)]) -> Result<()>;

    /// Read values for `keys`, in the same order. Missing keys are `None`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Delete all `keys`.
    async fn delete_many(&self, keys: &[String]) -> Result<()>;

    /// All members of `set`.
    async fn members(&self, set: &str) -> Result<Vec<String>>;

    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to `channel` on a dedicated subscriber handle.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// Payloads received on a subscribed channel, queued for a single consumer.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload. `None` once the subscriber connection has gone away.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
