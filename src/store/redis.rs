//! Redis-backed [`SharedStore`].
//!
//! Commands and publishes go over two independent `ConnectionManager`s;
//! each subscription owns its own pub/sub connection, since a subscribed
//! Redis connection cannot issue regular commands.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, RedisResult};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{SharedStore, Subscription};
use crate::error::Result;

#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    commands: ConnectionManager,
    publisher: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("commands", &"ConnectionManager")
            .field("publisher", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    /// Open the client and establish the command and publisher connections.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url, "connecting to redis");
        let client = observed("open", redis::Client::open(url))?;
        let commands = observed("connect", ConnectionManager::new(client.clone()).await)?;
        let publisher = observed("connect", ConnectionManager::new(client.clone()).await)?;
        info!("connected to redis");
        Ok(Self {
            client,
            commands,
            publisher,
        })
    }

    /// Simple health check: PING on the command connection.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.commands.clone();
        let _: String = observed("ping", redis::cmd("PING").query_async(&mut conn).await)?;
        Ok(())
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn replace_set(&self, set: &str, members: &[String]) -> Result<usize> {
        let mut conn = self.commands.clone();
        if members.is_empty() {
            // SADD rejects an empty member list
            let _: () = observed("del", conn.del(set).await)?;
            return Ok(0);
        }
        let (added,): (usize,) = observed(
            "sadd",
            redis::pipe()
                .atomic()
                .del(set)
                .ignore()
                .sadd(set, members)
                .query_async(&mut conn)
                .await,
        )?;
        debug!(set, added, "replaced set");
        Ok(added)
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.commands.clone();
        let _: () = observed("mset", conn.mset(entries).await)?;
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.commands.clone();
        // Explicit MGET: the typed helper downgrades a single key to GET.
        let values: Vec<Option<String>> = observed(
            "mget",
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await,
        )?;
        Ok(values)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.commands.clone();
        let _: () = observed("del", conn.del(keys).await)?;
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        let mut conn = self.commands.clone();
        let members: Vec<String> = observed("smembers", conn.smembers(set).await)?;
        Ok(members)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = observed("publish", conn.publish(channel, payload).await)?;
        debug!(channel, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = observed("connect", self.client.get_async_pubsub().await)?;
        observed("subscribe", pubsub.subscribe(channel).await)?;
        info!(channel, "subscribed");

        let (tx, rx) = mpsc::unbounded_channel();
        let name = channel.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            // consumer dropped
                            return;
                        }
                    }
                    Err(e) => warn!(channel = %name, "undecodable pub/sub payload: {e}"),
                }
            }
            warn!(channel = %name, "pub/sub connection closed");
        });

        Ok(Subscription::new(channel, rx))
    }
}

/// How a failed Redis call is reported.
///
/// Dropped or refused connections are re-established by the
/// `ConnectionManager` on the next command.
pub fn failure_kind(err: &RedisError) -> &'static str {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        "reconnecting"
    } else if err.is_timeout() {
        "timeout"
    } else {
        "error"
    }
}

fn observed<T>(op: &'static str, result: RedisResult<T>) -> Result<T> {
    result.map_err(|e| {
        warn!(op, kind = failure_kind(&e), "redis call failed: {e}");
        e.into()
    })
}
