//! Subscriber inventory: where it comes from, how it is fingerprinted, and
//! how a snapshot is materialized in the shared store.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::SubscriberRecord;
use crate::store::SharedStore;

/// Pull-style source of the current subscriber inventory.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Every current subscriber. May be empty.
    async fn retrieve_all(&self) -> Result<Vec<SubscriberRecord>>;
}

/// Names under which a snapshot lives in the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    /// Set holding every MSISDN in the snapshot.
    pub set_name: String,
    /// Prefix of the per-MSISDN record keys.
    pub key_prefix: String,
}

impl Default for SnapshotLayout {
    fn default() -> Self {
        Self {
            set_name: "msisdns".to_string(),
            key_prefix: "msisdn:".to_string(),
        }
    }
}

impl SnapshotLayout {
    pub fn record_key(&self, msisdn: &str) -> String {
        format!("{}{}", self.key_prefix, msisdn)
    }

    /// Raw MSISDN for a record key. Keys without the prefix are returned as-is.
    pub fn msisdn_from_key<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.key_prefix.as_str()).unwrap_or(key)
    }
}

/// Hex SHA-256 over the records ordered by MSISDN.
///
/// Row order from the source does not affect the digest; any field change does.
pub fn content_digest(records: &[SubscriberRecord]) -> Result<String> {
    let mut ordered: Vec<&SubscriberRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.msisdn.cmp(&b.msisdn));
    let canonical = serde_json::to_vec(&ordered)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Replace the stored snapshot with `records`.
///
/// New entries are written before the set is swapped, and only keys absent
/// from the new snapshot are deleted afterwards, so a failure part way leaves
/// every set member backed by an entry. Nothing is merged. Fails with
/// [`Error::Invariant`] if the store does not end up holding exactly one set
/// member per record.
pub async fn store_inventory(
    store: &dyn SharedStore,
    layout: &SnapshotLayout,
    records: &[SubscriberRecord],
) -> Result<()> {
    let mut seen = HashSet::with_capacity(records.len());
    if let Some(dup) = records.iter().find(|r| !seen.insert(r.msisdn.as_str())) {
        return Err(Error::Invariant(format!(
            "duplicate msisdn {} in inventory",
            dup.msisdn
        )));
    }

    let previous = store.members(&layout.set_name).await?;

    let mut entries = Vec::with_capacity(records.len());
    for r in records {
        entries.push((layout.record_key(&r.msisdn), serde_json::to_string(r)?));
    }
    store.set_many(&entries).await?;

    let msisdns: Vec<String> = records.iter().map(|r| r.msisdn.clone()).collect();
    let added = store.replace_set(&layout.set_name, &msisdns).await?;

    let stale: Vec<String> = previous
        .iter()
        .filter(|m| !seen.contains(m.as_str()))
        .map(|m| layout.record_key(m))
        .collect();
    store.delete_many(&stale).await?;
    info!(added, removed = stale.len(), "stored msisdn inventory");

    if added != records.len() {
        return Err(Error::Invariant(format!(
            "stored {added} msisdns for an inventory of {}",
            records.len()
        )));
    }
    Ok(())
}
