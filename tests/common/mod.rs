//! Shared fixtures: subscriber records and a scripted inventory source.

#![allow(dead_code)]

use async_trait::async_trait;
use regbot_controller::error::{Error, Result};
use regbot_controller::inventory::InventorySource;
use regbot_controller::model::SubscriberRecord;
use regbot_controller::store::{MemoryStore, SharedStore, Subscription};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub fn record(msisdn: &str) -> SubscriberRecord {
    SubscriberRecord {
        msisdn: msisdn.to_string(),
        reseller_id: 7,
        name: Some("acme".to_string()),
        sip_hostname: Some("sip.acme.example".to_string()),
        enable_sip: true,
        sip_username: Some(format!("u{msisdn}")),
        sip_password: Some("secret".to_string()),
        auth_username: Some(format!("auth{msisdn}")),
        peering_gateways: vec!["10.0.0.1:5060".to_string()],
    }
}

/// `n` records with MSISDNs that sort in creation order.
pub fn records(n: usize) -> Vec<SubscriberRecord> {
    (0..n).map(|i| record(&format!("1555{i:06}"))).collect()
}

/// Inventory source whose contents and failures are set by the test.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    records: Mutex<Vec<SubscriberRecord>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(records: Vec<SubscriberRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn set(&self, records: Vec<SubscriberRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventorySource for ScriptedSource {
    async fn retrieve_all(&self) -> Result<Vec<SubscriberRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Other("scripted source failure".to_string()));
        }
        Ok(self.records.lock().unwrap().clone())
    }
}

/// [`MemoryStore`] whose `replace_set` alone can be made to fail.
#[derive(Debug, Default)]
pub struct SetSwapFailure {
    pub inner: MemoryStore,
    failing: AtomicBool,
}

impl SetSwapFailure {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SharedStore for SetSwapFailure {
    async fn replace_set(&self, set: &str, members: &[String]) -> Result<usize> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("set swap refused".to_string()));
        }
        self.inner.replace_set(set, members).await
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        self.inner.set_many(entries).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.inner.get_many(keys).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        self.inner.delete_many(keys).await
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        self.inner.members(set).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.inner.subscribe(channel).await
    }
}

pub fn register(channel: &str) -> String {
    serde_json::json!({"action": "register", "channel": channel}).to_string()
}

pub fn unregister(channel: &str) -> String {
    serde_json::json!({"action": "unregister", "channel": channel}).to_string()
}
