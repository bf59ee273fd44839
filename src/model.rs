//! Core data model.
//!
//! A subscriber record is everything a worker needs to register one MSISDN
//! upstream. Control and assignment messages are the JSON payloads exchanged
//! with workers over pub/sub.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// One subscriber with its reseller routing and SIP credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    /// Unique within one inventory snapshot.
    pub msisdn: String,

    pub reseller_id: i64,

    /// Reseller name.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub sip_hostname: Option<String>,

    #[serde(default)]
    pub enable_sip: bool,

    #[serde(default)]
    pub sip_username: Option<String>,

    #[serde(default)]
    pub sip_password: Option<String>,

    #[serde(default)]
    pub auth_username: Option<String>,

    /// `host:port` endpoints of the reseller's peering gateways.
    #[serde(default)]
    pub peering_gateways: Vec<String>,
}

impl std::fmt::Debug for SubscriberRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRecord")
            .field("msisdn", &self.msisdn)
            .field("reseller_id", &self.reseller_id)
            .field("name", &self.name)
            .field("sip_hostname", &self.sip_hostname)
            .field("enable_sip", &self.enable_sip)
            .field("sip_username", &self.sip_username)
            .field("sip_password", &self.sip_password.as_ref().map(|_| "[REDACTED]"))
            .field("auth_username", &self.auth_username)
            .field("peering_gateways", &self.peering_gateways)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Control channel
// ---------------------------------------------------------------------------

/// Worker announcement on the shared control channel.
///
/// Both fields are kept loose so that the controller can log and drop
/// malformed announcements instead of failing to parse them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

/// A recognized control-channel action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Register,
    Unregister,
}

impl ControlMessage {
    pub fn register(channel: impl Into<String>) -> Self {
        Self {
            action: Some("register".to_string()),
            channel: Some(channel.into()),
        }
    }

    pub fn unregister(channel: impl Into<String>) -> Self {
        Self {
            action: Some("unregister".to_string()),
            channel: Some(channel.into()),
        }
    }

    /// The action, if it is one the controller understands.
    pub fn parsed_action(&self) -> Option<ControlAction> {
        match self.action.as_deref() {
            Some("register") => Some(ControlAction::Register),
            Some("unregister") => Some(ControlAction::Unregister),
            _ => None,
        }
    }

    /// The channel, treating an empty string as missing.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref().filter(|c| !c.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// One worker's slice of the inventory, published on its private channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignMessage {
    pub action: String,
    pub users: Vec<SubscriberRecord>,
}

impl AssignMessage {
    pub fn new(users: Vec<SubscriberRecord>) -> Self {
        Self {
            action: "assign".to_string(),
            users,
        }
    }
}
