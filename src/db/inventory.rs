//! Subscriber inventory queries.
//!
//! Subscribers come from sim_card joined with reseller and sim_card_config;
//! peering gateways are fetched separately and attached per reseller.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

use crate::error::Result;
use crate::inventory::InventorySource;
use crate::model::SubscriberRecord;

const SQL_RETRIEVE_ALL_USERS: &str = "SELECT card.msisdn, reseller.id AS reseller_id, reseller.name, reseller.sip_hostname, \
     config.enable_sip, config.sip_username, config.sip_password, config.auth_username \
     FROM sim_card card, reseller, sim_card_config config \
     WHERE card.config_id = config.id \
     AND card.reseller_id = reseller.id \
     ORDER BY card.msisdn";

const SQL_RETRIEVE_PEERING_GATEWAYS: &str =
    "SELECT reseller_id, host, port FROM reseller_peering_gateway ORDER BY reseller_id, host, port";

/// A subscriber row as returned by the join.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriberRow {
    pub msisdn: String,
    pub reseller_id: i64,
    pub name: Option<String>,
    pub sip_hostname: Option<String>,
    pub enable_sip: Option<bool>,
    pub sip_username: Option<String>,
    pub sip_password: Option<String>,
    pub auth_username: Option<String>,
}

/// A row of reseller_peering_gateway.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PeeringGatewayRow {
    pub reseller_id: i64,
    pub host: String,
    pub port: Option<i64>,
}

impl PeeringGatewayRow {
    /// `host:port`, or just `host` when no port is configured.
    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

/// Attach each reseller's gateways to its subscribers, keeping row order.
pub fn join_peering_gateways(
    subscribers: Vec<SubscriberRow>,
    gateways: &[PeeringGatewayRow],
) -> Vec<SubscriberRecord> {
    let mut by_reseller: HashMap<i64, Vec<String>> = HashMap::new();
    for gw in gateways {
        by_reseller
            .entry(gw.reseller_id)
            .or_default()
            .push(gw.endpoint());
    }

    subscribers
        .into_iter()
        .map(|row| SubscriberRecord {
            peering_gateways: by_reseller.get(&row.reseller_id).cloned().unwrap_or_default(),
            msisdn: row.msisdn,
            reseller_id: row.reseller_id,
            name: row.name,
            sip_hostname: row.sip_hostname,
            enable_sip: row.enable_sip.unwrap_or(false),
            sip_username: row.sip_username,
            sip_password: row.sip_password,
            auth_username: row.auth_username,
        })
        .collect()
}

impl super::Db {
    /// All subscribers with their gateways attached.
    pub async fn retrieve_all_users(&self) -> Result<Vec<SubscriberRecord>> {
        let subscribers: Vec<SubscriberRow> = sqlx::query_as(SQL_RETRIEVE_ALL_USERS)
            .fetch_all(&self.pool)
            .await?;
        let gateways: Vec<PeeringGatewayRow> = sqlx::query_as(SQL_RETRIEVE_PEERING_GATEWAYS)
            .fetch_all(&self.pool)
            .await?;
        info!(
            users = subscribers.len(),
            gateways = gateways.len(),
            "retrieved users from the database"
        );
        Ok(join_peering_gateways(subscribers, &gateways))
    }
}

#[async_trait]
impl InventorySource for super::Db {
    async fn retrieve_all(&self) -> Result<Vec<SubscriberRecord>> {
        self.retrieve_all_users().await
    }
}
