//! Task assignment: split the stored inventory across registered workers.

use tracing::{Instrument, debug, info};

use crate::error::{Error, Result};
use crate::inventory::SnapshotLayout;
use crate::model::{AssignMessage, SubscriberRecord};
use crate::store::SharedStore;
use crate::telemetry::controller::start_assignment_span;
use crate::telemetry::metrics;

/// What one round handed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentSummary {
    /// Workers that received an `assign` message.
    pub workers_assigned: usize,
    pub msisdns_assigned: usize,
}

/// Slice sizes for `msisdns` identifiers over `workers` workers.
///
/// One entry per worker that gets a message, in registry order. The first
/// worker also takes the remainder. With more workers than identifiers each
/// of the first `msisdns` workers takes one and the rest are left out.
pub fn allocation_sizes(msisdns: usize, workers: usize) -> Vec<usize> {
    if msisdns == 0 || workers == 0 {
        return Vec::new();
    }
    let base = (msisdns / workers).max(1);
    let extra = if msisdns >= workers { msisdns % workers } else { 0 };

    let mut sizes = Vec::with_capacity(workers.min(msisdns));
    let mut remaining = msisdns;
    for i in 0..workers {
        if remaining == 0 {
            break;
        }
        let quota = if i == 0 { base + extra } else { base };
        let quota = quota.min(remaining);
        sizes.push(quota);
        remaining -= quota;
    }
    sizes
}

/// Run one assignment round against `workers` (in registry order).
///
/// Reads the MSISDN set, sorts it for a stable order, and publishes one
/// `assign` message per worker that gets a slice. The `msisdn` of each
/// record is the raw identifier, not the storage key.
pub async fn assign_tasks(
    store: &dyn SharedStore,
    layout: &SnapshotLayout,
    workers: &[String],
) -> Result<AssignmentSummary> {
    let span = start_assignment_span(workers.len());
    async {
        if workers.is_empty() {
            info!("no workers, nothing to do");
            return Ok(AssignmentSummary::default());
        }

        let mut msisdns = store.members(&layout.set_name).await?;
        if msisdns.is_empty() {
            info!("no msisdns found in the store, nothing to do");
            return Ok(AssignmentSummary::default());
        }
        msisdns.sort();
        tracing::Span::current().record("assignment.msisdns", msisdns.len());

        let sizes = allocation_sizes(msisdns.len(), workers.len());
        info!(
            workers = workers.len(),
            msisdns = msisdns.len(),
            per_worker = msisdns.len() / workers.len(),
            "assigning tasks"
        );

        let mut start = 0;
        for (channel, quota) in workers.iter().zip(&sizes) {
            let slice = &msisdns[start..start + quota];
            assign_to_channel(store, layout, channel, slice).await?;
            start += quota;
        }

        info!("finished assigning tasks");
        Ok(AssignmentSummary {
            workers_assigned: sizes.len(),
            msisdns_assigned: start,
        })
    }
    .instrument(span)
    .await
}

async fn assign_to_channel(
    store: &dyn SharedStore,
    layout: &SnapshotLayout,
    channel: &str,
    msisdns: &[String],
) -> Result<()> {
    let keys: Vec<String> = msisdns.iter().map(|m| layout.record_key(m)).collect();
    let values = store.get_many(&keys).await?;
    if values.len() != keys.len() {
        return Err(Error::Invariant(format!(
            "requested {} records, store returned {}",
            keys.len(),
            values.len()
        )));
    }

    let mut users = Vec::with_capacity(keys.len());
    for (msisdn, value) in msisdns.iter().zip(values) {
        let raw = value.ok_or_else(|| {
            Error::Other(format!("no stored record for {}", layout.record_key(msisdn)))
        })?;
        let mut record: SubscriberRecord = serde_json::from_str(&raw)?;
        record.msisdn = msisdn.clone();
        users.push(record);
    }

    let payload = serde_json::to_string(&AssignMessage::new(users))?;
    store.publish(channel, &payload).await?;
    debug!(channel, msisdns = msisdns.len(), "assigned tasks to channel");
    metrics::msisdns_assigned().add(msisdns.len() as u64, &[]);
    Ok(())
}
