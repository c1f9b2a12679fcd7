//! One-shot inventory refresh.
//!
//! Fetches the shutter inventory and reconciles it into the twins.  Any
//! failure (transport error, non-2xx answer, unreadable body) is retried with
//! exponential backoff and full jitter until the attempt budget is spent.  A
//! connection reset on a pooled keep-alive connection is retried at the same
//! tier.  The refresh never reschedules itself after giving up; that call
//! belongs to the host.

use calyps_link::backoff::{Backoff, BackoffPolicy};
use calyps_link::inventory::{Inventory, SHUTTER_TYPE, parse_inventory};
use calyps_link::transport::{INVENTORY_PATH, Transport};
use calyps_twin::TwinTracker;
use calyps_types::CalypsError;
use tokio::time;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    pub backoff: BackoffPolicy,
}

/// What one successful refresh did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub created: usize,
    pub updated: usize,
    /// Records skipped as malformed.
    pub rejected: usize,
    /// Objects of another type.
    pub ignored: usize,
    /// Requests spent, the successful one included.
    pub attempts: u32,
}

/// Fetch the inventory and apply it to `tracker`.
///
/// Idempotent: running it twice on the same inventory leaves the same twins.
///
/// # Errors
///
/// [`CalypsError::DiscoveryExhausted`] once every attempt has failed.
#[instrument(skip_all)]
pub async fn refresh(
    transport: &dyn Transport,
    tracker: &TwinTracker,
    config: &DiscoveryConfig,
) -> Result<DiscoveryReport, CalypsError> {
    let mut backoff = Backoff::new(config.backoff.clone());

    loop {
        backoff.record_attempt();
        let err = match fetch(transport).await {
            Ok(inventory) => return Ok(apply(tracker, inventory, backoff.attempts())),
            Err(e) => e,
        };

        if !backoff.can_retry() {
            error!(attempts = backoff.attempts(), error = %err, "inventory discovery gave up");
            return Err(CalypsError::DiscoveryExhausted {
                attempts: backoff.attempts(),
                last_error: err.to_string(),
            });
        }

        let transient = matches!(&err, CalypsError::Transport(t) if t.is_transient());
        let delay = if transient {
            backoff.hold_delay()
        } else {
            backoff.next_delay()
        };
        warn!(
            attempt = backoff.attempts(),
            transient,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "inventory discovery failed, retrying"
        );
        time::sleep(delay).await;
    }
}

async fn fetch(transport: &dyn Transport) -> Result<Inventory, CalypsError> {
    let body = transport
        .post(INVENTORY_PATH, &[("type", SHUTTER_TYPE)])
        .await?;
    Ok(parse_inventory(&body)?)
}

fn apply(tracker: &TwinTracker, inventory: Inventory, attempts: u32) -> DiscoveryReport {
    for (identity, e) in &inventory.rejected {
        warn!(
            device = identity.as_deref().unwrap_or("?"),
            error = %e,
            "skipping inventory record"
        );
    }
    let (created, updated) = tracker.apply_inventory(&inventory.records);
    let report = DiscoveryReport {
        created,
        updated,
        rejected: inventory.rejected.len(),
        ignored: inventory.ignored,
        attempts,
    };
    info!(
        created,
        updated,
        rejected = report.rejected,
        attempts,
        "inventory applied"
    );
    report
}
