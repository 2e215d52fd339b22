//! Persistence contract for the delivery engine.
//!
//! Two implementations ship with the crate: [`PostgresStore`] for
//! production and [`MemoryStore`] for tests and dry runs. Both interpret
//! the same [`Predicate`] AST and always scope reads by tenant, active
//! flag, and soft-delete state.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaign::{CampaignBundle, CampaignStatus};
use crate::error::Result;
use crate::segment::Predicate;
use crate::subscriber::Recipient;

/// One row of the campaign-send ledger: a single delivery attempt for one
/// (campaign, subscriber) pair. Append-only once written; later
/// corrections set `delivered_at`/`clicked_at`, never delete the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub subscriber_id: Uuid,
    pub sent_at: DateTime<Utc>,
    /// Set when the gateway accepted the message ("accepted", not
    /// "confirmed opened").
    pub delivered_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    /// Set only on failure.
    pub error: Option<String>,
}

impl SendRecord {
    pub fn accepted(campaign_id: Uuid, subscriber_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            subscriber_id,
            sent_at: at,
            delivered_at: Some(at),
            clicked_at: None,
            error: None,
        }
    }

    pub fn failed(
        campaign_id: Uuid,
        subscriber_id: Uuid,
        at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            subscriber_id,
            sent_at: at,
            delivered_at: None,
            clicked_at: None,
            error: Some(error.into()),
        }
    }
}

/// Storage operations the engine needs. Scoped by tenant throughout.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Load a campaign with its segments (and conditions), hero images,
    /// and active logo. Soft-deleted campaigns are invisible here.
    async fn load_campaign(&self, tenant_id: Uuid, campaign_id: Uuid)
        -> Result<Option<CampaignBundle>>;

    /// Atomic conditional status transition. Returns `false` when the row
    /// was not in any of the `from` states; the loser of a concurrent
    /// send race observes exactly this.
    async fn try_transition(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool>;

    /// Finalize a completed run: status `Sent`, `sent_at = now`,
    /// `impressions` incremented by the run's sent count. One atomic
    /// write. A no-op unless the row is still `Sending` and not
    /// soft-deleted, so a campaign cancelled or deleted mid-run stays
    /// terminal.
    async fn mark_sent(&self, tenant_id: Uuid, campaign_id: Uuid, sent_count: i64) -> Result<()>;

    /// Record an unrecoverable mid-run failure. Same `Sending` and
    /// soft-delete guard as [`Self::mark_sent`].
    async fn mark_failed(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<()>;

    /// Run one segment predicate. The implementation always adds
    /// `tenant_id`, `is_active`, and `deleted_at IS NULL` guards on top of
    /// the predicate.
    async fn find_recipients(&self, tenant_id: Uuid, predicate: &Predicate)
        -> Result<Vec<Recipient>>;

    /// Bulk-append ledger rows for one batch.
    async fn insert_send_records(&self, records: &[SendRecord]) -> Result<()>;

    /// Retire a dead endpoint: `is_active = false`, `unsubscribed_at =
    /// now`, only if the subscriber is still active (exactly-once).
    async fn retire_subscriber(&self, tenant_id: Uuid, subscriber_id: Uuid) -> Result<()>;
}
