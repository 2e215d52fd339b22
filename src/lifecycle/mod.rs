//! The campaign lifecycle controller: the engine's single entry point for
//! a send run.
//!
//! A run is: win the status race (`SENDING`), resolve the audience, build
//! the payload template, dispatch in batches, finalize (`SENT` with the
//! run's sent count folded into impressions). Anything fatal after the
//! transition marks the campaign `FAILED` and re-raises; delivery failures
//! of individual recipients or batches are accounting, not errors.

use std::sync::Arc;

use uuid::Uuid;

use crate::audience::resolve_audience;
use crate::campaign::{CampaignBundle, CampaignStatus};
use crate::config::DispatchConfig;
use crate::dispatch::{retirement, BatchDispatcher};
use crate::error::{EngineError, Result};
use crate::gateway::PushGateway;
use crate::metrics::DeliveryMetrics;
use crate::payload::build_template;
use crate::store::CampaignStore;

/// Per-call knobs for [`CampaignEngine::send_campaign`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Allow a campaign already in `SENT` to go out again. Resends
    /// re-resolve the audience and accumulate impressions.
    pub allow_resend: bool,
}

/// Outcome of one completed send run.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub campaign_id: Uuid,
    /// Unique recipients after segment dedup.
    pub recipients: usize,
    pub sent_count: usize,
    pub failed_count: usize,
    /// Batch-level error strings; per-recipient errors live in the ledger.
    pub errors: Vec<String>,
    /// Dead endpoints retired during the run.
    pub retired_count: usize,
}

pub struct CampaignEngine {
    store: Arc<dyn CampaignStore>,
    gateway: Option<Arc<dyn PushGateway>>,
    dispatch: DispatchConfig,
}

impl CampaignEngine {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self {
            store,
            gateway: None,
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PushGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_dispatch_config(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Execute a full send run for one campaign.
    ///
    /// Exactly one caller wins when several race on the same campaign; the
    /// losers get a `Validation` error and the campaign state is untouched
    /// by them. A missing gateway or unknown campaign fails before any
    /// mutation.
    #[tracing::instrument(
        name = "engine.send_campaign",
        skip(self, options),
        fields(tenant_id = %tenant_id, campaign_id = %campaign_id)
    )]
    pub async fn send_campaign(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        options: SendOptions,
    ) -> Result<SendReport> {
        let gateway = self
            .gateway
            .clone()
            .ok_or_else(|| EngineError::Config("push gateway is not configured".to_string()))?;

        let bundle = self
            .store
            .load_campaign(tenant_id, campaign_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("campaign {}", campaign_id)))?;

        let mut from = vec![
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Paused,
            CampaignStatus::Failed,
        ];
        if options.allow_resend {
            from.push(CampaignStatus::Sent);
        }

        let won = self
            .store
            .try_transition(tenant_id, campaign_id, &from, CampaignStatus::Sending)
            .await?;
        if !won {
            // The snapshot status explains the refusal well enough even if
            // the row moved between the load and the transition.
            let reason = match bundle.campaign.status {
                CampaignStatus::Sending => "campaign is already sending".to_string(),
                CampaignStatus::Sent => {
                    "campaign was already sent; set allow_resend to send it again".to_string()
                }
                CampaignStatus::Cancelled => "campaign is cancelled".to_string(),
                other => format!("campaign is not sendable from status {}", other.as_str()),
            };
            return Err(EngineError::Validation(reason));
        }

        DeliveryMetrics::record_run_started();

        match self.run(tenant_id, campaign_id, &bundle, gateway).await {
            Ok(report) => {
                DeliveryMetrics::record_run_completed();
                tracing::info!(
                    recipients = report.recipients,
                    sent = report.sent_count,
                    failed = report.failed_count,
                    retired = report.retired_count,
                    "Campaign send run completed"
                );
                Ok(report)
            }
            Err(e) => {
                DeliveryMetrics::record_run_failed();
                tracing::error!(error = %e, "Campaign send run failed");
                if let Err(mark_err) = self.store.mark_failed(tenant_id, campaign_id).await {
                    tracing::error!(
                        error = %mark_err,
                        "Could not mark campaign as failed after a run error"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        bundle: &CampaignBundle,
        gateway: Arc<dyn PushGateway>,
    ) -> Result<SendReport> {
        let audience = resolve_audience(self.store.as_ref(), tenant_id, &bundle.segments).await?;

        if audience.is_empty() {
            // A successful run that reached nobody; still finalized as SENT.
            self.store.mark_sent(tenant_id, campaign_id, 0).await?;
            tracing::info!("Campaign resolved to an empty audience");
            return Ok(SendReport {
                campaign_id,
                recipients: 0,
                sent_count: 0,
                failed_count: 0,
                errors: Vec::new(),
                retired_count: 0,
            });
        }

        let template = build_template(bundle);

        let (queue, worker) = retirement::spawn(self.store.clone());
        let dispatcher =
            BatchDispatcher::new(gateway, self.store.clone(), self.dispatch.clone(), queue);
        let summary = dispatcher
            .dispatch(tenant_id, campaign_id, &audience, &template)
            .await;

        // Drop the dispatcher (and with it the last queue handle) so the
        // worker drains; retirements are then visible to the next run.
        drop(dispatcher);
        let retired_count = worker.join().await;

        self.store
            .mark_sent(tenant_id, campaign_id, summary.sent as i64)
            .await?;

        Ok(SendReport {
            campaign_id,
            recipients: audience.len(),
            sent_count: summary.sent,
            failed_count: summary.failed,
            errors: summary.errors,
            retired_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{Campaign, DeliveryMode, NotificationOptions, ScheduleMode};
    use crate::gateway::{BatchResponse, GatewayError, GatewayMessage, MessageOutcome};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    struct AcceptAllGateway;

    #[async_trait]
    impl PushGateway for AcceptAllGateway {
        async fn send_batch(
            &self,
            messages: Vec<GatewayMessage>,
        ) -> std::result::Result<BatchResponse, GatewayError> {
            Ok(BatchResponse {
                outcomes: messages
                    .iter()
                    .map(|_| MessageOutcome::Accepted {
                        message_id: "mid".to_string(),
                    })
                    .collect(),
            })
        }
    }

    fn campaign(tenant_id: Uuid, status: CampaignStatus) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            tenant_id,
            title: "t".to_string(),
            message: "m".to_string(),
            category: None,
            delivery_mode: DeliveryMode::Regular,
            schedule_mode: ScheduleMode::Now,
            scheduled_at: None,
            status,
            impressions: 0,
            clicks: 0,
            revenue: 0.0,
            options: NotificationOptions::default(),
            destination_url: None,
            action_button_label: None,
            sent_at: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn engine(store: Arc<MemoryStore>) -> CampaignEngine {
        CampaignEngine::new(store)
            .with_gateway(Arc::new(AcceptAllGateway))
            .with_dispatch_config(DispatchConfig {
                batch_size: 500,
                batch_delay_ms: 0,
            })
    }

    #[tokio::test]
    async fn test_missing_gateway_fails_before_any_mutation() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let c = campaign(tenant_id, CampaignStatus::Draft);
        let id = c.id;
        store.insert_campaign(c);

        let engine = CampaignEngine::new(store.clone());
        let err = engine
            .send_campaign(tenant_id, id, SendOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(store.campaign(id).unwrap().status, CampaignStatus::Draft);
    }

    #[tokio::test]
    async fn test_unknown_campaign_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let err = engine
            .send_campaign(Uuid::new_v4(), Uuid::new_v4(), SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zero_audience_still_finalizes_as_sent() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let c = campaign(tenant_id, CampaignStatus::Draft);
        let id = c.id;
        store.insert_campaign(c);

        let engine = engine(store.clone());
        let report = engine
            .send_campaign(tenant_id, id, SendOptions::default())
            .await
            .unwrap();

        assert_eq!(report.recipients, 0);
        assert_eq!(report.sent_count, 0);
        let c = store.campaign(id).unwrap();
        assert_eq!(c.status, CampaignStatus::Sent);
        assert_eq!(c.impressions, 0);
        assert!(c.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_resend_requires_explicit_opt_in() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let c = campaign(tenant_id, CampaignStatus::Sent);
        let id = c.id;
        store.insert_campaign(c);

        let engine = engine(store.clone());
        let err = engine
            .send_campaign(tenant_id, id, SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.campaign(id).unwrap().status, CampaignStatus::Sent);

        let report = engine
            .send_campaign(tenant_id, id, SendOptions { allow_resend: true })
            .await
            .unwrap();
        assert_eq!(report.recipients, 0);
        assert_eq!(store.campaign(id).unwrap().status, CampaignStatus::Sent);
    }

    #[tokio::test]
    async fn test_cancelled_campaign_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let c = campaign(tenant_id, CampaignStatus::Cancelled);
        let id = c.id;
        store.insert_campaign(c);

        let engine = engine(store.clone());
        let err = engine
            .send_campaign(tenant_id, id, SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.campaign(id).unwrap().status, CampaignStatus::Cancelled);
    }
}
