//! Batch dispatch of a resolved audience.
//!
//! Recipients are partitioned into gateway-sized batches and sent
//! sequentially with an inter-batch delay; the gateway's rate limit and
//! per-call cap make intra-run parallelism counterproductive and would
//! muddy the failure accounting. Every recipient of every batch ends up in
//! the campaign-send ledger, whether the batch succeeded, partially
//! failed, or failed wholesale.

pub mod retirement;

pub use retirement::{RetirementQueue, RetirementRequest, RetirementWorker};

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::gateway::{MessageOutcome, PushGateway, RecipientIds};
use crate::metrics::DeliveryMetrics;
use crate::payload::MessageTemplate;
use crate::store::{CampaignStore, SendRecord};
use crate::subscriber::Recipient;

/// Accounting for one dispatch run.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    /// Recipients the gateway accepted.
    pub sent: usize,
    /// Recipients that failed, per-recipient or with their whole batch.
    pub failed: usize,
    /// Batch-level error strings (transport failures, ledger write
    /// failures). Per-recipient errors live in the ledger only.
    pub errors: Vec<String>,
}

pub struct BatchDispatcher {
    gateway: Arc<dyn PushGateway>,
    store: Arc<dyn CampaignStore>,
    config: DispatchConfig,
    retirements: RetirementQueue,
}

impl BatchDispatcher {
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        store: Arc<dyn CampaignStore>,
        config: DispatchConfig,
        retirements: RetirementQueue,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
            retirements,
        }
    }

    /// Deliver the template to every recipient, in batches.
    #[tracing::instrument(
        name = "dispatcher.dispatch",
        skip(self, recipients, template),
        fields(campaign_id = %campaign_id, recipient_count = recipients.len())
    )]
    pub async fn dispatch(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        recipients: &[Recipient],
        template: &MessageTemplate,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if recipients.is_empty() {
            return summary;
        }

        let batch_size = self.config.batch_size.min(self.gateway.max_batch_size()).max(1);
        let total_batches = recipients.len().div_ceil(batch_size);

        for (index, batch) in recipients.chunks(batch_size).enumerate() {
            self.send_one_batch(tenant_id, campaign_id, index, batch, template, &mut summary)
                .await;

            // Gateway rate limit pacing; no pause after the final batch.
            if index + 1 < total_batches {
                tokio::time::sleep(self.config.batch_delay()).await;
            }
        }

        tracing::info!(
            campaign_id = %campaign_id,
            sent = summary.sent,
            failed = summary.failed,
            batches = total_batches,
            "Dispatch run completed"
        );

        summary
    }

    async fn send_one_batch(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        index: usize,
        batch: &[Recipient],
        template: &MessageTemplate,
        summary: &mut DispatchSummary,
    ) {
        let sent_at = Utc::now();
        let messages = batch
            .iter()
            .map(|recipient| {
                template.personalize(
                    recipient,
                    RecipientIds {
                        subscriber_id: recipient.subscriber_id,
                        notification_id: Uuid::new_v4(),
                    },
                )
            })
            .collect();

        DeliveryMetrics::record_batch();

        let mut records = Vec::with_capacity(batch.len());
        match self.gateway.send_batch(messages).await {
            Ok(response) => {
                for (position, recipient) in batch.iter().enumerate() {
                    match response.outcomes.get(position) {
                        Some(MessageOutcome::Accepted { .. }) => {
                            summary.sent += 1;
                            records.push(SendRecord::accepted(
                                campaign_id,
                                recipient.subscriber_id,
                                sent_at,
                            ));
                        }
                        Some(MessageOutcome::Failed { reason, message }) => {
                            summary.failed += 1;
                            records.push(SendRecord::failed(
                                campaign_id,
                                recipient.subscriber_id,
                                sent_at,
                                message.clone(),
                            ));
                            if reason.is_permanent() {
                                self.retirements.retire(RetirementRequest {
                                    tenant_id,
                                    subscriber_id: recipient.subscriber_id,
                                    reason: *reason,
                                });
                            }
                        }
                        // The gateway answered with fewer outcomes than
                        // messages; the unaccounted recipients still get a
                        // ledger row.
                        None => {
                            summary.failed += 1;
                            records.push(SendRecord::failed(
                                campaign_id,
                                recipient.subscriber_id,
                                sent_at,
                                "gateway returned no outcome for this message",
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                // The whole multicast call failed: every recipient in the
                // batch is failed, recorded, and later batches still run.
                let message = e.to_string();
                DeliveryMetrics::record_batch_failure();
                summary.failed += batch.len();
                summary.errors.push(message.clone());
                for recipient in batch {
                    records.push(SendRecord::failed(
                        campaign_id,
                        recipient.subscriber_id,
                        sent_at,
                        message.clone(),
                    ));
                }
                tracing::warn!(
                    campaign_id = %campaign_id,
                    batch = index + 1,
                    recipients = batch.len(),
                    error = %message,
                    "Batch multicast call failed"
                );
            }
        }

        let accepted = records.iter().filter(|r| r.error.is_none()).count();
        DeliveryMetrics::record_sent(accepted as u64);
        DeliveryMetrics::record_failed((records.len() - accepted) as u64);

        if let Err(e) = self.store.insert_send_records(&records).await {
            tracing::error!(
                campaign_id = %campaign_id,
                batch = index + 1,
                error = %e,
                "Failed to persist delivery records"
            );
            summary
                .errors
                .push(format!("ledger write failed for batch {}: {}", index + 1, e));
        }
    }
}
