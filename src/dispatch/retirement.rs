//! Fire-and-forget retirement of dead delivery endpoints.
//!
//! When the gateway reports a token as permanently invalid, the dispatcher
//! drops a request on this queue and moves on. A spawned worker consumes
//! the queue and marks subscribers inactive; a retirement failure is
//! logged and never affects the send run's outcome.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::gateway::FailureReason;
use crate::metrics::DeliveryMetrics;
use crate::store::CampaignStore;

#[derive(Debug, Clone, Copy)]
pub struct RetirementRequest {
    pub tenant_id: Uuid,
    pub subscriber_id: Uuid,
    pub reason: FailureReason,
}

/// Sending half held by the dispatcher.
#[derive(Clone)]
pub struct RetirementQueue {
    tx: mpsc::UnboundedSender<RetirementRequest>,
}

impl RetirementQueue {
    /// Best effort: a closed worker only produces a log line.
    pub fn retire(&self, request: RetirementRequest) {
        if self.tx.send(request).is_err() {
            tracing::warn!(
                subscriber_id = %request.subscriber_id,
                "Retirement worker is gone, dropping retirement request"
            );
        }
    }
}

/// Handle to the spawned worker. The lifecycle drops all queue clones and
/// then joins so retirements from a run are visible to the next one.
pub struct RetirementWorker {
    handle: JoinHandle<usize>,
}

impl RetirementWorker {
    /// Await the worker after the last [`RetirementQueue`] clone is
    /// dropped. Returns the number of retirements applied.
    pub async fn join(self) -> usize {
        match self.handle.await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Retirement worker panicked");
                0
            }
        }
    }
}

/// Spawn the retirement worker for one send run.
pub fn spawn(store: Arc<dyn CampaignStore>) -> (RetirementQueue, RetirementWorker) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RetirementRequest>();

    let handle = tokio::spawn(async move {
        let mut retired = 0;
        while let Some(request) = rx.recv().await {
            match store
                .retire_subscriber(request.tenant_id, request.subscriber_id)
                .await
            {
                Ok(()) => {
                    retired += 1;
                    DeliveryMetrics::record_retirement();
                    tracing::debug!(
                        subscriber_id = %request.subscriber_id,
                        reason = ?request.reason,
                        "Retired dead delivery endpoint"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        subscriber_id = %request.subscriber_id,
                        error = %e,
                        "Failed to retire delivery endpoint"
                    );
                }
            }
        }
        retired
    });

    (RetirementQueue { tx }, RetirementWorker { handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::subscriber::Subscriber;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_worker_retires_and_drains() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let subscriber = Subscriber {
            id: Uuid::new_v4(),
            tenant_id,
            token: "dead".to_string(),
            fingerprint: None,
            city: None,
            region: None,
            country: None,
            is_mobile: false,
            device_type: None,
            browser: None,
            language: None,
            engagement: 0.0,
            attributes: json!({}),
            is_active: true,
            subscribed_at: Utc::now(),
            unsubscribed_at: None,
            last_seen_at: None,
            deleted_at: None,
        };
        let subscriber_id = subscriber.id;
        store.insert_subscriber(subscriber);

        let (queue, worker) = spawn(store.clone());
        queue.retire(RetirementRequest {
            tenant_id,
            subscriber_id,
            reason: FailureReason::Unregistered,
        });
        drop(queue);

        assert_eq!(worker.join().await, 1);
        assert!(!store.subscriber(subscriber_id).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_unknown_subscriber_does_not_fail_the_worker() {
        let store = Arc::new(MemoryStore::new());
        let (queue, worker) = spawn(store);
        queue.retire(RetirementRequest {
            tenant_id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            reason: FailureReason::InvalidToken,
        });
        drop(queue);

        // Unknown id is a no-op retire, still counted as applied.
        assert_eq!(worker.join().await, 1);
    }
}
