//! Push delivery gateway contract.
//!
//! The engine talks to the gateway through one narrow operation: a batch
//! "multicast" call of token-addressed messages returning one outcome per
//! message, in order. Implementations wrap the real provider SDK; the
//! in-repo test suites script outcomes directly against the trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A batch call failing wholesale (network, auth, provider outage).
/// Per-recipient rejections are reported inside [`BatchResponse`] instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Gateway rejected the batch: {0}")]
    Rejected(String),
}

/// Why the gateway refused one recipient's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Token is malformed or revoked. The endpoint will never work again.
    InvalidToken,
    /// Device uninstalled or re-registered. The endpoint will never work
    /// again.
    Unregistered,
    /// Transient provider-side throttling.
    RateLimited,
    /// Anything else the provider reports.
    Internal,
}

impl FailureReason {
    /// Permanent failures retire the subscriber's endpoint.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FailureReason::InvalidToken | FailureReason::Unregistered)
    }
}

/// Outcome for one message within a batch, positionally aligned with the
/// submitted messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Accepted {
        /// Provider-assigned message id.
        message_id: String,
    },
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl MessageOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MessageOutcome::Accepted { .. })
    }
}

/// Result of one multicast call.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    /// One outcome per submitted message, same order.
    pub outcomes: Vec<MessageOutcome>,
}

/// Gateway delivery priority hint. Flash-sale campaigns are elevated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Normal,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

/// Notification title/body/image shown by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Action button attached to the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Webpush presentation section of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPushOptions {
    pub urgency: Urgency,
    /// TTL in seconds; the provider header is string-typed.
    pub ttl: String,
    pub silent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrate: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub actions: Vec<NotificationAction>,
}

/// One fully-addressed message ready for a multicast call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Delivery token addressing one subscriber endpoint.
    pub token: String,
    pub notification: NotificationContent,
    /// Provider metadata channel. String-only, even for booleans and
    /// numbers.
    pub data: BTreeMap<String, String>,
    pub webpush: WebPushOptions,
}

/// Per-recipient identifiers merged into the shared template at dispatch
/// time.
#[derive(Debug, Clone, Copy)]
pub struct RecipientIds {
    pub subscriber_id: Uuid,
    /// Freshly generated per delivery attempt.
    pub notification_id: Uuid,
}

/// Batch multicast push gateway.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Provider-imposed per-call message cap.
    fn max_batch_size(&self) -> usize {
        500
    }

    /// Submit one batch. `Err` means the whole call failed; individual
    /// rejections come back as [`MessageOutcome::Failed`] entries.
    async fn send_batch(&self, messages: Vec<GatewayMessage>) -> Result<BatchResponse, GatewayError>;
}
