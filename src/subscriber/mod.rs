//! Subscriber (delivery endpoint) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One registered push-delivery endpoint belonging to a tenant.
///
/// The gateway token is unique per tenant. An inactive subscriber is
/// excluded from all audience resolution; once the gateway reports the
/// token permanently invalid the subscriber is retired exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Opaque push-endpoint identifier used to address this device.
    pub token: String,
    /// De-duplication fingerprint for re-registrations of one device.
    pub fingerprint: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub is_mobile: bool,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub language: Option<String>,
    /// Denormalized behavioral score maintained by the event pipeline.
    pub engagement: f64,
    /// Free-form custom attributes set by the embedding application.
    pub attributes: serde_json::Value,
    pub is_active: bool,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subscriber {
    pub fn recipient(&self) -> Recipient {
        Recipient {
            subscriber_id: self.id,
            token: self.token.clone(),
        }
    }
}

/// The two fields a send run needs per audience member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub subscriber_id: Uuid,
    pub token: String,
}
