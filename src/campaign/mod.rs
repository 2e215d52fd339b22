//! Campaign domain model: content, delivery configuration, and the
//! lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::segment::Segment;

/// Lifecycle states of a campaign.
///
/// `Draft → Scheduled → Sending → Sent` is the happy path. `Sending →
/// Failed` covers unrecoverable mid-run errors, `Cancelled` is a
/// user-driven terminal soft delete, and `Paused` is a user-driven side
/// branch the engine never re-enters on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Sent,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// States a send run may start from without an explicit resend request.
    pub fn is_sendable(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Draft
                | CampaignStatus::Scheduled
                | CampaignStatus::Paused
                | CampaignStatus::Failed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Scheduled => "SCHEDULED",
            CampaignStatus::Sending => "SENDING",
            CampaignStatus::Paused => "PAUSED",
            CampaignStatus::Sent => "SENT",
            CampaignStatus::Cancelled => "CANCELLED",
            CampaignStatus::Failed => "FAILED",
        }
    }
}

/// Delivery mode, mapped to gateway urgency at payload-build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Regular,
    FlashSale,
}

/// Whether the campaign goes out immediately or at a scheduled time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Now,
    Schedule,
}

/// Notification presentation flags carried into the gateway payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub enable_sound: bool,
    pub enable_vibration: bool,
    /// Gateway-side adaptive delivery hint.
    pub adaptive_delivery: bool,
    /// Time-to-live in seconds, kept as a string because the gateway's
    /// webpush TTL header is string-typed.
    pub ttl_seconds: String,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            enable_sound: true,
            enable_vibration: false,
            adaptive_delivery: false,
            ttl_seconds: "86400".to_string(),
        }
    }
}

/// Target platform of a hero image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePlatform {
    Android,
    Ios,
    Web,
}

impl ImagePlatform {
    /// Fallback order when no platform-exact image exists. Web is the
    /// generic catch-all, so it closes every chain.
    pub fn fallback_chain(&self) -> &'static [ImagePlatform] {
        match self {
            ImagePlatform::Android => &[ImagePlatform::Android, ImagePlatform::Ios, ImagePlatform::Web],
            ImagePlatform::Ios => &[ImagePlatform::Ios, ImagePlatform::Android, ImagePlatform::Web],
            ImagePlatform::Web => &[ImagePlatform::Web, ImagePlatform::Android, ImagePlatform::Ios],
        }
    }
}

/// Campaign hero image keyed by target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroImage {
    pub id: Uuid,
    pub platform: ImagePlatform,
    pub url: String,
    pub is_active: bool,
}

/// Tenant logo shown as the notification icon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyLogo {
    pub id: Uuid,
    pub url: String,
    pub is_active: bool,
}

/// A unit of outbound messaging content plus delivery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub message: String,
    pub category: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub schedule_mode: ScheduleMode,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
    /// Successfully sent count, only ever increased by a send run.
    pub impressions: i64,
    pub clicks: i64,
    pub revenue: f64,
    pub options: NotificationOptions,
    pub destination_url: Option<String>,
    pub action_button_label: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Click-through rate over recorded impressions.
    pub fn click_through_rate(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A campaign loaded with everything a send run needs: attached segments
/// (with conditions), hero images, and the active logo.
#[derive(Debug, Clone)]
pub struct CampaignBundle {
    pub campaign: Campaign,
    pub segments: Vec<Segment>,
    pub hero_images: Vec<HeroImage>,
    pub logo: Option<CompanyLogo>,
}
