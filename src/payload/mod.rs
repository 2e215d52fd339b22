//! Delivery payload construction.
//!
//! One [`MessageTemplate`] is built per campaign run and shared by every
//! recipient; only the token and the per-recipient identifiers differ
//! between the messages of one run. Building the template twice over an
//! unchanged campaign yields an identical value.

use std::collections::BTreeMap;

use crate::campaign::{Campaign, CampaignBundle, DeliveryMode, HeroImage, ImagePlatform};
use crate::gateway::{
    GatewayMessage, NotificationAction, NotificationContent, RecipientIds, Urgency, WebPushOptions,
};
use crate::subscriber::Recipient;

/// Vibration pattern used when the campaign enables vibration.
const VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];

/// Canonical message shape for one campaign run, missing only the token
/// and the per-recipient identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub notification: NotificationContent,
    pub data: BTreeMap<String, String>,
    pub webpush: WebPushOptions,
}

impl MessageTemplate {
    /// Merge the per-recipient fields into the shared template.
    pub fn personalize(&self, recipient: &Recipient, ids: RecipientIds) -> GatewayMessage {
        let mut data = self.data.clone();
        data.insert("subscriber_id".to_string(), ids.subscriber_id.to_string());
        data.insert("notification_id".to_string(), ids.notification_id.to_string());

        GatewayMessage {
            token: recipient.token.clone(),
            notification: self.notification.clone(),
            data,
            webpush: self.webpush.clone(),
        }
    }
}

/// Pick the hero image for the given platform: platform-exact first, then
/// the nearest-platform fallback chain, else none. Inactive images are
/// never considered.
pub fn resolve_hero_image(images: &[HeroImage], platform: ImagePlatform) -> Option<&HeroImage> {
    platform
        .fallback_chain()
        .iter()
        .find_map(|candidate| images.iter().find(|img| img.is_active && img.platform == *candidate))
}

/// Build the canonical message template for one campaign run.
///
/// Every value written into the data section is stringified: the gateway's
/// metadata channel is string-only even for booleans and numbers.
pub fn build_template(bundle: &CampaignBundle) -> MessageTemplate {
    let campaign = &bundle.campaign;

    let hero = resolve_hero_image(&bundle.hero_images, ImagePlatform::Web);

    let notification = NotificationContent {
        title: campaign.title.clone(),
        body: campaign.message.clone(),
        image: hero.map(|img| img.url.clone()),
    };

    let mut data = BTreeMap::new();
    data.insert("campaign_id".to_string(), campaign.id.to_string());
    data.insert("delivery_mode".to_string(), delivery_mode_str(campaign.delivery_mode).to_string());
    data.insert(
        "adaptive_delivery".to_string(),
        campaign.options.adaptive_delivery.to_string(),
    );
    if let Some(category) = &campaign.category {
        data.insert("category".to_string(), category.clone());
    }
    if let Some(url) = &campaign.destination_url {
        data.insert("destination_url".to_string(), url.clone());
    }

    let webpush = WebPushOptions {
        urgency: urgency_for(campaign),
        ttl: campaign.options.ttl_seconds.clone(),
        // Sound off means the platform shows the notification silently.
        silent: !campaign.options.enable_sound,
        vibrate: campaign
            .options
            .enable_vibration
            .then(|| VIBRATE_PATTERN.to_vec()),
        icon: bundle
            .logo
            .as_ref()
            .filter(|logo| logo.is_active)
            .map(|logo| logo.url.clone()),
        actions: action_buttons(campaign),
    };

    MessageTemplate {
        notification,
        data,
        webpush,
    }
}

fn urgency_for(campaign: &Campaign) -> Urgency {
    match campaign.delivery_mode {
        DeliveryMode::FlashSale => Urgency::High,
        DeliveryMode::Regular => Urgency::Normal,
    }
}

fn delivery_mode_str(mode: DeliveryMode) -> &'static str {
    match mode {
        DeliveryMode::Regular => "regular",
        DeliveryMode::FlashSale => "flash_sale",
    }
}

/// Action buttons exist only when the campaign carries a button label.
fn action_buttons(campaign: &Campaign) -> Vec<NotificationAction> {
    match &campaign.action_button_label {
        Some(label) => vec![NotificationAction {
            action: "open".to_string(),
            title: label.clone(),
            url: campaign.destination_url.clone(),
        }],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{CampaignStatus, CompanyLogo, NotificationOptions, ScheduleMode};
    use chrono::Utc;
    use uuid::Uuid;

    fn bundle() -> CampaignBundle {
        let campaign = Campaign {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            title: "Flash sale".to_string(),
            message: "4 hours only".to_string(),
            category: Some("promo".to_string()),
            delivery_mode: DeliveryMode::FlashSale,
            schedule_mode: ScheduleMode::Now,
            scheduled_at: None,
            status: CampaignStatus::Draft,
            impressions: 0,
            clicks: 0,
            revenue: 0.0,
            options: NotificationOptions {
                enable_sound: false,
                enable_vibration: true,
                adaptive_delivery: true,
                ttl_seconds: "3600".to_string(),
            },
            destination_url: Some("https://shop.example.com/flash".to_string()),
            action_button_label: Some("Shop now".to_string()),
            sent_at: None,
            created_at: Utc::now(),
            deleted_at: None,
        };

        CampaignBundle {
            campaign,
            segments: vec![],
            hero_images: vec![
                HeroImage {
                    id: Uuid::new_v4(),
                    platform: ImagePlatform::Android,
                    url: "https://cdn.example.com/hero-android.png".to_string(),
                    is_active: true,
                },
                HeroImage {
                    id: Uuid::new_v4(),
                    platform: ImagePlatform::Web,
                    url: "https://cdn.example.com/hero-web.png".to_string(),
                    is_active: true,
                },
            ],
            logo: Some(CompanyLogo {
                id: Uuid::new_v4(),
                url: "https://cdn.example.com/logo.png".to_string(),
                is_active: true,
            }),
        }
    }

    #[test]
    fn test_template_is_deterministic() {
        let bundle = bundle();
        let first = build_template(&bundle);
        let second = build_template(&bundle);
        assert_eq!(first, second);
    }

    #[test]
    fn test_flash_sale_maps_to_high_urgency() {
        let mut bundle = bundle();
        assert_eq!(build_template(&bundle).webpush.urgency, Urgency::High);

        bundle.campaign.delivery_mode = DeliveryMode::Regular;
        assert_eq!(build_template(&bundle).webpush.urgency, Urgency::Normal);
    }

    #[test]
    fn test_flags_map_to_silent_and_vibrate() {
        let template = build_template(&bundle());
        assert!(template.webpush.silent);
        assert_eq!(template.webpush.vibrate, Some(VIBRATE_PATTERN.to_vec()));
    }

    #[test]
    fn test_data_section_is_stringified() {
        let template = build_template(&bundle());
        assert_eq!(template.data.get("adaptive_delivery").map(String::as_str), Some("true"));
        assert_eq!(template.data.get("delivery_mode").map(String::as_str), Some("flash_sale"));
    }

    #[test]
    fn test_action_button_only_with_label() {
        let mut bundle = bundle();
        let template = build_template(&bundle);
        assert_eq!(template.webpush.actions.len(), 1);
        assert_eq!(template.webpush.actions[0].title, "Shop now");

        bundle.campaign.action_button_label = None;
        let template = build_template(&bundle);
        assert!(template.webpush.actions.is_empty());
    }

    #[test]
    fn test_hero_image_fallback_chain() {
        let bundle = bundle();

        // Web-exact image wins for web.
        let img = resolve_hero_image(&bundle.hero_images, ImagePlatform::Web).unwrap();
        assert!(img.url.contains("hero-web"));

        // Ios has no exact image; nearest platform (android) wins.
        let img = resolve_hero_image(&bundle.hero_images, ImagePlatform::Ios).unwrap();
        assert!(img.url.contains("hero-android"));

        // Inactive images are skipped entirely.
        let inactive: Vec<HeroImage> = bundle
            .hero_images
            .iter()
            .cloned()
            .map(|mut img| {
                img.is_active = false;
                img
            })
            .collect();
        assert!(resolve_hero_image(&inactive, ImagePlatform::Web).is_none());
    }

    #[test]
    fn test_personalize_merges_recipient_fields() {
        let template = build_template(&bundle());
        let recipient = Recipient {
            subscriber_id: Uuid::new_v4(),
            token: "device-token-1".to_string(),
        };
        let ids = RecipientIds {
            subscriber_id: recipient.subscriber_id,
            notification_id: Uuid::new_v4(),
        };

        let message = template.personalize(&recipient, ids);
        assert_eq!(message.token, "device-token-1");
        assert_eq!(
            message.data.get("subscriber_id").map(String::as_str),
            Some(recipient.subscriber_id.to_string().as_str())
        );
        assert!(message.data.contains_key("notification_id"));
        // The shared template itself is untouched.
        assert!(!template.data.contains_key("subscriber_id"));
    }
}
