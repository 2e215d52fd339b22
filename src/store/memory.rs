//! In-memory store, the persistence twin of [`super::PostgresStore`].
//!
//! Backs the integration suite and dry-run tooling: predicates are
//! evaluated directly via [`Predicate::matches`], so both stores share one
//! set of audience semantics.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignBundle, CampaignStatus, CompanyLogo, HeroImage};
use crate::error::Result;
use crate::segment::{Predicate, Segment};
use crate::subscriber::{Recipient, Subscriber};

use super::{CampaignStore, SendRecord};

#[derive(Default)]
pub struct MemoryStore {
    campaigns: DashMap<Uuid, Campaign>,
    segments: DashMap<Uuid, Segment>,
    /// Segment ids attached to a campaign, in attachment order.
    campaign_segments: DashMap<Uuid, Vec<Uuid>>,
    subscribers: DashMap<Uuid, Subscriber>,
    hero_images: DashMap<Uuid, Vec<HeroImage>>,
    logos: DashMap<Uuid, CompanyLogo>,
    sends: Mutex<Vec<SendRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id, campaign);
    }

    /// Attach a segment to a campaign, registering the segment as needed.
    pub fn attach_segment(&self, campaign_id: Uuid, segment: Segment) {
        self.campaign_segments
            .entry(campaign_id)
            .or_default()
            .push(segment.id);
        self.segments.insert(segment.id, segment);
    }

    pub fn insert_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.insert(subscriber.id, subscriber);
    }

    pub fn add_hero_image(&self, campaign_id: Uuid, image: HeroImage) {
        self.hero_images.entry(campaign_id).or_default().push(image);
    }

    pub fn set_logo(&self, tenant_id: Uuid, logo: CompanyLogo) {
        self.logos.insert(tenant_id, logo);
    }

    pub fn campaign(&self, campaign_id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&campaign_id).map(|c| c.clone())
    }

    pub fn subscriber(&self, subscriber_id: Uuid) -> Option<Subscriber> {
        self.subscribers.get(&subscriber_id).map(|s| s.clone())
    }

    /// Ledger rows written for one campaign, in write order.
    pub fn send_records(&self, campaign_id: Uuid) -> Vec<SendRecord> {
        self.sends
            .lock()
            .expect("send ledger lock poisoned")
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn load_campaign(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignBundle>> {
        let campaign = match self.campaigns.get(&campaign_id) {
            Some(c) if c.tenant_id == tenant_id && c.deleted_at.is_none() => c.clone(),
            _ => return Ok(None),
        };

        let segment_ids = self
            .campaign_segments
            .get(&campaign_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let segments: Vec<Segment> = segment_ids
            .iter()
            .filter_map(|id| self.segments.get(id).map(|s| s.clone()))
            .filter(|s| s.is_active)
            .collect();

        let hero_images = self
            .hero_images
            .get(&campaign_id)
            .map(|imgs| imgs.clone())
            .unwrap_or_default();
        let logo = self
            .logos
            .get(&tenant_id)
            .filter(|l| l.is_active)
            .map(|l| l.clone());

        Ok(Some(CampaignBundle {
            campaign,
            segments,
            hero_images,
            logo,
        }))
    }

    async fn try_transition(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool> {
        match self.campaigns.get_mut(&campaign_id) {
            Some(mut campaign)
                if campaign.tenant_id == tenant_id
                    && campaign.deleted_at.is_none()
                    && from.contains(&campaign.status) =>
            {
                campaign.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_sent(&self, tenant_id: Uuid, campaign_id: Uuid, sent_count: i64) -> Result<()> {
        if let Some(mut campaign) = self.campaigns.get_mut(&campaign_id) {
            if campaign.tenant_id == tenant_id
                && campaign.deleted_at.is_none()
                && campaign.status == CampaignStatus::Sending
            {
                campaign.status = CampaignStatus::Sent;
                campaign.sent_at = Some(Utc::now());
                campaign.impressions += sent_count;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<()> {
        if let Some(mut campaign) = self.campaigns.get_mut(&campaign_id) {
            if campaign.tenant_id == tenant_id
                && campaign.deleted_at.is_none()
                && campaign.status == CampaignStatus::Sending
            {
                campaign.status = CampaignStatus::Failed;
            }
        }
        Ok(())
    }

    async fn find_recipients(
        &self,
        tenant_id: Uuid,
        predicate: &Predicate,
    ) -> Result<Vec<Recipient>> {
        let mut matched: Vec<Subscriber> = self
            .subscribers
            .iter()
            .filter(|s| {
                s.tenant_id == tenant_id
                    && s.is_active
                    && s.deleted_at.is_none()
                    && predicate.matches(s)
            })
            .map(|s| s.clone())
            .collect();

        // Same ordering the SQL store uses, for stable batching.
        matched.sort_by(|a, b| (a.subscribed_at, a.id).cmp(&(b.subscribed_at, b.id)));

        Ok(matched.iter().map(Subscriber::recipient).collect())
    }

    async fn insert_send_records(&self, records: &[SendRecord]) -> Result<()> {
        self.sends
            .lock()
            .expect("send ledger lock poisoned")
            .extend_from_slice(records);
        Ok(())
    }

    async fn retire_subscriber(&self, tenant_id: Uuid, subscriber_id: Uuid) -> Result<()> {
        if let Some(mut subscriber) = self.subscribers.get_mut(&subscriber_id) {
            if subscriber.tenant_id == tenant_id && subscriber.is_active {
                subscriber.is_active = false;
                subscriber.unsubscribed_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{DeliveryMode, NotificationOptions, ScheduleMode};
    use serde_json::json;

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

    fn subscriber(tenant_id: Uuid) -> Subscriber {
        Subscriber {
            id: Uuid::new_v4(),
            tenant_id,
            token: "tok".to_string(),
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
        }
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let c = campaign(tenant_id, CampaignStatus::Draft);
        let id = c.id;
        store.insert_campaign(c);

        let won = store
            .try_transition(tenant_id, id, &[CampaignStatus::Draft], CampaignStatus::Sending)
            .await
            .unwrap();
        assert!(won);

        // Second attempt from the same from-set loses: the row is SENDING.
        let won = store
            .try_transition(tenant_id, id, &[CampaignStatus::Draft], CampaignStatus::Sending)
            .await
            .unwrap();
        assert!(!won);
    }

    #[tokio::test]
    async fn test_retirement_is_exactly_once() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let s = subscriber(tenant_id);
        let id = s.id;
        store.insert_subscriber(s);

        store.retire_subscriber(tenant_id, id).await.unwrap();
        let retired = store.subscriber(id).unwrap();
        assert!(!retired.is_active);
        let first_stamp = retired.unsubscribed_at.unwrap();

        // A second report of the same dead token leaves the stamp alone.
        store.retire_subscriber(tenant_id, id).await.unwrap();
        assert_eq!(store.subscriber(id).unwrap().unsubscribed_at, Some(first_stamp));
    }

    #[tokio::test]
    async fn test_inactive_subscribers_are_invisible() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let s = subscriber(tenant_id);
        let id = s.id;
        store.insert_subscriber(s);

        let found = store.find_recipients(tenant_id, &Predicate::All).await.unwrap();
        assert_eq!(found.len(), 1);

        store.retire_subscriber(tenant_id, id).await.unwrap();
        let found = store.find_recipients(tenant_id, &Predicate::All).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let store = MemoryStore::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        store.insert_subscriber(subscriber(tenant_a));

        let found = store.find_recipients(tenant_b, &Predicate::All).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_mark_sent_accumulates_impressions() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let c = campaign(tenant_id, CampaignStatus::Sending);
        let id = c.id;
        store.insert_campaign(c);

        store.mark_sent(tenant_id, id, 40).await.unwrap();

        // A resend wins the transition back to SENDING before finalizing.
        store
            .try_transition(tenant_id, id, &[CampaignStatus::Sent], CampaignStatus::Sending)
            .await
            .unwrap();
        store.mark_sent(tenant_id, id, 2).await.unwrap();

        let c = store.campaign(id).unwrap();
        assert_eq!(c.status, CampaignStatus::Sent);
        assert_eq!(c.impressions, 42);
        assert!(c.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_finalization_requires_a_live_sending_row() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();

        // Cancelled is terminal; finalization must not overwrite it.
        let c = campaign(tenant_id, CampaignStatus::Cancelled);
        let cancelled_id = c.id;
        store.insert_campaign(c);

        store.mark_sent(tenant_id, cancelled_id, 5).await.unwrap();
        let c = store.campaign(cancelled_id).unwrap();
        assert_eq!(c.status, CampaignStatus::Cancelled);
        assert_eq!(c.impressions, 0);

        store.mark_failed(tenant_id, cancelled_id).await.unwrap();
        assert_eq!(store.campaign(cancelled_id).unwrap().status, CampaignStatus::Cancelled);

        // A row soft-deleted mid-run is likewise left alone.
        let mut c = campaign(tenant_id, CampaignStatus::Sending);
        c.deleted_at = Some(Utc::now());
        let deleted_id = c.id;
        store.insert_campaign(c);

        store.mark_sent(tenant_id, deleted_id, 5).await.unwrap();
        let c = store.campaign(deleted_id).unwrap();
        assert_eq!(c.status, CampaignStatus::Sending);
        assert_eq!(c.impressions, 0);
        assert!(c.sent_at.is_none());
    }
}
