//! Audience resolution: from attached segments to a deduplicated
//! recipient list.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::error::Result;
use crate::segment::{build_predicate, Segment, SegmentKind};
use crate::store::CampaignStore;
use crate::subscriber::Recipient;

/// Resolve the unique audience across a campaign's attached segments.
///
/// Each dynamic segment is recompiled and executed live; a subscriber
/// matching several segments is kept once (the values are identical per
/// subscriber, so last write wins). Zero attached segments means zero
/// recipients, never "all subscribers". The evaluation instant is
/// captured once so every date cutoff in the run agrees.
pub async fn resolve_audience(
    store: &dyn CampaignStore,
    tenant_id: Uuid,
    segments: &[Segment],
) -> Result<Vec<Recipient>> {
    let resolved_at = Utc::now();
    let mut unique: HashMap<Uuid, Recipient> = HashMap::new();

    for segment in segments {
        if segment.kind != SegmentKind::Dynamic {
            tracing::debug!(
                segment_id = %segment.id,
                "Skipping non-dynamic segment during audience resolution"
            );
            continue;
        }

        let predicate = build_predicate(&segment.conditions, resolved_at)?;
        let recipients = store.find_recipients(tenant_id, &predicate).await?;

        tracing::debug!(
            segment_id = %segment.id,
            matched = recipients.len(),
            "Resolved segment audience"
        );

        for recipient in recipients {
            unique.insert(recipient.subscriber_id, recipient);
        }
    }

    // Stable order so batch boundaries are reproducible.
    let mut audience: Vec<Recipient> = unique.into_values().collect();
    audience.sort_by_key(|r| r.subscriber_id);

    Ok(audience)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{ConditionOperator, LogicalJoin, SegmentCondition};
    use crate::store::MemoryStore;
    use crate::subscriber::Subscriber;
    use chrono::Duration;
    use serde_json::json;

    fn subscriber(tenant_id: Uuid, city: &str, is_mobile: bool, engagement: f64) -> Subscriber {
        Subscriber {
            id: Uuid::new_v4(),
            tenant_id,
            token: format!("tok-{}", Uuid::new_v4()),
            fingerprint: None,
            city: Some(city.to_string()),
            region: None,
            country: Some("PK".to_string()),
            is_mobile,
            device_type: None,
            browser: None,
            language: None,
            engagement,
            attributes: json!({}),
            is_active: true,
            subscribed_at: Utc::now() - Duration::days(10),
            unsubscribed_at: None,
            last_seen_at: None,
            deleted_at: None,
        }
    }

    fn segment(tenant_id: Uuid, conditions: Vec<SegmentCondition>) -> Segment {
        Segment {
            id: Uuid::new_v4(),
            tenant_id,
            name: "s".to_string(),
            kind: SegmentKind::Dynamic,
            is_active: true,
            subscriber_count: 0,
            conditions,
        }
    }

    #[tokio::test]
    async fn test_overlapping_segments_dedup_by_subscriber() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();

        // Mobile user in Karachi with high engagement matches both
        // segments below.
        let overlap = subscriber(tenant_id, "Karachi", true, 9.0);
        let overlap_id = overlap.id;
        store.insert_subscriber(overlap);
        store.insert_subscriber(subscriber(tenant_id, "Karachi", false, 1.0));
        store.insert_subscriber(subscriber(tenant_id, "Lahore", true, 8.0));

        let karachi = segment(
            tenant_id,
            vec![SegmentCondition::property("city", ConditionOperator::Equals, "Karachi")],
        );
        let engaged_mobile = segment(
            tenant_id,
            vec![
                SegmentCondition::property("is_mobile", ConditionOperator::Equals, "true")
                    .with_join(LogicalJoin::And),
                SegmentCondition::action("engagement", ConditionOperator::GreaterThan, 5.0),
            ],
        );

        let audience = resolve_audience(&store, tenant_id, &[karachi, engaged_mobile])
            .await
            .unwrap();

        // 2 Karachi subscribers + 1 new from the second segment; the
        // overlapping subscriber appears exactly once.
        assert_eq!(audience.len(), 3);
        assert_eq!(
            audience.iter().filter(|r| r.subscriber_id == overlap_id).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_zero_segments_means_zero_recipients() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        store.insert_subscriber(subscriber(tenant_id, "Karachi", true, 1.0));

        let audience = resolve_audience(&store, tenant_id, &[]).await.unwrap();
        assert!(audience.is_empty());
    }

    #[tokio::test]
    async fn test_broken_condition_fails_the_resolution() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();

        let mut broken =
            SegmentCondition::action("engagement", ConditionOperator::GreaterThan, 0.0);
        broken.number_value = None;

        let result =
            resolve_audience(&store, tenant_id, &[segment(tenant_id, vec![broken])]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_static_segments_are_skipped() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        store.insert_subscriber(subscriber(tenant_id, "Karachi", true, 1.0));

        let mut static_segment = segment(tenant_id, vec![]);
        static_segment.kind = SegmentKind::Static;

        let audience = resolve_audience(&store, tenant_id, &[static_segment]).await.unwrap();
        assert!(audience.is_empty());
    }

    #[tokio::test]
    async fn test_empty_condition_list_matches_full_tenant_population() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        store.insert_subscriber(subscriber(tenant_id, "Karachi", true, 1.0));
        store.insert_subscriber(subscriber(tenant_id, "Lahore", false, 2.0));

        let audience = resolve_audience(&store, tenant_id, &[segment(tenant_id, vec![])])
            .await
            .unwrap();
        assert_eq!(audience.len(), 2);
    }
}
