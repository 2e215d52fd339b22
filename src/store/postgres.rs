//! PostgreSQL-backed store.
//!
//! Predicates are rendered into parameterized SQL with `QueryBuilder`;
//! known subscriber columns map to real columns, custom attributes to the
//! `attributes` JSONB map. Ledger rows go in as one bulk insert per batch.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::campaign::{
    Campaign, CampaignBundle, CampaignStatus, CompanyLogo, DeliveryMode, HeroImage, ImagePlatform,
    NotificationOptions, ScheduleMode,
};
use crate::config::DatabaseConfig;
use crate::error::{EngineError, Result};
use crate::segment::{
    ConditionOperator, DateUnit, Filter, LocationValue, LogicalJoin, NumericOp, Predicate,
    RuleKind, Segment, SegmentCondition, SegmentKind, TargetField,
};
use crate::subscriber::Recipient;

use super::{CampaignStore, SendRecord};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store from configuration, building the connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
            .connect(&config.url)
            .await?;

        tracing::info!(pool_size = config.pool_size, "PostgreSQL connection pool created");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_segments(&self, campaign_id: Uuid) -> Result<Vec<Segment>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.tenant_id, s.name, s.kind, s.is_active, s.subscriber_count
            FROM segments s
            JOIN campaign_segments cs ON cs.segment_id = s.id
            WHERE cs.campaign_id = $1 AND s.is_active = TRUE
            ORDER BY cs.position
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut segments = Vec::with_capacity(rows.len());
        for row in rows {
            segments.push(segment_from_row(&row)?);
        }

        if segments.is_empty() {
            return Ok(segments);
        }

        let segment_ids: Vec<Uuid> = segments.iter().map(|s| s.id).collect();
        let condition_rows = sqlx::query(
            r#"
            SELECT id, segment_id, kind, category, operator, string_value, number_value,
                   date_value, date_unit, country, region, city, join_operator
            FROM segment_conditions
            WHERE segment_id = ANY($1)
            ORDER BY segment_id, position
            "#,
        )
        .bind(&segment_ids)
        .fetch_all(&self.pool)
        .await?;

        for row in condition_rows {
            let segment_id: Uuid = row.try_get("segment_id")?;
            let condition = condition_from_row(&row)?;
            if let Some(segment) = segments.iter_mut().find(|s| s.id == segment_id) {
                segment.conditions.push(condition);
            }
        }

        Ok(segments)
    }
}

#[async_trait]
impl CampaignStore for PostgresStore {
    async fn load_campaign(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignBundle>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, title, message, category, delivery_mode, schedule_mode,
                   scheduled_at, status, impressions, clicks, revenue, enable_sound,
                   enable_vibration, adaptive_delivery, ttl_seconds, destination_url,
                   action_button_label, sent_at, created_at, deleted_at
            FROM campaigns
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(campaign_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let campaign = match row {
            Some(row) => campaign_from_row(&row)?,
            None => return Ok(None),
        };

        let segments = self.load_segments(campaign_id).await?;

        let image_rows = sqlx::query(
            "SELECT id, platform, url, is_active FROM hero_images WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hero_images = Vec::with_capacity(image_rows.len());
        for row in image_rows {
            hero_images.push(HeroImage {
                id: row.try_get("id")?,
                platform: parse_platform(row.try_get("platform")?)?,
                url: row.try_get("url")?,
                is_active: row.try_get("is_active")?,
            });
        }

        let logo = sqlx::query(
            "SELECT id, url, is_active FROM company_logos WHERE tenant_id = $1 AND is_active = TRUE LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| -> Result<CompanyLogo> {
            Ok(CompanyLogo {
                id: row.try_get("id")?,
                url: row.try_get("url")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .transpose()?;

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
        let from_states: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $1
            WHERE id = $2 AND tenant_id = $3 AND deleted_at IS NULL AND status = ANY($4)
            "#,
        )
        .bind(to.as_str())
        .bind(campaign_id)
        .bind(tenant_id)
        .bind(&from_states)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_sent(&self, tenant_id: Uuid, campaign_id: Uuid, sent_count: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'SENT', sent_at = NOW(), impressions = impressions + $1
            WHERE id = $2 AND tenant_id = $3 AND deleted_at IS NULL AND status = 'SENDING'
            "#,
        )
        .bind(sent_count)
        .bind(campaign_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'FAILED'
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL AND status = 'SENDING'
            "#,
        )
        .bind(campaign_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_recipients(
        &self,
        tenant_id: Uuid,
        predicate: &Predicate,
    ) -> Result<Vec<Recipient>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id, token FROM subscribers WHERE tenant_id = ");
        qb.push_bind(tenant_id);
        qb.push(" AND is_active = TRUE AND deleted_at IS NULL AND (");
        push_predicate(&mut qb, predicate);
        qb.push(") ORDER BY subscribed_at, id");

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut recipients = Vec::with_capacity(rows.len());
        for row in rows {
            recipients.push(Recipient {
                subscriber_id: row.try_get("id")?,
                token: row.try_get("token")?,
            });
        }

        Ok(recipients)
    }

    async fn insert_send_records(&self, records: &[SendRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO campaign_sends (id, campaign_id, subscriber_id, sent_at, delivered_at, clicked_at, error) ",
        );
        qb.push_values(records.iter(), |mut b, record| {
            b.push_bind(record.id)
                .push_bind(record.campaign_id)
                .push_bind(record.subscriber_id)
                .push_bind(record.sent_at)
                .push_bind(record.delivered_at)
                .push_bind(record.clicked_at)
                .push_bind(record.error.clone());
        });

        qb.build().execute(&self.pool).await?;

        Ok(())
    }

    async fn retire_subscriber(&self, tenant_id: Uuid, subscriber_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscribers
            SET is_active = FALSE, unsubscribed_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND is_active = TRUE
            "#,
        )
        .bind(subscriber_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Predicate rendering

fn push_predicate(qb: &mut QueryBuilder<Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::All => {
            qb.push("TRUE");
        }
        Predicate::Leaf(filter) => push_filter(qb, filter),
        Predicate::And(left, right) => {
            qb.push("(");
            push_predicate(qb, left);
            qb.push(" AND ");
            push_predicate(qb, right);
            qb.push(")");
        }
        Predicate::Or(left, right) => {
            qb.push("(");
            push_predicate(qb, left);
            qb.push(" OR ");
            push_predicate(qb, right);
            qb.push(")");
        }
    }
}

fn push_filter(qb: &mut QueryBuilder<Postgres>, filter: &Filter) {
    match filter {
        Filter::TextEquals { field, value, negated } => {
            push_text_expr(qb, field);
            // IS DISTINCT FROM keeps NULL columns matching the negated
            // form, mirroring the in-memory semantics.
            qb.push(if *negated { " IS DISTINCT FROM " } else { " = " });
            qb.push_bind(value.clone());
        }
        Filter::TextContains { field, value } => {
            push_text_expr(qb, field);
            // Contains is literal: escape LIKE metacharacters so a value
            // like "50%" does not turn into a wildcard pattern.
            qb.push(" LIKE '%' || ");
            qb.push_bind(escape_like(value));
            qb.push(" || '%' ESCAPE '\\'");
        }
        Filter::BoolEquals { field, value } => match field {
            TargetField::Attribute(key) => {
                qb.push("(lower(attributes ->> ");
                qb.push_bind(key.clone());
                qb.push(") IN ('true', 'false') AND (attributes ->> ");
                qb.push_bind(key.clone());
                qb.push(")::boolean = ");
                qb.push_bind(*value);
                qb.push(")");
            }
            _ => {
                qb.push("is_mobile = ");
                qb.push_bind(*value);
            }
        },
        Filter::NumberCompare { field, op, value } => match field {
            TargetField::Attribute(key) => {
                // Non-numeric attribute values never match, same as the
                // in-memory evaluation.
                qb.push("((attributes ->> ");
                qb.push_bind(key.clone());
                qb.push(") ~ '^-?[0-9]+(\\.[0-9]+)?$' AND (attributes ->> ");
                qb.push_bind(key.clone());
                qb.push(")::double precision ");
                qb.push(op.sql_operator());
                qb.push(" ");
                qb.push_bind(*value);
                qb.push(")");
            }
            _ => {
                qb.push("engagement ");
                qb.push(op.sql_operator());
                qb.push(" ");
                qb.push_bind(*value);
            }
        },
        Filter::Since { field, cutoff } => {
            let column = match field {
                TargetField::SubscribedAt => "subscribed_at",
                _ => "last_seen_at",
            };
            qb.push(column);
            qb.push(" >= ");
            qb.push_bind(*cutoff);
        }
    }
}

/// Backslash-escape `%`, `_`, and `\` so the value matches literally
/// inside a LIKE pattern with `ESCAPE '\'`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_text_expr(qb: &mut QueryBuilder<Postgres>, field: &TargetField) {
    match field {
        TargetField::City => {
            qb.push("city");
        }
        TargetField::Region => {
            qb.push("region");
        }
        TargetField::Country => {
            qb.push("country");
        }
        TargetField::DeviceType => {
            qb.push("device_type");
        }
        TargetField::Browser => {
            qb.push("browser");
        }
        TargetField::Language => {
            qb.push("language");
        }
        TargetField::Attribute(key) => {
            qb.push("(attributes ->> ");
            qb.push_bind(key.clone());
            qb.push(")");
        }
        // Condition evaluation never produces text filters on the
        // remaining fields.
        _ => {
            qb.push("NULL");
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping

fn campaign_from_row(row: &PgRow) -> Result<Campaign> {
    Ok(Campaign {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        category: row.try_get("category")?,
        delivery_mode: parse_delivery_mode(row.try_get("delivery_mode")?)?,
        schedule_mode: parse_schedule_mode(row.try_get("schedule_mode")?)?,
        scheduled_at: row.try_get("scheduled_at")?,
        status: parse_status(row.try_get("status")?)?,
        impressions: row.try_get("impressions")?,
        clicks: row.try_get("clicks")?,
        revenue: row.try_get("revenue")?,
        options: NotificationOptions {
            enable_sound: row.try_get("enable_sound")?,
            enable_vibration: row.try_get("enable_vibration")?,
            adaptive_delivery: row.try_get("adaptive_delivery")?,
            ttl_seconds: row.try_get("ttl_seconds")?,
        },
        destination_url: row.try_get("destination_url")?,
        action_button_label: row.try_get("action_button_label")?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn segment_from_row(row: &PgRow) -> Result<Segment> {
    Ok(Segment {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        kind: parse_segment_kind(row.try_get("kind")?)?,
        is_active: row.try_get("is_active")?,
        subscriber_count: row.try_get("subscriber_count")?,
        conditions: Vec::new(),
    })
}

fn condition_from_row(row: &PgRow) -> Result<SegmentCondition> {
    let country: Option<String> = row.try_get("country")?;
    let region: Option<String> = row.try_get("region")?;
    let city: Option<String> = row.try_get("city")?;
    let location = if country.is_some() || region.is_some() || city.is_some() {
        Some(LocationValue { country, region, city })
    } else {
        None
    };

    let date_unit: Option<String> = row.try_get("date_unit")?;

    Ok(SegmentCondition {
        id: row.try_get("id")?,
        kind: parse_rule_kind(row.try_get("kind")?)?,
        category: row.try_get("category")?,
        operator: parse_operator(row.try_get("operator")?)?,
        string_value: row.try_get("string_value")?,
        number_value: row.try_get("number_value")?,
        date_value: row.try_get("date_value")?,
        date_unit: date_unit.as_deref().map(parse_date_unit).transpose()?,
        location,
        join: parse_join(row.try_get("join_operator")?)?,
    })
}

fn parse_status(value: String) -> Result<CampaignStatus> {
    match value.as_str() {
        "DRAFT" => Ok(CampaignStatus::Draft),
        "SCHEDULED" => Ok(CampaignStatus::Scheduled),
        "SENDING" => Ok(CampaignStatus::Sending),
        "PAUSED" => Ok(CampaignStatus::Paused),
        "SENT" => Ok(CampaignStatus::Sent),
        "CANCELLED" => Ok(CampaignStatus::Cancelled),
        "FAILED" => Ok(CampaignStatus::Failed),
        other => Err(EngineError::Validation(format!("unknown campaign status \"{}\"", other))),
    }
}

fn parse_delivery_mode(value: String) -> Result<DeliveryMode> {
    match value.as_str() {
        "regular" => Ok(DeliveryMode::Regular),
        "flash_sale" => Ok(DeliveryMode::FlashSale),
        other => Err(EngineError::Validation(format!("unknown delivery mode \"{}\"", other))),
    }
}

fn parse_schedule_mode(value: String) -> Result<ScheduleMode> {
    match value.as_str() {
        "now" => Ok(ScheduleMode::Now),
        "schedule" => Ok(ScheduleMode::Schedule),
        other => Err(EngineError::Validation(format!("unknown schedule mode \"{}\"", other))),
    }
}

fn parse_segment_kind(value: String) -> Result<SegmentKind> {
    match value.as_str() {
        "DYNAMIC" => Ok(SegmentKind::Dynamic),
        "STATIC" => Ok(SegmentKind::Static),
        other => Err(EngineError::Validation(format!("unknown segment kind \"{}\"", other))),
    }
}

fn parse_rule_kind(value: String) -> Result<RuleKind> {
    match value.as_str() {
        "property" => Ok(RuleKind::Property),
        "action" => Ok(RuleKind::Action),
        other => Err(EngineError::Validation(format!("unknown rule kind \"{}\"", other))),
    }
}

fn parse_operator(value: String) -> Result<ConditionOperator> {
    match value.as_str() {
        "equals" => Ok(ConditionOperator::Equals),
        "not_equals" => Ok(ConditionOperator::NotEquals),
        "contains" => Ok(ConditionOperator::Contains),
        "greater_than" => Ok(ConditionOperator::GreaterThan),
        "less_than" => Ok(ConditionOperator::LessThan),
        "greater_or_equal" => Ok(ConditionOperator::GreaterOrEqual),
        "less_or_equal" => Ok(ConditionOperator::LessOrEqual),
        "within_last" => Ok(ConditionOperator::WithinLast),
        "in_location" => Ok(ConditionOperator::InLocation),
        other => Err(EngineError::Config(format!("unknown condition operator \"{}\"", other))),
    }
}

fn parse_date_unit(value: &str) -> Result<DateUnit> {
    match value {
        "days" => Ok(DateUnit::Days),
        "weeks" => Ok(DateUnit::Weeks),
        "months" => Ok(DateUnit::Months),
        other => Err(EngineError::Config(format!("unknown date unit \"{}\"", other))),
    }
}

fn parse_platform(value: String) -> Result<ImagePlatform> {
    match value.as_str() {
        "android" => Ok(ImagePlatform::Android),
        "ios" => Ok(ImagePlatform::Ios),
        "web" => Ok(ImagePlatform::Web),
        other => Err(EngineError::Validation(format!("unknown image platform \"{}\"", other))),
    }
}

fn parse_join(value: String) -> Result<LogicalJoin> {
    match value.as_str() {
        "AND" => Ok(LogicalJoin::And),
        "OR" => Ok(LogicalJoin::Or),
        other => Err(EngineError::Config(format!("unknown logical operator \"{}\"", other))),
    }
}
