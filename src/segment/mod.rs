//! Segments and their rule conditions.
//!
//! A segment is a named, reusable audience definition. Dynamic segments
//! carry an ordered condition list that is recompiled into a storage
//! predicate on every send run; the cached subscriber count is a display
//! estimate, never authoritative.

pub mod predicate;
pub mod query;

pub use predicate::{Filter, NumericOp, Predicate, TargetField};
pub use query::{build_predicate, condition_filter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentKind {
    Dynamic,
    Static,
}

/// How a condition's result combines with the *next* condition in the
/// ordered list. The last condition's join is never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalJoin {
    #[default]
    And,
    Or,
}

/// Whether a condition tests a stored profile attribute or a behavioral
/// signal maintained by the event pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Property,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    /// "within the last N days/weeks/months", evaluated against a cutoff
    /// computed once per resolution run.
    WithinLast,
    InLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateUnit {
    Days,
    Weeks,
    Months,
}

impl DateUnit {
    pub fn to_duration(&self, amount: i64) -> chrono::Duration {
        match self {
            DateUnit::Days => chrono::Duration::days(amount),
            DateUnit::Weeks => chrono::Duration::weeks(amount),
            DateUnit::Months => chrono::Duration::days(amount * 30),
        }
    }
}

/// Structured location value allowing partial specification: country only,
/// country + region, or the full triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LocationValue {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl LocationValue {
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.region.is_none() && self.city.is_none()
    }
}

/// One rule within a segment. Conditions are evaluated left to right;
/// `join` on condition `i` governs how `i` combines with `i + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCondition {
    pub id: Uuid,
    pub kind: RuleKind,
    /// Attribute or event name, e.g. "city", "is_mobile", "engagement".
    pub category: String,
    pub operator: ConditionOperator,
    pub string_value: Option<String>,
    pub number_value: Option<f64>,
    pub date_value: Option<i64>,
    pub date_unit: Option<DateUnit>,
    pub location: Option<LocationValue>,
    pub join: LogicalJoin,
}

impl SegmentCondition {
    /// Property condition with only a string slot, the most common shape.
    pub fn property(category: impl Into<String>, operator: ConditionOperator, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: RuleKind::Property,
            category: category.into(),
            operator,
            string_value: Some(value.into()),
            number_value: None,
            date_value: None,
            date_unit: None,
            location: None,
            join: LogicalJoin::And,
        }
    }

    /// Behavioral condition comparing a numeric signal.
    pub fn action(category: impl Into<String>, operator: ConditionOperator, value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: RuleKind::Action,
            category: category.into(),
            operator,
            string_value: None,
            number_value: Some(value),
            date_value: None,
            date_unit: None,
            location: None,
            join: LogicalJoin::And,
        }
    }

    pub fn with_join(mut self, join: LogicalJoin) -> Self {
        self.join = join;
        self
    }
}

/// A named, reusable audience definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub kind: SegmentKind,
    pub is_active: bool,
    /// Periodically recomputed estimate; the audience at send time is
    /// always re-resolved from the conditions.
    pub subscriber_count: i64,
    pub conditions: Vec<SegmentCondition>,
}
