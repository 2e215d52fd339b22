//! Storage-layer predicate AST.
//!
//! Condition evaluation compiles each segment rule into a [`Filter`] leaf;
//! the query builder folds leaves into a [`Predicate`] tree. The tree has
//! two interpreters: the Postgres store renders it to SQL, and
//! [`Predicate::matches`] evaluates it directly against a subscriber (used
//! by the in-memory store and as the reference semantics).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LogicalJoin;
use crate::subscriber::Subscriber;

/// The subscriber field a filter tests. Known columns are first-class;
/// everything else lands in the custom-attributes map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetField {
    City,
    Region,
    Country,
    DeviceType,
    Browser,
    Language,
    IsMobile,
    Engagement,
    LastSeenAt,
    SubscribedAt,
    Attribute(String),
}

impl TargetField {
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            TargetField::City
                | TargetField::Region
                | TargetField::Country
                | TargetField::DeviceType
                | TargetField::Browser
                | TargetField::Language
        )
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, TargetField::LastSeenAt | TargetField::SubscribedAt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericOp {
    Gt,
    Lt,
    Ge,
    Le,
}

impl NumericOp {
    pub fn compare(&self, left: f64, right: f64) -> bool {
        match self {
            NumericOp::Gt => left > right,
            NumericOp::Lt => left < right,
            NumericOp::Ge => left >= right,
            NumericOp::Le => left <= right,
        }
    }

    pub fn sql_operator(&self) -> &'static str {
        match self {
            NumericOp::Gt => ">",
            NumericOp::Lt => "<",
            NumericOp::Ge => ">=",
            NumericOp::Le => "<=",
        }
    }
}

/// One attribute test, the leaf of the predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    TextEquals {
        field: TargetField,
        value: String,
        negated: bool,
    },
    TextContains {
        field: TargetField,
        value: String,
    },
    BoolEquals {
        field: TargetField,
        value: bool,
    },
    NumberCompare {
        field: TargetField,
        op: NumericOp,
        value: f64,
    },
    /// Timestamp field is at or after the cutoff ("within the last N ...").
    Since {
        field: TargetField,
        cutoff: DateTime<Utc>,
    },
}

/// Combined audience predicate for one segment, always additionally scoped
/// by the store to the owning tenant, `is_active`, and soft-delete state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches the full tenant population (empty condition list policy).
    All,
    Leaf(Filter),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn leaf(filter: Filter) -> Self {
        Predicate::Leaf(filter)
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn combine(self, join: LogicalJoin, other: Predicate) -> Self {
        match join {
            LogicalJoin::And => self.and(other),
            LogicalJoin::Or => self.or(other),
        }
    }

    /// Reference evaluation against one subscriber.
    pub fn matches(&self, subscriber: &Subscriber) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Leaf(filter) => filter.matches(subscriber),
            Predicate::And(left, right) => left.matches(subscriber) && right.matches(subscriber),
            Predicate::Or(left, right) => left.matches(subscriber) || right.matches(subscriber),
        }
    }
}

impl Filter {
    pub fn matches(&self, subscriber: &Subscriber) -> bool {
        match self {
            Filter::TextEquals { field, value, negated } => {
                let matched = text_value(field, subscriber)
                    .map(|actual| actual == *value)
                    .unwrap_or(false);
                if *negated {
                    !matched
                } else {
                    matched
                }
            }
            Filter::TextContains { field, value } => text_value(field, subscriber)
                .map(|actual| actual.contains(value.as_str()))
                .unwrap_or(false),
            Filter::BoolEquals { field, value } => bool_value(field, subscriber)
                .map(|actual| actual == *value)
                .unwrap_or(false),
            Filter::NumberCompare { field, op, value } => number_value(field, subscriber)
                .map(|actual| op.compare(actual, *value))
                .unwrap_or(false),
            Filter::Since { field, cutoff } => timestamp_value(field, subscriber)
                .map(|actual| actual >= *cutoff)
                .unwrap_or(false),
        }
    }
}

fn text_value(field: &TargetField, subscriber: &Subscriber) -> Option<String> {
    match field {
        TargetField::City => subscriber.city.clone(),
        TargetField::Region => subscriber.region.clone(),
        TargetField::Country => subscriber.country.clone(),
        TargetField::DeviceType => subscriber.device_type.clone(),
        TargetField::Browser => subscriber.browser.clone(),
        TargetField::Language => subscriber.language.clone(),
        TargetField::Attribute(key) => match subscriber.attributes.get(key) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn bool_value(field: &TargetField, subscriber: &Subscriber) -> Option<bool> {
    match field {
        TargetField::IsMobile => Some(subscriber.is_mobile),
        TargetField::Attribute(key) => match subscriber.attributes.get(key) {
            Some(serde_json::Value::Bool(b)) => Some(*b),
            // Case-insensitive, matching the SQL store's lower() guard.
            Some(serde_json::Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

/// Plain signed decimal (`-?[0-9]+(\.[0-9]+)?`), the same grammar the SQL
/// store's cast guard accepts. Scientific notation and bare dots are
/// rejected on both sides.
fn is_plain_decimal(s: &str) -> bool {
    let rest = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };
    !int_part.is_empty()
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}

fn number_value(field: &TargetField, subscriber: &Subscriber) -> Option<f64> {
    match field {
        TargetField::Engagement => Some(subscriber.engagement),
        TargetField::Attribute(key) => match subscriber.attributes.get(key) {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) if is_plain_decimal(s) => s.parse().ok(),
            _ => None,
        },
        _ => None,
    }
}

fn timestamp_value(field: &TargetField, subscriber: &Subscriber) -> Option<DateTime<Utc>> {
    match field {
        TargetField::LastSeenAt => subscriber.last_seen_at,
        TargetField::SubscribedAt => Some(subscriber.subscribed_at),
        _ => None,
    }
}
