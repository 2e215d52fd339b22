//! Condition evaluation and segment predicate construction.
//!
//! [`condition_filter`] compiles one rule into a predicate fragment;
//! [`build_predicate`] folds an ordered condition list into the combined
//! segment predicate. The fold is left-to-right with *trailing* operator
//! semantics: the join on condition `i` governs how the running result
//! combines with condition `i + 1`, so `[A(and), B(or), C]` compiles to
//! `(A AND B) OR C`.

use chrono::{DateTime, Utc};

use super::predicate::{Filter, NumericOp, Predicate, TargetField};
use super::{ConditionOperator, LocationValue, RuleKind, SegmentCondition};
use crate::error::{EngineError, Result};

/// Map a rule's category to the subscriber field it tests. Known profile
/// columns are matched by name; anything else is a custom attribute.
/// Behavioral (action) rules resolve to denormalized signal columns where
/// one exists, otherwise to the attributes map.
fn resolve_field(kind: RuleKind, category: &str) -> TargetField {
    match (kind, category) {
        (RuleKind::Property, "city") => TargetField::City,
        (RuleKind::Property, "region") => TargetField::Region,
        (RuleKind::Property, "country") => TargetField::Country,
        (RuleKind::Property, "is_mobile") | (RuleKind::Property, "isMobile") => TargetField::IsMobile,
        (RuleKind::Property, "device_type") | (RuleKind::Property, "deviceType") => TargetField::DeviceType,
        (RuleKind::Property, "browser") => TargetField::Browser,
        (RuleKind::Property, "language") => TargetField::Language,
        (RuleKind::Property, "last_seen") | (RuleKind::Property, "lastSeen") => TargetField::LastSeenAt,
        (RuleKind::Property, "subscribed") => TargetField::SubscribedAt,
        (RuleKind::Action, "engagement") => TargetField::Engagement,
        (_, other) => TargetField::Attribute(other.to_string()),
    }
}

/// Compile one condition into a predicate fragment.
///
/// `now` is the evaluation instant captured once per resolution run, so
/// every date cutoff within a run is computed from the same clock reading.
///
/// Unknown operator/category combinations fail closed with a configuration
/// error instead of silently matching everything or nothing.
pub fn condition_filter(condition: &SegmentCondition, now: DateTime<Utc>) -> Result<Predicate> {
    let field = resolve_field(condition.kind, &condition.category);

    match condition.operator {
        ConditionOperator::Equals | ConditionOperator::NotEquals => {
            equality_filter(condition, field)
        }
        ConditionOperator::Contains => {
            if field.is_timestamp() || field == TargetField::IsMobile || field == TargetField::Engagement {
                return Err(unsupported(condition));
            }
            let value = require_string(condition)?;
            Ok(Predicate::leaf(Filter::TextContains { field, value }))
        }
        ConditionOperator::GreaterThan
        | ConditionOperator::LessThan
        | ConditionOperator::GreaterOrEqual
        | ConditionOperator::LessOrEqual => {
            let op = match condition.operator {
                ConditionOperator::GreaterThan => NumericOp::Gt,
                ConditionOperator::LessThan => NumericOp::Lt,
                ConditionOperator::GreaterOrEqual => NumericOp::Ge,
                _ => NumericOp::Le,
            };
            if !matches!(field, TargetField::Engagement | TargetField::Attribute(_)) {
                return Err(unsupported(condition));
            }
            let value = condition.number_value.ok_or_else(|| {
                EngineError::Validation(format!(
                    "numeric operator {:?} on \"{}\" requires a number value",
                    condition.operator, condition.category
                ))
            })?;
            Ok(Predicate::leaf(Filter::NumberCompare { field, op, value }))
        }
        ConditionOperator::WithinLast => {
            if !field.is_timestamp() {
                return Err(unsupported(condition));
            }
            let (amount, unit) = match (condition.date_value, condition.date_unit) {
                (Some(amount), Some(unit)) => (amount, unit),
                _ => {
                    return Err(EngineError::Validation(format!(
                        "date operator on \"{}\" requires a value and a unit",
                        condition.category
                    )))
                }
            };
            let cutoff = now - unit.to_duration(amount);
            Ok(Predicate::leaf(Filter::Since { field, cutoff }))
        }
        ConditionOperator::InLocation => location_filter(condition),
    }
}

fn equality_filter(condition: &SegmentCondition, field: TargetField) -> Result<Predicate> {
    let negated = condition.operator == ConditionOperator::NotEquals;

    if field.is_timestamp() || field == TargetField::Engagement {
        return Err(unsupported(condition));
    }

    if field == TargetField::IsMobile {
        let raw = require_string(condition)?;
        let value: bool = raw.parse().map_err(|_| {
            EngineError::Validation(format!(
                "\"{}\" expects a boolean value, got \"{}\"",
                condition.category, raw
            ))
        })?;
        let value = if negated { !value } else { value };
        return Ok(Predicate::leaf(Filter::BoolEquals { field, value }));
    }

    let value = require_string(condition)?;
    Ok(Predicate::leaf(Filter::TextEquals { field, value, negated }))
}

/// A location rule expands to the conjunction of whichever of
/// country/region/city the value carries.
fn location_filter(condition: &SegmentCondition) -> Result<Predicate> {
    let location: &LocationValue = condition.location.as_ref().ok_or_else(|| {
        EngineError::Validation("location operator requires a location value".to_string())
    })?;
    if location.is_empty() {
        return Err(EngineError::Validation(
            "location operator requires at least one of country/region/city".to_string(),
        ));
    }

    let mut parts: Vec<Predicate> = Vec::new();
    if let Some(country) = &location.country {
        parts.push(Predicate::leaf(Filter::TextEquals {
            field: TargetField::Country,
            value: country.clone(),
            negated: false,
        }));
    }
    if let Some(region) = &location.region {
        parts.push(Predicate::leaf(Filter::TextEquals {
            field: TargetField::Region,
            value: region.clone(),
            negated: false,
        }));
    }
    if let Some(city) = &location.city {
        parts.push(Predicate::leaf(Filter::TextEquals {
            field: TargetField::City,
            value: city.clone(),
            negated: false,
        }));
    }

    parts
        .into_iter()
        .reduce(Predicate::and)
        .ok_or_else(|| {
            EngineError::Validation(
                "location operator requires at least one of country/region/city".to_string(),
            )
        })
}

fn require_string(condition: &SegmentCondition) -> Result<String> {
    condition.string_value.clone().ok_or_else(|| {
        EngineError::Validation(format!(
            "operator {:?} on \"{}\" requires a string value",
            condition.operator, condition.category
        ))
    })
}

fn unsupported(condition: &SegmentCondition) -> EngineError {
    EngineError::Config(format!(
        "unsupported operator/category combination: {:?} on \"{}\"",
        condition.operator, condition.category
    ))
}

/// Fold an ordered condition list into one combined predicate.
///
/// An empty list matches the full tenant population, an explicit policy, not
/// an error. The store layer always adds the tenant, `is_active`, and
/// soft-delete guards on top of whatever is returned here.
pub fn build_predicate(conditions: &[SegmentCondition], now: DateTime<Utc>) -> Result<Predicate> {
    let mut iter = conditions.iter();

    let first = match iter.next() {
        None => return Ok(Predicate::All),
        Some(condition) => condition,
    };

    let mut acc = condition_filter(first, now)?;
    let mut pending_join = first.join;

    for condition in iter {
        let fragment = condition_filter(condition, now)?;
        acc = acc.combine(pending_join, fragment);
        pending_join = condition.join;
    }

    Ok(acc)
}
