//! Campaign delivery engine for web-push notification campaigns.
//!
//! The crate turns a stored campaign into delivered push notifications:
//! segment rules compile to predicates, matching subscribers are
//! deduplicated into one audience, a payload template is built once and
//! personalized per recipient, and the batches go out through a
//! [`gateway::PushGateway`] with full per-recipient accounting in the
//! campaign-send ledger. [`lifecycle::CampaignEngine`] is the entry point.

// Infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod store;

// Domain
pub mod audience;
pub mod campaign;
pub mod payload;
pub mod segment;
pub mod subscriber;

// Delivery
pub mod dispatch;
pub mod gateway;
pub mod lifecycle;

pub use error::{EngineError, Result};
pub use lifecycle::{CampaignEngine, SendOptions, SendReport};
