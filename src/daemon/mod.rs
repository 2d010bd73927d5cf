//! The long-running coordinating process and its standing rules.

pub mod collision;
pub mod delivery;
pub mod ipc;
pub mod service;
pub mod subscriptions;

pub use collision::{CollisionDetector, CollisionReport};
pub use delivery::{resolve_targets, DeliveryEngine, DeliveryOutcome};
pub use service::Daemon;
pub use subscriptions::SubscriptionManager;
