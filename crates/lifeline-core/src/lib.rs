//! # lifeline-core
//!
//! Core types, traits, and abstractions for the Lifeline emergency SOS
//! engine.
//!
//! This crate provides the domain model, the incident state machine, the
//! great-circle distance used everywhere in the engine, and the trait
//! definitions that the storage and delivery crates implement.

pub mod defaults;
pub mod error;
pub mod events;
pub mod geo;
pub mod lifecycle;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventActor, EventBus, EventEnvelope, LifecycleEvent};
pub use geo::{distance_km, distance_to, BoundingBox, GeoJsonPoint, GeoPoint};
pub use lifecycle::{
    auto_cancel_reason, check_transition, duration_minutes, is_active, notification_summary,
    NotificationSummary, SosEventView,
};
pub use models::*;
pub use traits::*;
