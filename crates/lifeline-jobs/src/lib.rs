//! # lifeline-jobs
//!
//! Work that happens around an SOS incident rather than inside a request.
//!
//! This crate provides:
//! - Notification fan-out to administrators, matched contacts, and family
//! - Notification sinks (structured log, signed webhook)
//! - The stale-incident reaper and the periodic worker that drives it
//!
//! ## Example
//!
//! ```ignore
//! use lifeline_jobs::{ReaperWorker, StaleIncidentReaper, WorkerConfig};
//!
//! let reaper = StaleIncidentReaper::new(repos.events.clone()).with_event_bus(bus.clone());
//! let handle = ReaperWorker::new(reaper, WorkerConfig::from_env()).start();
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod fanout;
pub mod reaper;
pub mod sink;
pub mod worker;

// Re-export core types
pub use lifeline_core::*;

pub use fanout::{DispatchReport, NotificationDispatcher};
pub use reaper::StaleIncidentReaper;
pub use sink::{LogNotificationSink, WebhookNotificationSink, SIGNATURE_HEADER};
pub use worker::{ReaperWorker, WorkerConfig, WorkerEvent, WorkerHandle};
