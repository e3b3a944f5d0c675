//! HTTP handlers for lifeline-api.

pub mod emergency;
pub mod notifications;
pub mod system;
