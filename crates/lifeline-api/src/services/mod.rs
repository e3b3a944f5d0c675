//! Service layer sitting between the handlers and the storage traits.

pub mod sos_service;

pub use sos_service::{SosConfig, SosService, TriggerSos, TriggerSosResponse};
