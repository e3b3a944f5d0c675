//! Shared handler state.

use std::sync::Arc;

use lifeline_core::{EventBus, IdentityProvider};

use crate::services::SosService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SosService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(service: SosService, identity: Arc<dyn IdentityProvider>) -> Self {
        let event_bus = service.event_bus().clone();
        Self {
            service: Arc::new(service),
            identity,
            event_bus,
        }
    }
}
