use std::sync::Arc;

use livecap_core::bootstrap::Services;

use crate::sse::SseHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub sse: Arc<SseHub>,
}

impl AppState {
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        let sse = SseHub::new(services.clone());
        sse.start();
        Self { services, sse }
    }
}
