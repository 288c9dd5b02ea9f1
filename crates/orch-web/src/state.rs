use chrono::Duration;
use orchd::TicketService;
use std::sync::Arc;

use crate::coordinator::RealtimeCoordinator;

#[derive(Clone)]
pub struct WebState {
    pub service: Arc<TicketService>,
    pub coordinator: Arc<RealtimeCoordinator>,
    pub heartbeat_timeout: Duration,
}

impl WebState {
    pub fn new(
        service: Arc<TicketService>,
        coordinator: Arc<RealtimeCoordinator>,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            service,
            coordinator,
            heartbeat_timeout,
        }
    }
}
