use std::sync::Arc;
use std::time::Instant;

use crate::auth::policy::PolicyStore;
use crate::config::Config;
use crate::events::EventHub;
use crate::middleware::IpRateLimiter;
use crate::session::SessionManager;

pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
    pub policy: Arc<dyn PolicyStore>,
    pub hub: Arc<EventHub>,
    pub rate: Arc<IpRateLimiter>,
    pub started_at: Instant,
}
