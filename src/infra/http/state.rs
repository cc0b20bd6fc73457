use std::sync::Arc;
use std::time::Duration;

use crate::application::{AccountService, ListingService, SessionManager};
use crate::cache::gate::AdmissionGate;
use crate::cache::store::ObjectCache;
use crate::infra::telemetry::RuntimeStats;

/// Everything a request handler can reach; constructed once at startup
/// and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ObjectCache>,
    pub sessions: Arc<SessionManager>,
    pub accounts: Arc<AccountService>,
    pub listings: Arc<ListingService>,
    pub gate: Arc<AdmissionGate>,
    pub stats: Arc<RuntimeStats>,
    pub backpressure_threshold: usize,
    pub request_deadline: Duration,
}
