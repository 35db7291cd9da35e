pub mod app;
pub mod healthz;
pub mod jobs;

use job_common::queue::QueueBroker;
use job_common::service::JobService;
use job_common::store::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub service: JobService,
    pub store: JobStore,
    pub broker: QueueBroker,
    pub default_max_retries: i32,
    pub history_page_limit: i64,
    pub health: health::HealthRegistry,
}
