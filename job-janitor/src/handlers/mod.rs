pub mod app;
pub mod healthz;

#[derive(Clone)]
pub struct AppState {
    pub health: health::HealthRegistry,
}
