//! Shared configuration, loaded from the process environment via
//! `envconfig` (already in the corpus's dependency table for every binary
//! crate, §9 ambient stack).

use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct KernelConfig {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "DATABASE_MAX_CONNECTIONS", default = "10")]
    pub database_max_connections: u32,

    #[envconfig(from = "RETRY_BASE_SECS", default = "2")]
    pub retry_base_secs: u64,

    #[envconfig(from = "RETRY_CEILING_SECS", default = "1800")]
    pub retry_ceiling_secs: u64,

    #[envconfig(from = "RETRY_MULTIPLIER", default = "2.0")]
    pub retry_multiplier: f64,

    #[envconfig(from = "EVENT_BUS_CAPACITY", default = "1024")]
    pub event_bus_capacity: usize,
}

impl KernelConfig {
    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy::build(
            self.retry_base_secs,
            std::time::Duration::from_secs(self.retry_ceiling_secs),
        )
        .multiplier(self.retry_multiplier)
        .provide()
    }
}
