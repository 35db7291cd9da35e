use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kernel: job_common::config::KernelConfig,

    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:3000")]
    pub bind_addr: String,

    #[envconfig(from = "DEFAULT_MAX_RETRIES", default = "3")]
    pub default_max_retries: i32,

    #[envconfig(from = "HISTORY_PAGE_LIMIT", default = "50")]
    pub history_page_limit: i64,
}
