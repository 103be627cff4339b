use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::retry::RetryPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "API_HOST", default = "http://localhost:8000")]
    pub api_host: String,

    #[envconfig(from = "PROJECT_ID", default = "1")]
    pub project_id: i64,

    #[envconfig(from = "PERSONAL_API_KEY", default = "")]
    pub personal_api_key: String,

    // selects the criteria filter tree over the legacy groups format
    #[envconfig(from = "COHORT_FILTERS_ENABLED", default = "false")]
    pub cohort_filters_enabled: bool,

    #[envconfig(default = "1000")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            api_host: "http://localhost:8000".to_string(),
            project_id: 1,
            personal_api_key: "phx_test".to_string(),
            cohort_filters_enabled: true,
            poll_interval: EnvMsDuration(time::Duration::from_secs(1)),
            request_timeout: EnvMsDuration(time::Duration::from_secs(10)),
            retry_policy: RetryPolicyConfig {
                backoff_coefficient: 2,
                initial_interval: EnvMsDuration(time::Duration::from_secs(1)),
                maximum_interval: EnvMsDuration(time::Duration::from_secs(30)),
                max_attempts: 5,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Backoff applied when a status re-fetch fails while a cohort is calculating.
#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub maximum_interval: EnvMsDuration,

    #[envconfig(default = "5")]
    pub max_attempts: u32,
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        RetryPolicy::build(config.backoff_coefficient, config.initial_interval.0)
            .maximum_interval(config.maximum_interval.0)
            .max_attempts(config.max_attempts)
            .provide()
    }
}
