//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::workflow::Stage;

/// Default workflow server address (the reference server listens on 5000).
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root URL of the workflow server.
    pub base_url: String,
    /// Optional bearer token attached to every request.
    pub api_token: Option<SecretString>,
    /// Per-request timeout. Chat processing can take up to 60s server-side.
    pub request_timeout: Duration,
    /// Automatic retries for idempotent calls on transport errors. Chat is never retried.
    pub max_retries: u32,
    /// Delay between those retries.
    pub retry_delay: Duration,
    pub poll: PollConfig,
    pub visualization_retry: RetryPolicy,
    /// Port for the WebSocket event relay (disabled when `None`).
    pub relay_port: Option<u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(90),
            max_retries: 1,
            retry_delay: Duration::from_millis(500),
            poll: PollConfig::default(),
            visualization_retry: RetryPolicy::default(),
            relay_port: None,
        }
    }
}

impl ClientConfig {
    /// Build config from `DESIGN_ASSIST_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("DESIGN_ASSIST_BASE_URL") {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    key: "DESIGN_ASSIST_BASE_URL".to_string(),
                    message: format!("expected an http(s) URL, got {url}"),
                });
            }
            config.base_url = url.trim_end_matches('/').to_string();
        }

        config.api_token = get("DESIGN_ASSIST_API_TOKEN").map(SecretString::from);

        if let Some(secs) = parse_number::<u64>(&get, "DESIGN_ASSIST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_number::<u32>(&get, "DESIGN_ASSIST_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(ms) = parse_number::<u64>(&get, "DESIGN_ASSIST_POLL_MS")? {
            config.poll.base_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number::<u64>(&get, "DESIGN_ASSIST_FAST_POLL_MS")? {
            config.poll.fast_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_number::<u32>(&get, "DESIGN_ASSIST_VIS_ATTEMPTS")? {
            config.visualization_retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_number::<u64>(&get, "DESIGN_ASSIST_VIS_INTERVAL_MS")? {
            config.visualization_retry.initial_delay = Duration::from_millis(ms);
        }
        config.relay_port = parse_number::<u16>(&get, "DESIGN_ASSIST_WS_PORT")?;

        if config.poll.base_interval.is_zero() || config.poll.fast_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "DESIGN_ASSIST_POLL_MS".to_string(),
                message: "poll intervals must be greater than zero".to_string(),
            });
        }

        Ok(config)
    }
}

fn parse_number<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(None),
    }
}

/// Polling intervals.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Interval outside the processing-heavy stages.
    pub base_interval: Duration,
    /// Interval while the current stage is in `fast_stages`.
    pub fast_interval: Duration,
    pub fast_stages: Vec<Stage>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(5000),
            fast_interval: Duration::from_millis(2000),
            fast_stages: vec![Stage::ConstraintGeneration, Stage::SolutionGeneration],
        }
    }
}

impl PollConfig {
    /// Interval to wait before the next tick given the current stage.
    pub fn interval_for(&self, stage: Option<Stage>) -> Duration {
        match stage {
            Some(s) if self.fast_stages.contains(&s) => self.fast_interval,
            _ => self.base_interval,
        }
    }
}

/// How delays grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Bounded retry for visualization readiness.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Random extra delay up to this fraction of the computed delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(8),
            backoff: Backoff::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    /// Jitter is not included.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_delay.saturating_mul(factor)
            }
        };
        base.min(self.max_delay)
    }

    /// [`delay_after`](Self::delay_after) plus random jitter.
    pub fn jittered_delay_after(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base = self.delay_after(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(extra)
    }
}
