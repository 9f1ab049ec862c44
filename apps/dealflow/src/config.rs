//! Runtime configuration.
//!
//! Every knob has a default; `from_env` overrides them from `DEALFLOW_*`
//! variables after loading `.env`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agents::bus::BusConfig;
use crate::agents::router::RoutingPolicy;

/// Documents every contract needs before closing
pub const REQUIRED_DOCUMENTS: [&str; 3] = [
    "purchase_agreement",
    "disclosures",
    "inspection_contingency",
];

/// Bounded exponential backoff for recoverable worker errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 for the first retry)
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let base = self.base_backoff.as_millis() as u64;
        let delay = base.saturating_mul(2u64.saturating_pow(retry));
        Duration::from_millis(delay.min(self.max_backoff.as_millis() as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Attempts per step, first try included (default: 3)
    pub max_attempts: u32,
    /// Base delay for exponential backoff (default: 100ms)
    pub base_backoff_ms: u64,
    /// Maximum backoff delay (default: 5s)
    pub max_backoff_ms: u64,
    /// Wall-clock budget for one worker invocation (default: 30s)
    pub step_timeout_ms: u64,
    /// Steps a run may take before it is failed (default: 200)
    pub max_steps: u64,
    /// How long a worker waits for a bus response (default: 2s)
    pub bus_response_timeout_ms: u64,
    pub heartbeat_timeout_secs: i64,
    /// Request lifetime on the bus; 0 disables expiry
    pub request_ttl_secs: i64,
    pub advisor_timeout_ms: u64,
    pub deadline_window_hours: i64,
    pub contingency_days: i64,
    pub max_discovery_rounds: u32,
    pub max_new_deals: usize,
    pub required_documents: Vec<String>,
    pub database_url: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
            step_timeout_ms: 30_000,
            max_steps: 200,
            bus_response_timeout_ms: 2_000,
            heartbeat_timeout_secs: 60,
            request_ttl_secs: 300,
            advisor_timeout_ms: 3_000,
            deadline_window_hours: 48,
            contingency_days: 21,
            max_discovery_rounds: 3,
            max_new_deals: 10,
            required_documents: REQUIRED_DOCUMENTS.iter().map(|d| d.to_string()).collect(),
            database_url: None,
        }
    }
}

impl OrchestratorConfig {
    /// Loads `.env` and reads overrides from the environment
    ///
    /// Unparsable values keep their default and log a warning.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        env_override("DEALFLOW_MAX_ATTEMPTS", &mut config.max_attempts);
        env_override("DEALFLOW_BASE_BACKOFF_MS", &mut config.base_backoff_ms);
        env_override("DEALFLOW_MAX_BACKOFF_MS", &mut config.max_backoff_ms);
        env_override("DEALFLOW_STEP_TIMEOUT_MS", &mut config.step_timeout_ms);
        env_override("DEALFLOW_MAX_STEPS", &mut config.max_steps);
        env_override(
            "DEALFLOW_BUS_RESPONSE_TIMEOUT_MS",
            &mut config.bus_response_timeout_ms,
        );
        env_override(
            "DEALFLOW_HEARTBEAT_TIMEOUT_SECS",
            &mut config.heartbeat_timeout_secs,
        );
        env_override("DEALFLOW_REQUEST_TTL_SECS", &mut config.request_ttl_secs);
        env_override("DEALFLOW_ADVISOR_TIMEOUT_MS", &mut config.advisor_timeout_ms);
        env_override(
            "DEALFLOW_DEADLINE_WINDOW_HOURS",
            &mut config.deadline_window_hours,
        );
        env_override("DEALFLOW_CONTINGENCY_DAYS", &mut config.contingency_days);
        env_override(
            "DEALFLOW_MAX_DISCOVERY_ROUNDS",
            &mut config.max_discovery_rounds,
        );
        env_override("DEALFLOW_MAX_NEW_DEALS", &mut config.max_new_deals);

        config.database_url = std::env::var("DATABASE_URL").ok();
        if config.max_attempts == 0 {
            warn!("DEALFLOW_MAX_ATTEMPTS must be at least 1, using 1");
            config.max_attempts = 1;
        }
        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn bus_response_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_response_timeout_ms)
    }

    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_millis(self.advisor_timeout_ms)
    }

    pub fn contingency_period(&self) -> chrono::Duration {
        duration_or_default(
            "contingency_days",
            self.contingency_days,
            Self::default().contingency_days,
            chrono::Duration::try_days,
        )
    }

    pub fn bus_config(&self) -> BusConfig {
        let defaults = Self::default();
        BusConfig {
            heartbeat_timeout: duration_or_default(
                "heartbeat_timeout_secs",
                self.heartbeat_timeout_secs,
                defaults.heartbeat_timeout_secs,
                chrono::Duration::try_seconds,
            ),
            request_ttl: (self.request_ttl_secs > 0).then(|| {
                duration_or_default(
                    "request_ttl_secs",
                    self.request_ttl_secs,
                    defaults.request_ttl_secs,
                    chrono::Duration::try_seconds,
                )
            }),
        }
    }

    pub fn routing_policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            deadline_window: duration_or_default(
                "deadline_window_hours",
                self.deadline_window_hours,
                Self::default().deadline_window_hours,
                chrono::Duration::try_hours,
            ),
            max_discovery_rounds: self.max_discovery_rounds,
        }
    }
}

/// Negative or out-of-range amounts fall back to the default
fn duration_or_default(
    key: &str,
    amount: i64,
    default: i64,
    unit: fn(i64) -> Option<chrono::Duration>,
) -> chrono::Duration {
    match unit(amount).filter(|_| amount >= 0) {
        Some(duration) => duration,
        None => {
            warn!(key, amount, default, "Duration out of range, using default");
            unit(default).unwrap_or_else(chrono::Duration::zero)
        }
    }
}

fn env_override<T: FromStr>(key: &str, slot: &mut T) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "Unparsable configuration value, keeping default"),
    }
}
