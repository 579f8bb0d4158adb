use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// Identity of this operator, sent to peers and to the Hub
    pub operator: OperatorConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub saga: SagaConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// PostgreSQL connection URL. Without it every store runs in memory.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub postgres_pool: PoolSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 0,
            acquire_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OperatorConfig {
    pub id: String,
    pub name: String,
    /// Externally reachable base URL; peers post confirmations to
    /// `{public_url}/transferCitizenConfirm`.
    pub public_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HubConfig {
    pub base_url: String,
    pub unregister_path: String,
    pub request_timeout_ms: u64,
    pub rate_limit_per_minute: usize,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            unregister_path: "/apis/unregisterCitizen".to_string(),
            request_timeout_ms: 10_000,
            rate_limit_per_minute: 10,
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl HubConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_secs: 60,
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomized in both directions (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SagaConfig {
    /// TTL of idempotency keys guarding transfer creation
    pub idempotency_ttl_secs: u64,
    /// TTL of idempotency keys guarding confirmation callbacks
    pub confirm_idempotency_ttl_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_acquire_timeout_ms: u64,
    /// Max time an outgoing transfer may stay PENDING before it is failed
    pub confirmation_timeout_secs: u64,
    pub peer_timeout_ms: u64,
    #[serde(default)]
    pub peer_retry: RetrySettings,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_secs: 900,
            confirm_idempotency_ttl_secs: 3_600,
            lock_ttl_secs: 120,
            lock_acquire_timeout_ms: 2_000,
            confirmation_timeout_secs: 1_800,
            peer_timeout_ms: 10_000,
            peer_retry: RetrySettings {
                max_attempts: 3,
                initial_backoff_ms: 1_000,
                max_backoff_ms: 10_000,
                multiplier: 2.0,
                jitter: 0.2,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub max_retries: i32,
    pub batch_size: usize,
    /// CONFIRMED records untouched for this long are resumed
    pub stale_threshold_secs: u64,
    /// Optional webhook receiving alerts as JSON; alerts are always logged
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_retries: 10,
            batch_size: 100,
            stale_threshold_secs: 60,
            alert_webhook_url: None,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config: {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.hub.rate_limit_per_minute == 0 {
            bail!("hub.rate_limit_per_minute must be greater than zero");
        }
        if self.hub.retry.max_attempts == 0 || self.saga.peer_retry.max_attempts == 0 {
            bail!("retry max_attempts must be at least 1");
        }
        if self.hub.circuit_breaker.failure_threshold == 0
            || self.hub.circuit_breaker.success_threshold == 0
            || self.hub.circuit_breaker.half_open_max_calls == 0
        {
            bail!("circuit breaker thresholds must be greater than zero");
        }
        if self.sweeper.max_retries < 1 {
            bail!("sweeper.max_retries must be at least 1");
        }
        Ok(())
    }
}
