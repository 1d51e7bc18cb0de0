use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use uuid::Uuid;

use hublink_core::CourierEnv;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    pub courier: CourierConfig,
    pub commerce: CommerceConfig,
    pub fulfillment: FulfillmentConfig,
    #[serde(default)]
    pub returns: ReturnsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CourierConfig {
    pub environment: CourierEnv,
    pub sandbox_url: String,
    pub live_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_quote_timeout_ms() -> u64 {
    3_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommerceConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Signature check on inbound order webhooks is skipped when unset.
    pub webhook_secret: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "NGN".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    #[default]
    Equal,
    Proportional,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FulfillmentConfig {
    pub default_hub_id: Option<Uuid>,
    #[serde(default)]
    pub allocation_policy: AllocationPolicy,
    pub fallback_base_rate: Decimal,
    pub fallback_min_weight_kg: Decimal,
    pub fallback_per_kg_rate: Decimal,
    /// Percent, e.g. 7.5
    pub fallback_vat_percentage: Decimal,
    #[serde(default = "default_delivery_timeline")]
    pub default_delivery_timeline: String,
    #[serde(default)]
    pub auto_dispatch: bool,
}

fn default_delivery_timeline() -> String {
    "3-5 business days".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReturnsConfig {
    pub window_days: i64,
}

impl Default for ReturnsConfig {
    fn default() -> Self {
        Self { window_days: 14 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    pub interval_seconds: u64,
    pub max_concurrency: usize,
    pub lock_ttl_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            max_concurrency: 8,
            lock_ttl_seconds: 30,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `HUBLINK__COURIER__PASSWORD=...`
            .add_source(config::Environment::with_prefix("HUBLINK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
