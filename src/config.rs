use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::DispatchSettings;
use crate::pricing::{EstimatedFare, FarePolicy, MeteredFare, RateTable, Rates};

const DEFAULT_MULTIPLIERS: &str = "economy=1.0,comfort=1.3,premium=1.8,van=1.5";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("STORE_BACKEND must be postgres or memory, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarePolicyKind {
    /// Re-price from the rate table over the recorded route.
    Metered,
    /// Charge the estimate the passenger saw.
    Estimate,
}

impl FromStr for FarePolicyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metered" => Ok(Self::Metered),
            "estimate" | "estimated" => Ok(Self::Estimate),
            other => Err(anyhow!("FARE_POLICY must be metered or estimate, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub enabled: bool,
    pub bootstrap_servers: String,
    pub topic: String,
    pub sasl_mechanism: String,
    pub username: String,
    pub password: String,
    pub security_protocol: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub store_backend: StoreBackend,
    pub http_addr: String,
    pub log_level: String,
    pub log_json: bool,
    pub pending_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub search_radius_km: f64,
    pub driver_freshness_secs: i64,
    pub average_speed_kmh: f64,
    pub fare_mode: FarePolicyKind,
    pub rate_table: RateTable,
    pub earnings_retry_attempts: u32,
    pub earnings_retry_backoff_ms: u64,
    pub kafka: KafkaSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "ride_dispatch".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "dispatch".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "dispatch".to_string());

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "postgres://{}:{}@{}:{}/{}",
                db_user, db_pwd, db_host, db_port, db_name
            )
        });

        let store_backend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;
        let fare_mode = env::var("FARE_POLICY")
            .unwrap_or_else(|_| "metered".to_string())
            .parse()?;

        let defaults = Rates::default();
        let rates = Rates {
            base_fare: number("FARE_BASE", defaults.base_fare),
            per_km: number("FARE_PER_KM", defaults.per_km),
            per_minute: number("FARE_PER_MINUTE", defaults.per_minute),
            minimum_fare: number("FARE_MINIMUM", defaults.minimum_fare),
        };
        let multipliers = RateTable::parse_multipliers(
            &env::var("FARE_MULTIPLIERS").unwrap_or_else(|_| DEFAULT_MULTIPLIERS.to_string()),
        )?;

        let kafka = KafkaSettings {
            enabled: flag("KAFKA_ENABLED", false),
            bootstrap_servers: env::var("KAFKA_BOOTSTRAP_SERVERS")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            topic: env::var("KAFKA_TOPIC").unwrap_or_else(|_| "ride-events".to_string()),
            sasl_mechanism: env::var("KAFKA_SASL_MECHANISM")
                .unwrap_or_else(|_| "SCRAM-SHA-256".to_string()),
            username: env::var("KAFKA_USERNAME").unwrap_or_default(),
            password: env::var("KAFKA_PASSWORD").unwrap_or_default(),
            security_protocol: env::var("KAFKA_SECURITY_PROTOCOL")
                .unwrap_or_else(|_| "SASL_PLAINTEXT".to_string()),
        };

        Ok(Self {
            database_url,
            db_max_connections: number("DB_MAX_CONNECTIONS", 20),
            run_migrations: flag("RUN_MIGRATIONS", true),
            store_backend,
            http_addr: env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: flag("LOG_JSON", false),
            pending_ttl_secs: number("PENDING_TTL_SECS", 900),
            sweep_interval_secs: number("SWEEP_INTERVAL_SECS", 60),
            search_radius_km: positive("SEARCH_RADIUS_KM", 10.0),
            driver_freshness_secs: number("DRIVER_FRESHNESS_SECS", 300),
            average_speed_kmh: positive("AVERAGE_SPEED_KMH", 30.0),
            fare_mode,
            rate_table: RateTable::new(rates, multipliers),
            earnings_retry_attempts: number("EARNINGS_RETRY_ATTEMPTS", 3),
            earnings_retry_backoff_ms: number("EARNINGS_RETRY_BACKOFF_MS", 100),
            kafka,
        })
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            pending_ttl: chrono::Duration::seconds(self.pending_ttl_secs),
            search_radius_km: self.search_radius_km,
            driver_freshness: chrono::Duration::seconds(self.driver_freshness_secs),
            average_speed_kmh: self.average_speed_kmh,
            earnings_retry_attempts: self.earnings_retry_attempts,
            earnings_retry_backoff: Duration::from_millis(self.earnings_retry_backoff_ms),
        }
    }

    pub fn fare_policy(&self) -> Arc<dyn FarePolicy> {
        match self.fare_mode {
            FarePolicyKind::Metered => Arc::new(MeteredFare {
                table: self.rate_table.clone(),
            }),
            FarePolicyKind::Estimate => Arc::new(EstimatedFare),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn number<T: FromStr + PartialOrd + Default>(key: &str, default: T) -> T {
    parse_number(env::var(key).ok(), default)
}

fn positive(key: &str, default: f64) -> f64 {
    parse_positive(env::var(key).ok(), default)
}

fn flag(key: &str, default: bool) -> bool {
    parse_flag(env::var(key).ok(), default)
}

/// Unparseable or negative values fall back to `default`.
fn parse_number<T: FromStr + PartialOrd + Default>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v >= T::default())
        .unwrap_or(default)
}

/// Divisors and radii: zero, negative or non-finite values fall back to `default`.
fn parse_positive(raw: Option<String>, default: f64) -> f64 {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
