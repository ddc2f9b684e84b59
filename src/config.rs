use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::expiry::DEFAULT_HOLD_WINDOW_MINUTES;

/// What the engine itself needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub hold_window_minutes: u32,
    /// ISO currency code handed to the payment gateway.
    pub currency: String,
    /// Base URL of the customer-facing site. Success and cancel references point back here.
    pub frontend_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hold_window_minutes: DEFAULT_HOLD_WINDOW_MINUTES,
            currency: "usd".into(),
            frontend_url: "http://localhost:3000".into(),
        }
    }
}

impl EngineSettings {
    /// Where the gateway sends the customer back to after checkout, either way.
    pub fn payment_status_ref(&self, booking_id: ulid::Ulid) -> String {
        format!(
            "{}/payments/{booking_id}/status",
            self.frontend_url.trim_end_matches('/')
        )
    }
}

/// Process configuration, read from `ROOMLEDGER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub reclaim_interval: Duration,
    pub engine: EngineSettings,
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparsable {key}={raw:?}");
            default
        }),
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            hold_window_minutes: parsed(
                &lookup,
                "ROOMLEDGER_HOLD_MINUTES",
                defaults.hold_window_minutes,
            )
            .max(1),
            currency: lookup("ROOMLEDGER_CURRENCY")
                .map(|c| c.to_ascii_lowercase())
                .unwrap_or(defaults.currency),
            frontend_url: lookup("ROOMLEDGER_FRONTEND_URL").unwrap_or(defaults.frontend_url),
        };
        Self {
            bind: lookup("ROOMLEDGER_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "ROOMLEDGER_PORT", 7480),
            data_dir: PathBuf::from(lookup("ROOMLEDGER_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parsed(&lookup, "ROOMLEDGER_MAX_CONNECTIONS", 256usize).max(1),
            metrics_port: lookup("ROOMLEDGER_METRICS_PORT").and_then(|p| p.trim().parse().ok()),
            compact_threshold: parsed(&lookup, "ROOMLEDGER_COMPACT_THRESHOLD", 1000),
            reclaim_interval: Duration::from_secs(
                parsed(&lookup, "ROOMLEDGER_RECLAIM_INTERVAL_SECS", 30u64).max(1),
            ),
            engine,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomledger.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
