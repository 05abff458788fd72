use std::path::PathBuf;
use std::time::Duration;

use crate::booking::BookingSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Lost on exit.
    Memory,
    /// WAL-backed, replayed on start.
    Durable,
}

/// Process configuration, read once from `BOOKINGS_*` environment variables.
/// Unset or unparsable values fall back to defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub store_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub mail_from: String,
    pub owner_email: String,
    pub template_dir: PathBuf,
    pub mail_template: Option<String>,
    pub session_ttl: Duration,
    pub compact_threshold: u64,
    /// Room names seeded into an empty store.
    pub rooms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            store: StoreKind::Durable,
            store_timeout: Duration::from_millis(3000),
            metrics_port: None,
            mail_from: "bookings@localhost".into(),
            owner_email: "owner@localhost".into(),
            template_dir: PathBuf::from("./email_templates"),
            mail_template: None,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            compact_threshold: 1000,
            rooms: vec!["General's Quarters".into(), "Major's Suite".into()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        let store = match get("BOOKINGS_STORE").as_deref().map(str::trim) {
            None | Some("durable") => StoreKind::Durable,
            Some("memory") => StoreKind::Memory,
            Some(other) => {
                tracing::warn!("unknown BOOKINGS_STORE {other:?}, using durable");
                StoreKind::Durable
            }
        };

        let rooms = get("BOOKINGS_ROOMS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|names| !names.is_empty())
            .unwrap_or(defaults.rooms);

        Self {
            data_dir: get("BOOKINGS_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            store,
            store_timeout: parsed("BOOKINGS_STORE_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            metrics_port: get("BOOKINGS_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            mail_from: get("BOOKINGS_MAIL_FROM").unwrap_or(defaults.mail_from),
            owner_email: get("BOOKINGS_OWNER_EMAIL").unwrap_or(defaults.owner_email),
            template_dir: get("BOOKINGS_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            mail_template: get("BOOKINGS_MAIL_TEMPLATE").filter(|s| !s.trim().is_empty()),
            session_ttl: parsed("BOOKINGS_SESSION_TTL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_ttl),
            compact_threshold: parsed("BOOKINGS_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            rooms,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn booking_settings(&self) -> BookingSettings {
        BookingSettings {
            store_timeout: self.store_timeout,
            mail_from: self.mail_from.clone(),
            owner_email: self.owner_email.clone(),
            mail_template: self.mail_template.clone(),
        }
    }
}
