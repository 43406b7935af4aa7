use std::time::Duration;

use crate::events::EventSettings;

const PLACEHOLDER_ACCESS_SECRET: &str = "CHANGE_ME_ACCESS_SECRET";
const PLACEHOLDER_REFRESH_SECRET: &str = "CHANGE_ME_REFRESH_SECRET";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub access_secret: String,
    pub refresh_secret: String,
    /// TTL of the `events:all` collection entry.
    pub events_ttl_secs: u64,
    /// TTL of each `events:owner:<id>` collection entry.
    pub owner_events_ttl_secs: u64,
    /// Events scheduled closer than this are tombstoned on delete.
    pub protection_window_secs: u64,
    pub tombstone_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// 0 disables the pending-events report.
    pub pending_report_interval_secs: u64,
}

impl Config {
    pub fn event_settings(&self) -> EventSettings {
        EventSettings {
            all_events_ttl_secs: self.events_ttl_secs,
            owner_events_ttl_secs: self.owner_events_ttl_secs,
            protection_window: chrono::Duration::seconds(self.protection_window_secs as i64),
            tombstone_ttl: chrono::Duration::seconds(self.tombstone_ttl_secs as i64),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn pending_report_interval(&self) -> Option<Duration> {
        (self.pending_report_interval_secs > 0)
            .then(|| Duration::from_secs(self.pending_report_interval_secs))
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from any variable source. `load` feeds it the process
/// environment.
pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let production = var("EVENTGATE_ENV")
        .or_else(|| var("RUST_ENV"))
        .is_some_and(|v| v == "production");

    let access_secret = secret(&var, "EVENTGATE_ACCESS_SECRET", PLACEHOLDER_ACCESS_SECRET, production)?;
    let refresh_secret = secret(&var, "EVENTGATE_REFRESH_SECRET", PLACEHOLDER_REFRESH_SECRET, production)?;
    if access_secret == refresh_secret {
        anyhow::bail!("EVENTGATE_ACCESS_SECRET and EVENTGATE_REFRESH_SECRET must differ");
    }

    let number = |key: &str, default: u64| -> u64 {
        var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    };

    Ok(Config {
        port: var("EVENTGATE_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080),
        database_url: var("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/eventgate".into()),
        redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into()),
        access_secret,
        refresh_secret,
        events_ttl_secs: number("EVENTGATE_EVENTS_TTL_SECS", 300),
        owner_events_ttl_secs: number("EVENTGATE_OWNER_EVENTS_TTL_SECS", 180),
        protection_window_secs: number("EVENTGATE_PROTECTION_WINDOW_SECS", 24 * 3600),
        tombstone_ttl_secs: number("EVENTGATE_TOMBSTONE_TTL_SECS", 24 * 3600),
        sweep_interval_secs: number("EVENTGATE_SWEEP_INTERVAL_SECS", 300),
        pending_report_interval_secs: number("EVENTGATE_PENDING_REPORT_INTERVAL_SECS", 120),
    })
}

fn secret(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    placeholder: &str,
    production: bool,
) -> anyhow::Result<String> {
    let value = var(key).filter(|v| !v.is_empty());
    match value {
        Some(v) if v != placeholder => Ok(v),
        _ if production => anyhow::bail!(
            "{} is not set or still the insecure placeholder. \
             Set a proper secret before running in production.",
            key
        ),
        _ => {
            tracing::warn!("{} is not set; using an insecure placeholder", key);
            Ok(placeholder.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.events_ttl_secs, 300);
        assert_eq!(config.owner_events_ttl_secs, 180);
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.pending_report_interval(), Some(Duration::from_secs(120)));

        let settings = config.event_settings();
        assert_eq!(settings.protection_window, chrono::Duration::hours(24));
        assert_eq!(settings.tombstone_ttl, chrono::Duration::hours(24));
    }

    #[test]
    fn test_overrides() {
        let config = from_lookup(lookup(&[
            ("EVENTGATE_PORT", "9000"),
            ("EVENTGATE_ACCESS_SECRET", "a"),
            ("EVENTGATE_REFRESH_SECRET", "b"),
            ("EVENTGATE_PENDING_REPORT_INTERVAL_SECS", "0"),
            ("EVENTGATE_PROTECTION_WINDOW_SECS", "3600"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.access_secret, "a");
        assert_eq!(config.pending_report_interval(), None);
        assert_eq!(config.event_settings().protection_window, chrono::Duration::hours(1));
    }

    #[test]
    fn test_production_refuses_placeholders() {
        let err = from_lookup(lookup(&[("EVENTGATE_ENV", "production")])).unwrap_err();
        assert!(err.to_string().contains("EVENTGATE_ACCESS_SECRET"));

        assert!(from_lookup(lookup(&[
            ("EVENTGATE_ENV", "production"),
            ("EVENTGATE_ACCESS_SECRET", "a"),
            ("EVENTGATE_REFRESH_SECRET", "b"),
        ]))
        .is_ok());
    }

    #[test]
    fn test_secrets_must_differ() {
        assert!(from_lookup(lookup(&[
            ("EVENTGATE_ACCESS_SECRET", "same"),
            ("EVENTGATE_REFRESH_SECRET", "same"),
        ]))
        .is_err());
    }
}
