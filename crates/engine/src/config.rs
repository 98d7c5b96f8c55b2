use serde::Deserialize;
use tracing::warn;

/// Tunable policy constants for the engine and the escalation sweeper.
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | STITCHLINE_DB_PATH | stitchline.db | SQLite database file |
/// | STITCHLINE_INACTIVITY_DAYS | 3 | days without activity before an order turns urgent |
/// | STITCHLINE_MAX_ETA_REVISIONS | 2 | expected-arrival dates purchasing may set per order |
/// | STITCHLINE_EXECUTIVE_ALERT_ROUND | 2 | delay round that raises an executive alert |
/// | STITCHLINE_SWEEP_INTERVAL_SECS | 3600 | pause between sweeps |
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_path: String,
    pub inactivity_days: u32,
    pub max_eta_revisions: u32,
    pub executive_alert_round: u32,
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "stitchline.db".into(),
            inactivity_days: 3,
            max_eta_revisions: 2,
            executive_alert_round: 2,
            sweep_interval_secs: 3600,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparsable config value, using default");
            default
        }),
        Err(_) => default,
    }
}

impl EngineConfig {
    /// Defaults overlaid with `STITCHLINE_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            database_path: std::env::var("STITCHLINE_DB_PATH").unwrap_or(d.database_path),
            inactivity_days: env_or("STITCHLINE_INACTIVITY_DAYS", d.inactivity_days),
            max_eta_revisions: env_or("STITCHLINE_MAX_ETA_REVISIONS", d.max_eta_revisions),
            executive_alert_round: env_or(
                "STITCHLINE_EXECUTIVE_ALERT_ROUND",
                d.executive_alert_round,
            ),
            sweep_interval_secs: env_or("STITCHLINE_SWEEP_INTERVAL_SECS", d.sweep_interval_secs),
        }
    }

    pub fn inactivity_threshold(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::days(i64::from(self.inactivity_days))
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}
