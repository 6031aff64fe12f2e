use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub export_dir: PathBuf,
    pub page_size: u32,
    pub chart_settle: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            export_dir: PathBuf::from("exports"),
            page_size: 10,
            chart_settle: Duration::from_millis(300),
        }
    }
}

impl AppConfig {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let parse_u32 = |key: &str, fallback: u32| -> anyhow::Result<u32> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("{key} must be a positive integer, got '{raw}'")),
                None => Ok(fallback),
            }
        };

        let page_size = parse_u32("INSIGHTS_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            anyhow::bail!("INSIGHTS_PAGE_SIZE must be at least 1");
        }
        let settle_ms = parse_u32(
            "INSIGHTS_CHART_SETTLE_MS",
            defaults.chart_settle.as_millis() as u32,
        )?;

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections: parse_u32("INSIGHTS_MAX_CONNECTIONS", defaults.max_connections)?,
            export_dir: lookup("INSIGHTS_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            page_size,
            chart_settle: Duration::from_millis(u64::from(settle_ms)),
        })
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.database_url().is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/insights"),
            ("INSIGHTS_PAGE_SIZE", "25"),
            ("INSIGHTS_CHART_SETTLE_MS", "0"),
            ("INSIGHTS_EXPORT_DIR", "/tmp/reports"),
        ])
        .unwrap();
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/insights");
        assert_eq!(config.page_size, 25);
        assert_eq!(config.chart_settle, Duration::ZERO);
        assert_eq!(config.export_dir, PathBuf::from("/tmp/reports"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(config(&[("INSIGHTS_PAGE_SIZE", "ten")]).is_err());
        assert!(config(&[("INSIGHTS_PAGE_SIZE", "0")]).is_err());
    }
}
