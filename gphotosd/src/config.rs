use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::sync::backoff::{ExponentialRetryFactory, RetryPolicy};
use crate::sync::error::ErrorKind;
use crate::sync::indexer::DEFAULT_PAGE_SIZE;
use crate::sync::reconcile::DEFAULT_BATCH_SIZE;

const DEFAULT_STORAGE_DIR_NAME: &str = "Google Photos";
const DEFAULT_DATABASE_NAME: &str = "google_photos.sqlite3";
const DEFAULT_API_BASE_URL: &str = "https://photoslibrary.googleapis.com";
const DEFAULT_WORKERS: u64 = 5;
const DEFAULT_RETRY_BASE_MS: u64 = 1000;
const DEFAULT_RETRY_MAX_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct MirrorConfig {
    pub storage_root: PathBuf,
    pub database_path: PathBuf,
    pub temp_dir: PathBuf,
    pub api_base_url: String,
    /// Only required for a mirror run.
    pub token: Option<String>,
    pub workers: usize,
    pub page_size: u32,
    pub batch_size: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl MirrorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let config = Self::from_lookup(|name| std::env::var(name).ok(), &home);
        config.validate()?;
        Ok(config)
    }

    pub fn from_lookup<F>(lookup: F, home: &Path) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let path_var = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .map(|value| expand_with_home(value.trim(), home))
        };
        let u64_var = |name: &str, default: u64| read_u64(lookup(name), default);

        let storage_root = path_var("GPHOTOS_STORAGE_ROOT")
            .unwrap_or_else(|| default_storage_root(home));
        let database_path = path_var("GPHOTOS_DATABASE")
            .unwrap_or_else(|| storage_root.join(DEFAULT_DATABASE_NAME));
        let temp_dir = path_var("GPHOTOS_TEMP_DIR").unwrap_or_else(std::env::temp_dir);
        let api_base_url = lookup("GPHOTOS_API_BASE_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let token = lookup("GPHOTOS_TOKEN")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Self {
            storage_root,
            database_path,
            temp_dir,
            api_base_url,
            token,
            workers: u64_var("GPHOTOS_WORKERS", DEFAULT_WORKERS) as usize,
            page_size: u64_var("GPHOTOS_PAGE_SIZE", u64::from(DEFAULT_PAGE_SIZE))
                .try_into()
                .unwrap_or(u32::MAX),
            batch_size: u64_var("GPHOTOS_BATCH_SIZE", DEFAULT_BATCH_SIZE as u64) as usize,
            retry_base: Duration::from_millis(u64_var("GPHOTOS_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)),
            retry_max: Duration::from_secs(u64_var("GPHOTOS_RETRY_MAX_SECS", DEFAULT_RETRY_MAX_SECS)),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.page_size <= DEFAULT_PAGE_SIZE,
            "GPHOTOS_PAGE_SIZE must be at most {DEFAULT_PAGE_SIZE}, got {}",
            self.page_size
        );
        anyhow::ensure!(
            self.batch_size <= DEFAULT_BATCH_SIZE,
            "GPHOTOS_BATCH_SIZE must be at most {DEFAULT_BATCH_SIZE}, got {}",
            self.batch_size
        );
        anyhow::ensure!(
            self.retry_base <= self.retry_max,
            "GPHOTOS_RETRY_BASE_MS ({:?}) exceeds GPHOTOS_RETRY_MAX_SECS ({:?})",
            self.retry_base,
            self.retry_max
        );
        url::Url::parse(&self.api_base_url)
            .with_context(|| format!("invalid GPHOTOS_API_BASE_URL: {}", self.api_base_url))?;
        Ok(())
    }

    /// Transport failures are retried with full-jitter backoff until `retry_max` elapses.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::Exponential(
            ExponentialRetryFactory::new(self.retry_base, self.retry_max)
                .with_retryable([ErrorKind::TransientTransport]),
        )
    }
}

fn default_storage_root(home: &Path) -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| home.to_path_buf())
        .join(DEFAULT_STORAGE_DIR_NAME)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> MirrorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MirrorConfig::from_lookup(|name| vars.get(name).cloned(), Path::new("/home/me"))
    }

    #[test]
    fn defaults_match_production_values() {
        let config = config_with(&[("GPHOTOS_STORAGE_ROOT", "/srv/photos")]);
        assert_eq!(config.storage_root, PathBuf::from("/srv/photos"));
        assert_eq!(
            config.database_path,
            PathBuf::from("/srv/photos/google_photos.sqlite3")
        );
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.token, None);
        assert_eq!(config.workers, 5);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.retry_base, Duration::from_secs(1));
        assert_eq!(config.retry_max, Duration::from_secs(30));
        config.validate().unwrap();
    }

    #[test]
    fn expands_home_in_paths() {
        let config = config_with(&[
            ("GPHOTOS_STORAGE_ROOT", "~/Pictures/Mirror"),
            ("GPHOTOS_DATABASE", "~"),
            ("GPHOTOS_TEMP_DIR", "/var/tmp/gphotos"),
        ]);
        assert_eq!(
            config.storage_root,
            PathBuf::from("/home/me/Pictures/Mirror")
        );
        assert_eq!(config.database_path, PathBuf::from("/home/me"));
        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/gphotos"));
    }

    #[test]
    fn zero_or_garbage_numbers_fall_back_to_defaults() {
        let config = config_with(&[
            ("GPHOTOS_WORKERS", "0"),
            ("GPHOTOS_PAGE_SIZE", "lots"),
            ("GPHOTOS_RETRY_BASE_MS", "250"),
        ]);
        assert_eq!(config.workers, 5);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.retry_base, Duration::from_millis(250));
    }

    #[test]
    fn rejects_page_and_batch_sizes_above_api_limits() {
        assert!(config_with(&[("GPHOTOS_PAGE_SIZE", "101")]).validate().is_err());
        assert!(config_with(&[("GPHOTOS_BATCH_SIZE", "51")]).validate().is_err());
        assert!(config_with(&[("GPHOTOS_BATCH_SIZE", "20")]).validate().is_ok());
    }

    #[test]
    fn rejects_invalid_api_base_url() {
        let config = config_with(&[("GPHOTOS_API_BASE_URL", "not a url")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_token_is_treated_as_missing() {
        assert_eq!(config_with(&[("GPHOTOS_TOKEN", "  ")]).token, None);
        assert_eq!(
            config_with(&[("GPHOTOS_TOKEN", "ya29.abc")]).token.as_deref(),
            Some("ya29.abc")
        );
    }
}
