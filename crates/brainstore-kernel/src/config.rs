//! Configuration loading from `~/.brainstore/config.toml` with defaults.
//!
//! After the file is read, `BRAINSTORE_DATABASE_URL`, `BRAINSTORE_SCHEMA`
//! and `BRAINSTORE_VECTOR_DIM` override the matching `[store]` fields.

use crate::error::{KernelError, KernelResult};
use brainstore_types::config::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const ENV_DATABASE_URL: &str = "BRAINSTORE_DATABASE_URL";
pub const ENV_SCHEMA: &str = "BRAINSTORE_SCHEMA";
pub const ENV_VECTOR_DIM: &str = "BRAINSTORE_VECTOR_DIM";

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
    pub store: StoreConfig,
    pub embedding_cache: EmbeddingCacheConfig,
}

impl BrainConfig {
    /// Check the kernel settings, then the `[store]` section.
    pub fn validate(&self) -> KernelResult<()> {
        if let Err(e) = EnvFilter::try_new(&self.log_level) {
            return Err(KernelError::Config(format!(
                "invalid log_level '{}': {e}",
                self.log_level
            )));
        }
        if self.embedding_cache.ttl_secs > 0 && self.embedding_cache.max_entries == 0 {
            return Err(KernelError::Config(
                "embedding_cache.max_entries must be positive when ttl_secs is set".into(),
            ));
        }
        self.store.validate()?;
        Ok(())
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            store: StoreConfig::default(),
            embedding_cache: EmbeddingCacheConfig::default(),
        }
    }
}

/// Bounds for the query embedding cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingCacheConfig {
    /// Entry lifetime. Zero disables caching.
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 10_000,
        }
    }
}

impl EmbeddingCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// `~/.brainstore/config.toml`, or `./config.toml` without a home directory.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".brainstore"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.toml")
}

/// Load configuration from a TOML file, with defaults, then apply
/// environment overrides.
pub fn load_config(path: Option<&Path>) -> BrainConfig {
    let mut config = read_config_file(path);
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

fn read_config_file(path: Option<&Path>) -> BrainConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return BrainConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<BrainConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                BrainConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            BrainConfig::default()
        }
    }
}

/// Apply `BRAINSTORE_*` overrides read through `lookup`. Empty values are ignored.
pub fn apply_env_overrides(config: &mut BrainConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(ENV_DATABASE_URL) {
        config.store.database_url = url;
    }
    if let Some(schema) = get(ENV_SCHEMA) {
        config.store.schema = schema.trim().to_string();
    }
    if let Some(raw) = get(ENV_VECTOR_DIM) {
        match raw.trim().parse::<usize>() {
            Ok(dim) => config.store.vector_dim = dim,
            Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {ENV_VECTOR_DIM}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brainstore_types::search::FusionMode;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_config_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
log_level = "debug"
log_json = true

[store]
database_url = "postgres://brain@db/brain"
vector_dim = 768
include_news = true

[store.search]
fusion = "rrf"
rrf_k = 30

[embedding_cache]
ttl_secs = 60
"#
        )
        .unwrap();

        let config = read_config_file(Some(file.path()));
        assert_eq!(config.log_level, "debug");
        assert!(config.log_json);
        assert_eq!(config.store.vector_dim, 768);
        assert!(config.store.include_news);
        assert_eq!(config.store.schema, "brain");
        assert_eq!(config.store.search.fusion, FusionMode::Rrf);
        assert_eq!(config.store.search.rrf_k, 30);
        assert_eq!(config.store.search.candidate_k, 50);
        assert_eq!(config.embedding_cache.ttl_secs, 60);
        assert_eq!(config.embedding_cache.max_entries, 10_000);
    }

    fn valid() -> BrainConfig {
        let mut config = BrainConfig::default();
        config.store.database_url = "postgres://brain@db/brain".into();
        config
    }

    #[test]
    fn test_defaults_validate_once_url_is_set() {
        assert!(valid().validate().is_ok());
        assert!(matches!(
            BrainConfig::default().validate(),
            Err(KernelError::Store(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let config = BrainConfig {
            log_level: "brainstore=loud".into(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(KernelError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unbounded_cache() {
        let mut config = valid();
        config.embedding_cache.max_entries = 0;
        assert!(matches!(config.validate(), Err(KernelError::Config(_))));
        config.embedding_cache.ttl_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config_file(Some(&dir.path().join("absent.toml")));
        assert_eq!(config, BrainConfig::default());
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "log_level = [not toml").unwrap();
        let config = read_config_file(Some(file.path()));
        assert_eq!(config, BrainConfig::default());
    }

    #[test]
    fn test_env_overrides_store_fields() {
        let mut config = BrainConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                (ENV_DATABASE_URL, "postgres://env/brain"),
                (ENV_SCHEMA, " tenant_brain "),
                (ENV_VECTOR_DIM, "3072"),
            ]),
        );
        assert_eq!(config.store.database_url, "postgres://env/brain");
        assert_eq!(config.store.schema, "tenant_brain");
        assert_eq!(config.store.vector_dim, 3072);
    }

    #[test]
    fn test_invalid_or_empty_env_values_are_ignored() {
        let mut config = BrainConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[(ENV_VECTOR_DIM, "wide"), (ENV_SCHEMA, "  ")]),
        );
        assert_eq!(config.store.vector_dim, 1536);
        assert_eq!(config.store.schema, "brain");
    }

    #[test]
    fn test_default_path_is_under_brainstore_dir() {
        let path = default_config_path();
        assert!(path.ends_with(".brainstore/config.toml") || path.ends_with("config.toml"));
    }
}
