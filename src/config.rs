use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    plugin::{DEFAULT_PLUGINS, Pipeline},
    pool::AdmissionPool,
    query::JoinPolicy,
};

pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Which [`DocStore`](crate::store::DocStore) backs the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Tantivy,
    Memory,
}

/// Runtime settings, read from `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainConfig {
    pub pool_size: usize,
    pub plugins: Vec<String>,
    pub join_policy: JoinPolicy,
    pub store: StoreKind,
    pub writer_memory_budget: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            plugins: DEFAULT_PLUGINS.iter().map(|s| s.to_string()).collect(),
            join_policy: JoinPolicy::default(),
            store: StoreKind::default(),
            writer_memory_budget: DEFAULT_WRITER_MEMORY_BUDGET,
        }
    }
}

impl ChainConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %path.display(),
                    "no config file, using defaults"
                );
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.pipeline()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_names(self.plugins.as_slice())
    }

    pub fn pool(&self) -> AdmissionPool {
        AdmissionPool::new(self.pool_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config =
            ChainConfig::load(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, ChainConfig::default());
        assert_eq!(config.pool_size, 10);
        assert_eq!(
            config.pipeline().unwrap().names(),
            vec!["docProcess", "headerImg", "subContent"]
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"poolSize": 2, "joinPolicy": "intersect", "store": "memory"}"#,
        )
        .unwrap();

        let config = ChainConfig::load(&path).unwrap();
        assert_eq!(config.join_policy, JoinPolicy::Intersect);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.pool().num(), 5);
        assert_eq!(config.writer_memory_budget, DEFAULT_WRITER_MEMORY_BUDGET);
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"plugins": ["docProcess", "nope"]}"#)
            .unwrap();
        assert!(matches!(
            ChainConfig::load(&path).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        let config = ChainConfig {
            plugins: vec!["subContent".into()],
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ChainConfig::load(&path).unwrap(), config);
    }
}
