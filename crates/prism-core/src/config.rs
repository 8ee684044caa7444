use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PrismError, Result};
use crate::types::WeightTable;

/// Top-level configuration for Prism.
///
/// Loaded from `~/.prism/config.toml` by default. Every section falls back to
/// its defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrismConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl PrismConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PrismConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Merge `overrides` into the `[search.weight_overrides]` of the file at
    /// `path` and write it back.
    ///
    /// The file is re-read rather than saved from memory, so runtime-only
    /// changes such as a command-line data directory are not persisted. A
    /// missing file starts from defaults.
    pub fn persist_weight_overrides(
        path: &Path,
        overrides: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let mut on_disk = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        on_disk
            .search
            .weight_overrides
            .extend(overrides.iter().map(|(name, weight)| (name.clone(), *weight)));
        on_disk.validate()?;
        on_disk.save(path)?;
        Ok(on_disk)
    }

    /// Reject values that would make the store unusable.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(PrismError::Config(
                "embedding.dimension must be greater than zero".to_string(),
            ));
        }
        if self.search.over_fetch_factor == 0 {
            return Err(PrismError::Config(
                "search.over_fetch_factor must be at least 1".to_string(),
            ));
        }
        if let Some((name, weight)) = self
            .search
            .weight_overrides
            .iter()
            .find(|(_, w)| !w.is_finite())
        {
            return Err(PrismError::Config(format!(
                "weight for '{}' is not a finite number: {}",
                name, weight
            )));
        }
        Ok(())
    }

    /// Data directory with a leading `~` expanded to the home directory.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }
}

/// Expand `~/` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the persisted vector store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.prism/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Embedding adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Length of every stored vector.
    pub dimension: usize,
    /// Embedding provider: "hashing" or "mock".
    pub provider: String,
    /// Most features the hashing provider memoises. Zero disables the memo.
    pub vocabulary_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 1024,
            provider: "hashing".to_string(),
            vocabulary_capacity: 65_536,
        }
    }
}

/// Search and fusion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of ranked entities returned when the caller does not say.
    pub default_top_k: usize,
    /// Per-dimension candidates fetched = `top_k * over_fetch_factor`.
    pub over_fetch_factor: usize,
    /// Subtracted from a hit's weighted score per rank position.
    pub position_penalty: f64,
    /// Added to an entity's final score per contributing dimension.
    pub dimension_bonus: f64,
    /// Dimension content shorter than this (in chars) is not stored.
    pub min_content_length: usize,
    /// Weights merged over the catalog defaults at startup.
    pub weight_overrides: BTreeMap<String, f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 9,
            over_fetch_factor: 3,
            position_penalty: 0.01,
            dimension_bonus: 0.1,
            min_content_length: 10,
            weight_overrides: BTreeMap::new(),
        }
    }
}

impl SearchConfig {
    /// Catalog weights with `weight_overrides` applied.
    pub fn weight_table(&self) -> WeightTable {
        let mut table = WeightTable::from_catalog();
        table.merge(&self.weight_overrides);
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = PrismConfig::default();
        assert_eq!(config.general.data_dir, "~/.prism/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.embedding.provider, "hashing");
        assert_eq!(config.search.default_top_k, 9);
        assert_eq!(config.search.over_fetch_factor, 3);
        assert!((config.search.position_penalty - 0.01).abs() < f64::EPSILON);
        assert!((config.search.dimension_bonus - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.search.min_content_length, 10);
        assert!(config.search.weight_overrides.is_empty());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = create_temp_config(
            r#"
[embedding]
dimension = 256

[search.weight_overrides]
semantic_tags = 1.5
"#,
        );

        let config = PrismConfig::load(file.path()).unwrap();
        assert_eq!(config.embedding.dimension, 256);
        assert_eq!(config.embedding.provider, "hashing");
        assert_eq!(config.search.default_top_k, 9);

        let weights = config.search.weight_table();
        assert!((weights.get("semantic_tags") - 1.5).abs() < f64::EPSILON);
        assert!((weights.get("technical_artistic") - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_persist_weight_overrides_keeps_other_settings_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut original = PrismConfig::default();
        original.general.data_dir = "/srv/prism".to_string();
        original.search.weight_overrides.insert("scene_context".to_string(), 0.8);
        original.save(&path).unwrap();

        let overrides: BTreeMap<String, f64> = [("semantic_tags".to_string(), 2.0)].into();
        PrismConfig::persist_weight_overrides(&path, &overrides).unwrap();

        let saved = PrismConfig::load(&path).unwrap();
        assert_eq!(saved.general.data_dir, "/srv/prism");
        assert_eq!(saved.search.weight_overrides.get("scene_context"), Some(&0.8));
        assert_eq!(saved.search.weight_overrides.get("semantic_tags"), Some(&2.0));
    }

    #[test]
    fn test_persist_weight_overrides_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let overrides: BTreeMap<String, f64> = [("colour_palette".to_string(), 0.5)].into();

        let written = PrismConfig::persist_weight_overrides(&path, &overrides).unwrap();
        assert_eq!(written.general.data_dir, GeneralConfig::default().data_dir);
        assert_eq!(
            PrismConfig::load(&path).unwrap().search.weight_table().get("colour_palette"),
            0.5
        );
    }

    #[test]
    fn test_load_rejects_zero_dimension() {
        let file = create_temp_config("[embedding]\ndimension = 0\n");
        let err = PrismConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, PrismError::Config(_)));
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is not [valid toml");
        assert!(PrismConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = PrismConfig::load_or_default(Path::new("/nonexistent/prism/config.toml"));
        assert_eq!(config.embedding.dimension, 1024);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = PrismConfig::default();
        config.general.log_level = "debug".to_string();
        config
            .search
            .weight_overrides
            .insert("scene_context".to_string(), 0.8);
        config.save(&path).unwrap();

        let loaded = PrismConfig::load(&path).unwrap();
        assert_eq!(loaded.general.log_level, "debug");
        assert_eq!(loaded.search.weight_overrides.get("scene_context"), Some(&0.8));
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/var/lib/prism"), PathBuf::from("/var/lib/prism"));
        assert_eq!(expand_home("relative/dir"), PathBuf::from("relative/dir"));
    }
}
