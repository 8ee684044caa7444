//! CLI argument definitions for the Prism application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Prism - multi-dimensional vector store with fusion ranking.
#[derive(Parser, Debug)]
#[command(name = "prism", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the persisted vector store.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store per-dimension content for an entity.
    Store {
        /// Dimension content as `dimension=text`. Repeatable.
        #[arg(long = "content", value_parser = parse_content)]
        content: Vec<(String, String)>,
        /// JSON file holding a `{"dimension": "text"}` map.
        #[arg(long = "json")]
        json: Option<PathBuf>,
        /// Existing entity to update. A new id is generated if omitted.
        #[arg(long = "entity-id")]
        entity_id: Option<String>,
        /// Source location of the entity, e.g. an image path.
        #[arg(long = "path")]
        path: Option<String>,
    },
    /// Store many entities from a JSON array of
    /// `{"entity_id", "entity_path", "contents": {"dimension": "text"}}`.
    StoreBatch {
        #[arg(long = "json")]
        json: PathBuf,
    },
    /// Search across all dimensions and fuse the results.
    Search {
        query: String,
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
        /// Restrict to these dimensions (combined is always searched). Repeatable.
        #[arg(long = "dimension")]
        dimensions: Vec<String>,
    },
    /// Search a single dimension without fusion.
    SearchDimension {
        dimension: String,
        query: String,
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
        /// Drop hits scoring below this similarity (0 to 1).
        #[arg(long = "min-similarity")]
        min_similarity: Option<f64>,
    },
    /// Find entities similar to an existing one.
    Similar {
        entity_id: String,
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
    },
    /// Show every stored dimension of an entity.
    Show { entity_id: String },
    /// Remove an entity and all of its records.
    Remove { entity_id: String },
    /// Print store statistics.
    Stats,
    /// Print the weight table, or update it with `dimension=weight` pairs.
    Weights {
        #[arg(value_parser = parse_weight)]
        updates: Vec<(String, f64)>,
    },
    /// Remove every record and the persisted store.
    Clear,
}

impl Command {
    /// Whether the command changes the vector store and needs a save.
    ///
    /// `store-batch` saves on its own once the batch is done.
    pub fn mutates_store(&self) -> bool {
        matches!(self, Command::Store { .. } | Command::Remove { .. })
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PRISM_CONFIG env var > platform default (~/.prism/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PRISM_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > config file value.
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Returns `None` if not overridden.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".prism").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".prism").join("config.toml");
    }
    PathBuf::from("config.toml")
}

fn split_assignment(s: &str) -> Result<(&str, &str), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `dimension=value`, got `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing dimension name in `{}`", s));
    }
    Ok((key, value))
}

fn parse_content(s: &str) -> Result<(String, String), String> {
    let (dimension, text) = split_assignment(s)?;
    Ok((dimension.to_string(), text.to_string()))
}

fn parse_weight(s: &str) -> Result<(String, f64), String> {
    let (dimension, value) = split_assignment(s)?;
    let weight: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid weight `{}`: {}", value, e))?;
    if !weight.is_finite() {
        return Err(format!("weight for `{}` must be finite", dimension));
    }
    Ok((dimension.to_string(), weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_command() {
        let args = CliArgs::try_parse_from([
            "prism",
            "store",
            "--content",
            "scene_context=a quiet harbour at dawn",
            "--content",
            "semantic_tags=harbour, boats",
            "--entity-id",
            "img-1",
        ])
        .unwrap();

        match args.command {
            Command::Store {
                content, entity_id, ..
            } => {
                assert_eq!(content.len(), 2);
                assert_eq!(content[0].0, "scene_context");
                assert_eq!(content[1].1, "harbour, boats");
                assert_eq!(entity_id.as_deref(), Some("img-1"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_search_with_filters() {
        let args = CliArgs::try_parse_from([
            "prism",
            "search",
            "red bicycle",
            "-k",
            "3",
            "--dimension",
            "scene_context",
            "--data-dir",
            "/tmp/prism",
        ])
        .unwrap();

        assert_eq!(args.resolve_data_dir().as_deref(), Some("/tmp/prism"));
        match args.command {
            Command::Search {
                query,
                top_k,
                dimensions,
            } => {
                assert_eq!(query, "red bicycle");
                assert_eq!(top_k, Some(3));
                assert_eq!(dimensions, vec!["scene_context".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_search_dimension_threshold() {
        let args = CliArgs::try_parse_from([
            "prism",
            "search-dimension",
            "scene_context",
            "harbour",
            "--min-similarity",
            "0.6",
        ])
        .unwrap();

        match args.command {
            Command::SearchDimension {
                dimension,
                min_similarity,
                top_k,
                ..
            } => {
                assert_eq!(dimension, "scene_context");
                assert_eq!(min_similarity, Some(0.6));
                assert_eq!(top_k, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_store_batch() {
        let args =
            CliArgs::try_parse_from(["prism", "store-batch", "--json", "batch.json"]).unwrap();
        assert!(matches!(
            &args.command,
            Command::StoreBatch { json } if json == &PathBuf::from("batch.json")
        ));
        assert!(!args.command.mutates_store());
    }

    #[test]
    fn test_parse_weights() {
        assert_eq!(
            parse_weight("semantic_tags=1.5").unwrap(),
            ("semantic_tags".to_string(), 1.5)
        );
        assert!(parse_weight("semantic_tags").is_err());
        assert!(parse_weight("semantic_tags=heavy").is_err());
        assert!(parse_weight("semantic_tags=inf").is_err());
        assert!(parse_weight("=1.0").is_err());
    }

    #[test]
    fn test_content_keeps_equals_in_text() {
        assert_eq!(
            parse_content("technical_artistic=f/2.8, iso=200").unwrap(),
            (
                "technical_artistic".to_string(),
                "f/2.8, iso=200".to_string()
            )
        );
    }

    #[test]
    fn test_config_flag_wins() {
        let args =
            CliArgs::try_parse_from(["prism", "--config", "/etc/prism.toml", "stats"]).unwrap();
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/prism.toml"));
        assert!(!args.command.mutates_store());
    }
}
