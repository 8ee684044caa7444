//! Prism application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing (logs go to stderr, results to stdout as JSON)
//! 3. Open the persisted vector store behind the multi-dimensional facade
//! 4. Run one subcommand and save the store if it changed

mod cli;

use std::collections::BTreeMap;
use std::path::Path;

use clap::Parser;
use serde_json::{json, Value};

use prism_core::config::PrismConfig;
use prism_core::error::PrismError;
use prism_core::types::RecordMetadata;
use prism_vector::{EntityInput, MultiDimensionalStore};

use cli::{CliArgs, Command};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so its log level can apply.
    let config_file = args.resolve_config_path();
    let config_found = config_file.exists();
    let mut config = if config_found {
        PrismConfig::load(&config_file)?
    } else {
        PrismConfig::default()
    };
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    init_tracing(
        args.resolve_log_level()
            .as_deref()
            .unwrap_or(&config.general.log_level),
        args.log_level.is_some(),
    );
    tracing::info!("Starting Prism v{}", env!("CARGO_PKG_VERSION"));
    if config_found {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No configuration file, using defaults");
    }

    let store = MultiDimensionalStore::from_config(&config)?;

    let mutates = args.command.mutates_store();
    let output = run(args.command, &store, &config, &config_file)?;

    if mutates {
        store.save()?;
        tracing::info!(records = store.len(), "Vector store saved");
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Install the fmt subscriber on stderr.
///
/// An explicit `--log-level` wins; otherwise `RUST_LOG` is honoured before
/// the configured level.
fn init_tracing(level: &str, explicit: bool) {
    let filter = if explicit {
        tracing_subscriber::EnvFilter::new(level)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(
    command: Command,
    store: &MultiDimensionalStore,
    config: &PrismConfig,
    config_file: &Path,
) -> Result<Value, Box<dyn std::error::Error>> {
    let default_top_k = config.search.default_top_k;

    let output = match command {
        Command::Store {
            content,
            json,
            entity_id,
            path,
        } => {
            let mut contents: BTreeMap<String, String> = match json {
                Some(file) => serde_json::from_str(&std::fs::read_to_string(&file)?)?,
                None => BTreeMap::new(),
            };
            contents.extend(content);
            if contents.is_empty() {
                return Err(PrismError::InvalidInput(
                    "no content given; use --content dimension=text or --json FILE".to_string(),
                )
                .into());
            }
            let outcome =
                store.store_entity_at(entity_id.as_deref(), path.as_deref(), &contents)?;
            serde_json::to_value(outcome)?
        }
        Command::StoreBatch { json } => {
            let items: Vec<EntityInput> = serde_json::from_str(&std::fs::read_to_string(&json)?)?;
            serde_json::to_value(store.store_entities(&items)?)?
        }
        Command::Search {
            query,
            top_k,
            dimensions,
        } => {
            let filter = (!dimensions.is_empty()).then_some(dimensions.as_slice());
            let ranked = store.search(&query, top_k.unwrap_or(default_top_k), filter)?;
            serde_json::to_value(ranked)?
        }
        Command::SearchDimension {
            dimension,
            query,
            top_k,
            min_similarity,
        } => {
            let hits = store.search_within_dimension(
                &query,
                &dimension,
                top_k.unwrap_or(default_top_k),
                min_similarity,
            )?;
            serde_json::to_value(hits)?
        }
        Command::Similar { entity_id, top_k } => {
            let ranked = store.search_similar(&entity_id, top_k.unwrap_or(default_top_k))?;
            serde_json::to_value(ranked)?
        }
        Command::Show { entity_id } => {
            let dimensions: BTreeMap<String, RecordMetadata> = store
                .get_entity(&entity_id)?
                .into_iter()
                .map(|(dimension, record)| (dimension, record.metadata))
                .collect();
            json!({ "entity_id": entity_id, "dimensions": dimensions })
        }
        Command::Remove { entity_id } => {
            let report = store.remove_entity(&entity_id)?;
            if !report.is_complete() {
                tracing::warn!(failed = ?report.failed, "Some records could not be removed");
            }
            serde_json::to_value(report)?
        }
        Command::Stats => serde_json::to_value(store.statistics()?)?,
        Command::Weights { updates } => {
            if !updates.is_empty() {
                let updates: BTreeMap<String, f64> = updates.into_iter().collect();
                store.update_weights(&updates)?;
                PrismConfig::persist_weight_overrides(config_file, &updates)?;
            }
            serde_json::to_value(store.weights()?.to_map())?
        }
        Command::Clear => {
            let removed = store.len();
            store.clear()?;
            json!({ "cleared": removed })
        }
    };

    Ok(output)
}
