//! Entity-level facade over the embedder, vector store and fusion ranker.
//!
//! An entity is stored as one record per described dimension plus one
//! `combined` record holding every dimension's content, so that a whole-entity
//! match is always retrievable even when a search is restricted to a few
//! dimensions.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use prism_core::config::{PrismConfig, SearchConfig};
use prism_core::error::{PrismError, Result};
use prism_core::types::{
    display_name, record_id, RecordMetadata, StoredRecord, WeightTable,
    COMBINED_DIMENSION,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::{embedder_from_config, Embedder};
use crate::fusion::{DimensionHits, FusionHit, FusionRanker, RankedEntity};
use crate::store::{SearchHit, SimilarityIndex, VectorStore};

/// A dimension that was not stored, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedDimension {
    pub dimension: String,
    pub reason: String,
}

/// Result of storing an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOutcome {
    /// The supplied id, or a newly generated one.
    pub entity_id: String,
    /// Dimensions written, in the order they were supplied.
    pub stored: Vec<String>,
    pub skipped: Vec<SkippedDimension>,
    /// Dimensions, `combined` included, whose earlier record was deleted
    /// because the new content could not be stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleared: Vec<String>,
    /// Whether a combined record was written.
    pub combined: bool,
}

/// One entity of a batch passed to
/// [`MultiDimensionalStore::store_entities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityInput {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_path: Option<String>,
    pub contents: BTreeMap<String, String>,
}

/// What happened to one entity of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItem {
    Stored(StoreOutcome),
    Failed {
        entity_id: Option<String>,
        error: String,
    },
}

impl BatchItem {
    pub fn is_stored(&self) -> bool {
        matches!(self, BatchItem::Stored(_))
    }
}

/// Result of a batch store. `results` follows the input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
}

/// Result of removing an entity.
///
/// A non-empty `failed` list means the removal was partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub entity_id: String,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

impl RemovalReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Aggregate figures for one dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub display_name: String,
    pub count: usize,
    pub total_content_length: usize,
    pub avg_content_length: f64,
}

/// Aggregate figures for the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_vectors: usize,
    pub total_entities: usize,
    pub unique_dimensions: usize,
    pub per_dimension: BTreeMap<String, DimensionStats>,
}

/// Multi-dimensional entity store.
///
/// Uses dynamic dispatch (`Box<dyn Embedder>`) so production code can pick a
/// provider from configuration while tests use `MockEmbedding`.
pub struct MultiDimensionalStore {
    store: Arc<VectorStore>,
    embedder: Box<dyn Embedder>,
    ranker: FusionRanker,
    weights: RwLock<WeightTable>,
    over_fetch_factor: usize,
    min_content_length: usize,
}

impl MultiDimensionalStore {
    /// Create a facade with default search settings.
    pub fn new(store: Arc<VectorStore>, embedder: impl Embedder + 'static) -> Self {
        Self::new_dyn(store, Box::new(embedder))
    }

    /// Create a facade from a pre-boxed embedder.
    pub fn new_dyn(store: Arc<VectorStore>, embedder: Box<dyn Embedder>) -> Self {
        let defaults = SearchConfig::default();
        Self {
            store,
            embedder,
            ranker: FusionRanker::from_config(&defaults),
            weights: RwLock::new(WeightTable::from_catalog()),
            over_fetch_factor: defaults.over_fetch_factor,
            min_content_length: defaults.min_content_length,
        }
    }

    /// Apply `[search]` settings: ranker constants, over-fetch, minimum
    /// content length and weight overrides.
    pub fn with_search_config(mut self, config: &SearchConfig) -> Self {
        self.ranker = FusionRanker::from_config(config);
        self.over_fetch_factor = config.over_fetch_factor.max(1);
        self.min_content_length = config.min_content_length;
        self.weights = RwLock::new(config.weight_table());
        self
    }

    /// Build everything from configuration and load the persisted store from
    /// the configured data directory.
    pub fn from_config(config: &PrismConfig) -> Result<Self> {
        config.validate()?;
        let embedder = embedder_from_config(&config.embedding)?;
        let store = VectorStore::open(config.data_dir(), config.embedding.dimension)?;
        info!(
            data_dir = %config.data_dir().display(),
            records = store.len(),
            "Multi-dimensional store ready"
        );
        Ok(Self::new_dyn(Arc::new(store), embedder).with_search_config(&config.search))
    }

    /// The underlying vector store.
    pub fn vector_store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    fn read_weights(&self) -> Result<std::sync::RwLockReadGuard<'_, WeightTable>> {
        self.weights
            .read()
            .map_err(|e| PrismError::Storage(format!("Lock poisoned: {}", e)))
    }

    /// Snapshot of the live weight table.
    pub fn weights(&self) -> Result<WeightTable> {
        Ok(self.read_weights()?.clone())
    }

    /// Merge `updates` into the live weight table. Takes effect on the next
    /// search.
    pub fn update_weights(&self, updates: &BTreeMap<String, f64>) -> Result<()> {
        if let Some((name, weight)) = updates.iter().find(|(_, w)| !w.is_finite()) {
            return Err(PrismError::InvalidInput(format!(
                "weight for '{}' is not a finite number: {}",
                name, weight
            )));
        }
        let mut weights = self
            .weights
            .write()
            .map_err(|e| PrismError::Storage(format!("Lock poisoned: {}", e)))?;
        weights.merge(updates);
        info!(updated = updates.len(), "Dimension weights updated");
        Ok(())
    }

    /// Store an entity's per-dimension content. See [`store_entity_at`](Self::store_entity_at).
    pub fn store_entity(
        &self,
        entity_id: Option<&str>,
        contents: &BTreeMap<String, String>,
    ) -> Result<StoreOutcome> {
        self.store_entity_at(entity_id, None, contents)
    }

    /// Store an entity's per-dimension content, recording `entity_path` as
    /// its source location.
    ///
    /// Content is trimmed. Dimensions with empty content, or content shorter
    /// than the minimum length, are skipped and any record they previously
    /// had is deleted. Re-storing an entity overwrites the supplied
    /// dimensions and leaves the others alone.
    pub fn store_entity_at(
        &self,
        entity_id: Option<&str>,
        entity_path: Option<&str>,
        contents: &BTreeMap<String, String>,
    ) -> Result<StoreOutcome> {
        let entity_id = match entity_id {
            Some(id) if id.trim().is_empty() => {
                return Err(PrismError::InvalidInput("entity id is empty".to_string()))
            }
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let entity_path = entity_path.map(str::to_string);
        let weights = self.weights()?;

        let mut outcome = StoreOutcome {
            entity_id: entity_id.clone(),
            stored: Vec::new(),
            skipped: Vec::new(),
            cleared: Vec::new(),
            combined: false,
        };
        let mut parts: Vec<(&str, &str, f64)> = Vec::new();

        for (dimension, content) in contents {
            if dimension == COMBINED_DIMENSION {
                outcome.skipped.push(SkippedDimension {
                    dimension: dimension.clone(),
                    reason: "reserved dimension name".to_string(),
                });
                continue;
            }
            let content = content.trim();
            if content.is_empty() {
                debug!(entity_id = %entity_id, dimension = %dimension, "Skipping empty content");
                outcome.skipped.push(SkippedDimension {
                    dimension: dimension.clone(),
                    reason: "empty content".to_string(),
                });
                self.clear_stale(&entity_id, dimension, &mut outcome)?;
                continue;
            }

            let weight = weights.get(dimension);
            parts.push((dimension.as_str(), content, weight));

            let length = content.chars().count();
            if length < self.min_content_length {
                debug!(
                    entity_id = %entity_id,
                    dimension = %dimension,
                    length,
                    "Skipping short content"
                );
                outcome.skipped.push(SkippedDimension {
                    dimension: dimension.clone(),
                    reason: format!(
                        "content shorter than {} characters",
                        self.min_content_length
                    ),
                });
                self.clear_stale(&entity_id, dimension, &mut outcome)?;
                continue;
            }

            self.insert_record(&entity_id, dimension, content, weight, &entity_path)?;
            outcome.stored.push(dimension.clone());
        }

        match combined_content(&mut parts, &weights) {
            Some(combined) => {
                let weight = weights.get(COMBINED_DIMENSION);
                self.insert_record(
                    &entity_id,
                    COMBINED_DIMENSION,
                    &combined,
                    weight,
                    &entity_path,
                )?;
                outcome.combined = true;
            }
            None => {
                warn!(
                    entity_id = %entity_id,
                    "No content to combine; entity has no combined record"
                );
                self.clear_stale(&entity_id, COMBINED_DIMENSION, &mut outcome)?;
            }
        }

        info!(
            entity_id = %entity_id,
            stored = outcome.stored.len(),
            skipped = outcome.skipped.len(),
            cleared = outcome.cleared.len(),
            combined = outcome.combined,
            "Entity stored"
        );
        Ok(outcome)
    }

    /// Store many entities, continuing past the ones that fail.
    ///
    /// When the vector store is backed by a directory it is saved once after
    /// the whole batch; a failed save is returned as the error.
    pub fn store_entities(&self, items: &[EntityInput]) -> Result<BatchOutcome> {
        let mut batch = BatchOutcome {
            total: items.len(),
            ..Default::default()
        };

        for item in items {
            match self.store_entity_at(
                item.entity_id.as_deref(),
                item.entity_path.as_deref(),
                &item.contents,
            ) {
                Ok(outcome) => {
                    batch.succeeded += 1;
                    batch.results.push(BatchItem::Stored(outcome));
                }
                Err(e) => {
                    warn!(
                        entity_id = ?item.entity_id,
                        error = %e,
                        "Failed to store entity in batch"
                    );
                    batch.failed += 1;
                    batch.results.push(BatchItem::Failed {
                        entity_id: item.entity_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if self.store.path().is_some() {
            self.store.save()?;
        }
        info!(
            total = batch.total,
            succeeded = batch.succeeded,
            failed = batch.failed,
            "Batch stored"
        );
        Ok(batch)
    }

    /// Delete the existing record of a dimension that was just re-supplied
    /// without storable content, so it cannot outlive its replacement.
    fn clear_stale(
        &self,
        entity_id: &str,
        dimension: &str,
        outcome: &mut StoreOutcome,
    ) -> Result<()> {
        if self.store.delete(&record_id(entity_id, dimension))? {
            debug!(entity_id, dimension, "Stale record deleted");
            outcome.cleared.push(dimension.to_string());
        }
        Ok(())
    }

    fn insert_record(
        &self,
        entity_id: &str,
        dimension: &str,
        content: &str,
        weight: f64,
        entity_path: &Option<String>,
    ) -> Result<()> {
        let vector = self.embedder.embed(content)?;
        let metadata = RecordMetadata::new(entity_id, dimension, content, weight)
            .with_entity_path(entity_path.clone());
        self.store
            .insert(record_id(entity_id, dimension), vector, metadata)
    }

    /// Search every dimension and fuse the results into at most `top_k`
    /// entities.
    ///
    /// With `dimension_filter`, only those dimensions (and `combined`) are
    /// searched.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        dimension_filter: Option<&[String]>,
    ) -> Result<Vec<RankedEntity>> {
        let query = non_empty_query(query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query)?;
        let weights = self.weights()?;
        let fetch = top_k.saturating_mul(self.over_fetch_factor);

        let mut lists = Vec::new();
        for dimension in self.searchable_dimensions(&weights)? {
            if let Some(allowed) = dimension_filter {
                if dimension != COMBINED_DIMENSION && !allowed.contains(&dimension) {
                    continue;
                }
            }
            let hits = self.store.nearest(&query_vector, fetch, &|m: &RecordMetadata| {
                m.dimension == dimension
            })?;
            if hits.is_empty() {
                continue;
            }
            lists.push(DimensionHits::new(
                dimension,
                hits.into_iter().map(FusionHit::from).collect(),
            ));
        }

        let ranked = self
            .ranker
            .fuse(&lists, &weights, top_k, dimension_filter);
        debug!(
            query,
            dimensions = lists.len(),
            results = ranked.len(),
            "Fused search complete"
        );
        Ok(ranked)
    }

    /// Dimensions to search, in weight-table order, then `combined`, then any
    /// stored dimension the table does not know about.
    fn searchable_dimensions(&self, weights: &WeightTable) -> Result<Vec<String>> {
        let mut dimensions: Vec<String> = weights.iter().map(|(name, _)| name.to_string()).collect();
        dimensions.push(COMBINED_DIMENSION.to_string());

        let known: HashSet<String> = dimensions.iter().cloned().collect();
        dimensions.extend(
            self.store
                .dimension_names()?
                .into_iter()
                .filter(|name| !known.contains(name)),
        );
        Ok(dimensions)
    }

    /// Raw, unweighted top `top_k` hits within a single dimension, optionally
    /// dropping hits below `min_similarity`.
    pub fn search_within_dimension(
        &self,
        query: &str,
        dimension: &str,
        top_k: usize,
        min_similarity: Option<f64>,
    ) -> Result<Vec<SearchHit>> {
        let query = non_empty_query(query)?;
        let query_vector = self.embedder.embed(query)?;
        self.store
            .search_filtered(&query_vector, top_k, min_similarity, |m| {
                m.dimension == dimension
            })
    }

    /// Entities most similar to `entity_id`, using its combined description
    /// as the query. The entity itself is excluded. Unknown entities yield no
    /// results.
    pub fn search_similar(&self, entity_id: &str, top_k: usize) -> Result<Vec<RankedEntity>> {
        let Some(combined) = self.store.get(&record_id(entity_id, COMBINED_DIMENSION))? else {
            debug!(entity_id, "No combined record; nothing to compare against");
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut ranked = self.search(&combined.metadata.content, top_k + 1, None)?;
        ranked.retain(|entity| entity.entity_id != entity_id);
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Every dimension record of an entity, keyed by dimension, excluding
    /// `combined`. Unknown entities yield an empty map.
    pub fn get_entity(&self, entity_id: &str) -> Result<BTreeMap<String, StoredRecord>> {
        Ok(self
            .store
            .get_all()?
            .into_iter()
            .filter(|r| r.metadata.entity_id == entity_id && !r.metadata.is_combined())
            .map(|r| (r.metadata.dimension.clone(), r))
            .collect())
    }

    /// Delete every record owned by `entity_id`, including `combined`.
    ///
    /// Deletion continues past individual failures; those records are listed
    /// in [`RemovalReport::failed`].
    pub fn remove_entity(&self, entity_id: &str) -> Result<RemovalReport> {
        let owned = self.store.metadata_where(|m| m.entity_id == entity_id)?;
        let mut report = RemovalReport {
            entity_id: entity_id.to_string(),
            ..Default::default()
        };

        for (record_id, _) in owned {
            match self.store.delete(&record_id) {
                Ok(true) => report.removed.push(record_id),
                Ok(false) => debug!(record_id = %record_id, "Record already gone"),
                Err(e) => {
                    warn!(record_id = %record_id, error = %e, "Failed to delete record");
                    report.failed.push(record_id);
                }
            }
        }

        if report.is_complete() {
            info!(entity_id, removed = report.removed.len(), "Entity removed");
        } else {
            warn!(
                entity_id,
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Entity partially removed"
            );
        }
        Ok(report)
    }

    /// Counts and content lengths per dimension.
    pub fn statistics(&self) -> Result<StoreStatistics> {
        let records = self.store.metadata_where(|_| true)?;
        let mut entities: BTreeSet<&str> = BTreeSet::new();
        let mut per_dimension: BTreeMap<String, DimensionStats> = BTreeMap::new();

        for (_, metadata) in &records {
            entities.insert(&metadata.entity_id);
            let stats = per_dimension
                .entry(metadata.dimension.clone())
                .or_insert_with(|| DimensionStats {
                    display_name: display_name(&metadata.dimension).to_string(),
                    ..Default::default()
                });
            stats.count += 1;
            stats.total_content_length += metadata.content_length;
        }
        for stats in per_dimension.values_mut() {
            stats.avg_content_length = if stats.count == 0 {
                0.0
            } else {
                stats.total_content_length as f64 / stats.count as f64
            };
        }

        Ok(StoreStatistics {
            total_vectors: records.len(),
            total_entities: entities.len(),
            unique_dimensions: per_dimension.len(),
            per_dimension,
        })
    }

    /// Remove every record and the persisted snapshot.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    pub fn save(&self) -> Result<()> {
        self.store.save()
    }

    pub fn load(&self) -> Result<()> {
        self.store.load()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

fn non_empty_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(PrismError::InvalidInput("query text is empty".to_string()));
    }
    Ok(query)
}

/// Combined description: `"[Display Name] content"` parts joined by a blank
/// line, heaviest dimension first. Ties fall back to weight-table order, then
/// name.
fn combined_content(parts: &mut [(&str, &str, f64)], weights: &WeightTable) -> Option<String> {
    if parts.is_empty() {
        return None;
    }
    parts.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let pa = weights.position(a.0).unwrap_or(usize::MAX);
                let pb = weights.position(b.0).unwrap_or(usize::MAX);
                pa.cmp(&pb)
            })
            .then_with(|| a.0.cmp(b.0))
    });
    Some(
        parts
            .iter()
            .map(|(dimension, content, _)| format!("[{}] {}", display_name(dimension), content))
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}
