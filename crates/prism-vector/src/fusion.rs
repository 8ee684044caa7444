//! Fusion of per-dimension hit lists into one ranked list of entities.
//!
//! Each hit at rank `i` in dimension `d` contributes
//! `similarity * weight(d) - i * position_penalty`. Contributions are summed
//! per entity, and every contributing dimension adds `dimension_bonus` on
//! top, so an entity corroborated by several facets outranks one that
//! matches strongly in only one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use prism_core::config::SearchConfig;
use prism_core::types::{WeightTable, COMBINED_DIMENSION};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::SearchHit;

/// One hit as seen by the ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionHit {
    pub entity_id: String,
    pub entity_path: Option<String>,
    /// Similarity in [0, 1].
    pub similarity: f64,
    pub content: String,
}

impl From<SearchHit> for FusionHit {
    fn from(hit: SearchHit) -> Self {
        Self {
            entity_id: hit.metadata.entity_id,
            entity_path: hit.metadata.entity_path,
            similarity: hit.similarity,
            content: hit.metadata.content,
        }
    }
}

/// The ordered hit list of a single dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionHits {
    pub dimension: String,
    /// Best hit first.
    pub hits: Vec<FusionHit>,
}

impl DimensionHits {
    pub fn new(dimension: impl Into<String>, hits: Vec<FusionHit>) -> Self {
        Self {
            dimension: dimension.into(),
            hits,
        }
    }
}

/// An entity after fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntity {
    pub entity_id: String,
    pub entity_path: Option<String>,
    /// `total_score + dimension_count * dimension_bonus`; the sort key.
    pub final_score: f64,
    /// Sum of weighted scores across contributing hits.
    pub total_score: f64,
    /// Highest single weighted score.
    pub best_score: f64,
    /// Dimension that produced `best_score`.
    pub best_dimension: String,
    /// Content of the hit that produced `best_score`.
    pub best_content: String,
    pub dimension_count: usize,
    /// Weighted score per contributing dimension.
    pub dimension_scores: BTreeMap<String, f64>,
}

/// Weighted, position-penalised fusion ranker. Pure; holds no state beyond
/// its two constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionRanker {
    pub position_penalty: f64,
    pub dimension_bonus: f64,
}

impl Default for FusionRanker {
    fn default() -> Self {
        Self {
            position_penalty: 0.01,
            dimension_bonus: 0.1,
        }
    }
}

impl FusionRanker {
    pub fn new(position_penalty: f64, dimension_bonus: f64) -> Self {
        Self {
            position_penalty,
            dimension_bonus,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.position_penalty, config.dimension_bonus)
    }

    /// Fold `lists` into at most `top_k` ranked entities.
    ///
    /// With a `filter`, only the named dimensions and `combined` take part.
    /// Dimensions missing from `weights` weigh 1.0. Entities with equal final
    /// scores keep the order in which they were first encountered.
    pub fn fuse(
        &self,
        lists: &[DimensionHits],
        weights: &WeightTable,
        top_k: usize,
        filter: Option<&[String]>,
    ) -> Vec<RankedEntity> {
        if top_k == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<RankedEntity> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();

        for list in lists {
            if !participates(&list.dimension, filter) {
                debug!(dimension = %list.dimension, "Dimension excluded by filter");
                continue;
            }
            let weight = weights.get(&list.dimension);

            for (position, hit) in list.hits.iter().enumerate() {
                let weighted = hit.similarity * weight - position as f64 * self.position_penalty;

                match slots.get(&hit.entity_id) {
                    Some(&slot) => {
                        let entity = &mut ranked[slot];
                        entity.total_score += weighted;
                        entity.dimension_count += 1;
                        entity
                            .dimension_scores
                            .insert(list.dimension.clone(), weighted);
                        if weighted > entity.best_score {
                            entity.best_score = weighted;
                            entity.best_dimension = list.dimension.clone();
                            entity.best_content = hit.content.clone();
                        }
                        if entity.entity_path.is_none() {
                            entity.entity_path = hit.entity_path.clone();
                        }
                    }
                    None => {
                        slots.insert(hit.entity_id.clone(), ranked.len());
                        ranked.push(RankedEntity {
                            entity_id: hit.entity_id.clone(),
                            entity_path: hit.entity_path.clone(),
                            final_score: 0.0,
                            total_score: weighted,
                            best_score: weighted,
                            best_dimension: list.dimension.clone(),
                            best_content: hit.content.clone(),
                            dimension_count: 1,
                            dimension_scores: BTreeMap::from([(list.dimension.clone(), weighted)]),
                        });
                    }
                }
            }
        }

        for entity in &mut ranked {
            entity.final_score =
                entity.total_score + entity.dimension_count as f64 * self.dimension_bonus;
        }

        // Stable: equal scores keep first-encounter order.
        ranked.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(Ordering::Equal)
        });
        ranked.truncate(top_k);
        ranked
    }
}

fn participates(dimension: &str, filter: Option<&[String]>) -> bool {
    match filter {
        None => true,
        Some(_) if dimension == COMBINED_DIMENSION => true,
        Some(allowed) => allowed.iter().any(|d| d == dimension),
    }
}
