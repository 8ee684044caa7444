use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Dimension catalog
// =============================================================================

/// Reserved dimension holding the synthesized whole-entity description.
///
/// Always eligible for retrieval, regardless of dimension filters.
pub const COMBINED_DIMENSION: &str = "combined";

/// Display name of the [`COMBINED_DIMENSION`].
pub const COMBINED_DISPLAY_NAME: &str = "Combined Description";

/// Weight applied to dimensions missing from a [`WeightTable`].
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// One entry of the fixed dimension catalog.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DimensionSpec {
    /// Machine name, used as the `dimension` field of stored records.
    pub name: &'static str,
    /// Human-readable label.
    pub display_name: &'static str,
    /// Relative importance used by fusion ranking.
    pub default_weight: f64,
}

const CATALOG: [DimensionSpec; 6] = [
    DimensionSpec {
        name: "basic_visual_description",
        display_name: "Basic Visual Description",
        default_weight: 1.0,
    },
    DimensionSpec {
        name: "person_identification",
        display_name: "Person Identification",
        default_weight: 1.2,
    },
    DimensionSpec {
        name: "emotion_atmosphere",
        display_name: "Emotion & Atmosphere",
        default_weight: 0.9,
    },
    DimensionSpec {
        name: "scene_context",
        display_name: "Scene Context",
        default_weight: 1.0,
    },
    DimensionSpec {
        name: "technical_artistic",
        display_name: "Technical & Artistic",
        default_weight: 0.7,
    },
    DimensionSpec {
        name: "semantic_tags",
        display_name: "Semantic Tags",
        default_weight: 1.1,
    },
];

/// The fixed catalog of describable dimensions, in canonical order.
pub fn dimension_catalog() -> &'static [DimensionSpec] {
    &CATALOG
}

/// Display name for a dimension. Unknown names display as themselves.
pub fn display_name(dimension: &str) -> &str {
    if dimension == COMBINED_DIMENSION {
        return COMBINED_DISPLAY_NAME;
    }
    CATALOG
        .iter()
        .find(|spec| spec.name == dimension)
        .map(|spec| spec.display_name)
        .unwrap_or(dimension)
}

// =============================================================================
// Weight table
// =============================================================================

/// Live per-dimension weights used by fusion ranking.
///
/// Keeps insertion order (catalog first, then names added later) so that
/// anything iterating the table does so deterministically.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    entries: Vec<(String, f64)>,
}

impl WeightTable {
    /// Table seeded from the catalog's default weights.
    pub fn from_catalog() -> Self {
        Self {
            entries: CATALOG
                .iter()
                .map(|spec| (spec.name.to_string(), spec.default_weight))
                .collect(),
        }
    }

    /// Weight for `dimension`, or [`DEFAULT_WEIGHT`] if it has none.
    pub fn get(&self, dimension: &str) -> f64 {
        self.entries
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, weight)| *weight)
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// Set a single weight, appending the dimension if it is new.
    pub fn set(&mut self, dimension: &str, weight: f64) {
        match self.entries.iter_mut().find(|(name, _)| name == dimension) {
            Some(entry) => entry.1 = weight,
            None => self.entries.push((dimension.to_string(), weight)),
        }
    }

    /// Merge `weights` into the table: existing entries are overwritten,
    /// new ones appended in the iteration order of `weights`.
    pub fn merge<'a, I>(&mut self, weights: I)
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        for (dimension, weight) in weights {
            self.set(dimension, *weight);
        }
    }

    /// Position of a dimension in the table. Catalog dimensions come first,
    /// in catalog order.
    pub fn position(&self, dimension: &str) -> Option<usize> {
        self.entries.iter().position(|(name, _)| name == dimension)
    }

    /// Iterate `(dimension, weight)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, weight)| (name.as_str(), *weight))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot as a sorted map, for display and serialization.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::from_catalog()
    }
}

// =============================================================================
// Records
// =============================================================================

/// Derive the record id for an `(entity, dimension)` pair.
///
/// Re-storing the same pair yields the same id, so the store overwrites
/// instead of duplicating.
pub fn record_id(entity_id: &str, dimension: &str) -> String {
    format!("{}_{}", entity_id, dimension)
}

/// Typed metadata persisted next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Owning entity.
    pub entity_id: String,
    /// Source location of the entity (e.g. an image path), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_path: Option<String>,
    /// Facet name, or [`COMBINED_DIMENSION`].
    pub dimension: String,
    /// Human-readable facet label.
    pub display_name: String,
    /// The text that was embedded.
    pub content: String,
    /// Length of `content` in characters.
    pub content_length: usize,
    /// Weight of the dimension at store time.
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    /// Insertion order, assigned by the store on first insert and kept on
    /// overwrite. Used to break similarity ties.
    #[serde(default)]
    pub sequence: u64,
}

impl RecordMetadata {
    /// Build metadata for `content` in `dimension`, stamped now.
    pub fn new(
        entity_id: impl Into<String>,
        dimension: impl Into<String>,
        content: impl Into<String>,
        weight: f64,
    ) -> Self {
        let dimension = dimension.into();
        let content = content.into();
        Self {
            entity_id: entity_id.into(),
            entity_path: None,
            display_name: display_name(&dimension).to_string(),
            content_length: content.chars().count(),
            dimension,
            content,
            weight,
            created_at: Utc::now(),
            sequence: 0,
        }
    }

    /// Attach the entity's source path.
    pub fn with_entity_path(mut self, path: Option<String>) -> Self {
        self.entity_path = path;
        self
    }

    pub fn is_combined(&self) -> bool {
        self.dimension == COMBINED_DIMENSION
    }
}

/// A vector plus its metadata, as held by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}
