//! In-memory vector store with brute-force cosine similarity search.
//!
//! Every query scores every stored vector, O(N·D). That is fine for tens of
//! thousands of records; larger corpora should put an ANN index behind
//! [`SimilarityIndex`] instead. There is no secondary index by entity, so
//! entity-scoped lookups scan [`VectorStore::get_all`].

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use prism_core::error::{PrismError, Result};
use prism_core::types::{RecordMetadata, StoredRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::persistence;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// The id of the matching record.
    pub record_id: String,
    /// Cosine similarity mapped from [-1, 1] to [0, 1].
    pub similarity: f64,
    /// Metadata of the matching record.
    pub metadata: RecordMetadata,
}

/// Nearest-neighbour lookup over stored records.
///
/// The fusion path only needs this, so a different index can be swapped in
/// without touching ranking.
pub trait SimilarityIndex: Send + Sync {
    /// The `top_k` records most similar to `query` among those accepted by
    /// `filter`, best first.
    fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &dyn Fn(&RecordMetadata) -> bool,
    ) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Clone)]
struct VectorEntry {
    vector: Vec<f32>,
    metadata: RecordMetadata,
}

#[derive(Debug, Default)]
struct Entries {
    records: HashMap<String, VectorEntry>,
    next_sequence: u64,
}

/// Keyed vector storage plus brute-force similarity search.
///
/// Thread-safe via an interior `RwLock`: searches run concurrently, writes
/// are exclusive. Clones share the same underlying records.
#[derive(Debug, Clone)]
pub struct VectorStore {
    entries: Arc<RwLock<Entries>>,
    dimension: usize,
    path: Option<PathBuf>,
}

impl VectorStore {
    /// Create an empty, memory-only store for `dimension`-long vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
            dimension: dimension.max(1),
            path: None,
        }
    }

    /// Create an empty store that persists into `dir`. Nothing is read yet.
    pub fn with_path(dir: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            path: Some(dir.into()),
            ..Self::new(dimension)
        }
    }

    /// Create a store backed by `dir` and load whatever snapshot it holds.
    pub fn open(dir: impl Into<PathBuf>, dimension: usize) -> Result<Self> {
        let store = Self::with_path(dir, dimension);
        store.load()?;
        Ok(store)
    }

    /// The configured vector length.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Directory this store persists into, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|e| PrismError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|e| PrismError::Storage(format!("Lock poisoned: {}", e)))
    }

    /// Insert or overwrite a record.
    ///
    /// The vector is truncated or zero-padded to the configured dimension.
    /// Overwriting keeps the record's original insertion position.
    pub fn insert(
        &self,
        record_id: impl Into<String>,
        vector: Vec<f32>,
        mut metadata: RecordMetadata,
    ) -> Result<()> {
        let record_id = record_id.into();
        validate_vector(&vector)?;
        let vector = fit_to_dimension(vector, self.dimension);

        let mut entries = self.write()?;
        let existing = entries
            .records
            .get(&record_id)
            .map(|entry| entry.metadata.sequence);
        let sequence = match existing {
            Some(sequence) => sequence,
            None => {
                let next = entries.next_sequence;
                entries.next_sequence += 1;
                next
            }
        };
        metadata.sequence = sequence;
        let overwritten = entries
            .records
            .insert(record_id.clone(), VectorEntry { vector, metadata })
            .is_some();

        debug!(record_id = %record_id, overwritten, "Vector stored");
        Ok(())
    }

    /// Remove a record. Returns `false` if it was not present.
    pub fn delete(&self, record_id: &str) -> Result<bool> {
        let removed = self.write()?.records.remove(record_id).is_some();
        debug!(record_id, removed, "Vector delete");
        Ok(removed)
    }

    /// Fetch a single record by id.
    pub fn get(&self, record_id: &str) -> Result<Option<StoredRecord>> {
        Ok(self.read()?.records.get(record_id).map(|entry| StoredRecord {
            record_id: record_id.to_string(),
            vector: entry.vector.clone(),
            metadata: entry.metadata.clone(),
        }))
    }

    /// The `top_k` records most similar to `query`, best first.
    ///
    /// Similarity is `(cosine + 1) / 2`. Ties keep insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        self.search_where(query, top_k, |_| true)
    }

    /// Like [`search`](Self::search), restricted to records whose metadata
    /// passes `filter`.
    pub fn search_where<F>(&self, query: &[f32], top_k: usize, filter: F) -> Result<Vec<SearchHit>>
    where
        F: Fn(&RecordMetadata) -> bool,
    {
        self.search_filtered(query, top_k, None, filter)
    }

    /// The general form of every search: metadata filter plus an optional
    /// similarity floor in `[0, 1]`.
    pub fn search_filtered<F>(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: Option<f64>,
        filter: F,
    ) -> Result<Vec<SearchHit>>
    where
        F: Fn(&RecordMetadata) -> bool,
    {
        validate_vector(query)?;
        if let Some(floor) = min_similarity {
            if !floor.is_finite() {
                return Err(PrismError::InvalidInput(format!(
                    "minimum similarity must be a finite number, got {}",
                    floor
                )));
            }
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let floor = min_similarity.unwrap_or(f64::NEG_INFINITY);
        let query = fit_to_dimension(query.to_vec(), self.dimension);

        let entries = self.read()?;
        let mut scored: Vec<(f64, &String, &VectorEntry)> = entries
            .records
            .iter()
            .filter(|(_, entry)| filter(&entry.metadata))
            .map(|(id, entry)| (similarity(&query, &entry.vector), id, entry))
            .filter(|(score, _, _)| *score >= floor)
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.2.metadata.sequence.cmp(&b.2.metadata.sequence))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, id, entry)| SearchHit {
                record_id: id.clone(),
                similarity: score,
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    /// Every stored record, in insertion order.
    pub fn get_all(&self) -> Result<Vec<StoredRecord>> {
        let entries = self.read()?;
        let mut records: Vec<StoredRecord> = entries
            .records
            .iter()
            .map(|(id, entry)| StoredRecord {
                record_id: id.clone(),
                vector: entry.vector.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect();
        records.sort_by_key(|r| r.metadata.sequence);
        Ok(records)
    }

    /// `(record_id, metadata)` of every record whose metadata passes
    /// `filter`, in insertion order. Vectors are not copied.
    pub fn metadata_where<F>(&self, filter: F) -> Result<Vec<(String, RecordMetadata)>>
    where
        F: Fn(&RecordMetadata) -> bool,
    {
        let entries = self.read()?;
        let mut found: Vec<(String, RecordMetadata)> = entries
            .records
            .iter()
            .filter(|(_, entry)| filter(&entry.metadata))
            .map(|(id, entry)| (id.clone(), entry.metadata.clone()))
            .collect();
        found.sort_by_key(|(_, metadata)| metadata.sequence);
        Ok(found)
    }

    /// Distinct `dimension` names across all stored records.
    pub fn dimension_names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .read()?
            .records
            .values()
            .map(|entry| entry.metadata.dimension.clone())
            .collect())
    }

    /// Return the number of records currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.records.len()).unwrap_or(0)
    }

    /// Return true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the whole store to its directory.
    ///
    /// The in-memory records are unaffected whether or not this succeeds.
    pub fn save(&self) -> Result<()> {
        let dir = self.require_path()?;
        let entries = self.read()?;
        persistence::write_snapshot(
            dir,
            self.dimension,
            entries
                .records
                .iter()
                .map(|(id, entry)| (id.as_str(), entry.vector.as_slice(), &entry.metadata)),
        )
    }

    /// Replace the in-memory records with the snapshot on disk.
    ///
    /// A missing snapshot leaves the store empty. A damaged one is an error
    /// and also leaves the store empty.
    pub fn load(&self) -> Result<()> {
        let dir = self.require_path()?;
        let loaded = persistence::read_snapshot(dir, self.dimension);

        let mut entries = self.write()?;
        entries.records.clear();
        entries.next_sequence = 0;

        let mut records = match loaded {
            Ok(Some(records)) => records,
            Ok(None) => {
                info!(path = %dir.display(), "No saved vector store, starting empty");
                return Ok(());
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Vector store load failed");
                return Err(e);
            }
        };

        // Renumber so insertion order survives and new inserts sort last.
        records.sort_by(|a, b| {
            a.metadata
                .sequence
                .cmp(&b.metadata.sequence)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        for (sequence, record) in records.into_iter().enumerate() {
            let mut metadata = record.metadata;
            metadata.sequence = sequence as u64;
            entries.records.insert(
                record.record_id,
                VectorEntry {
                    vector: record.vector,
                    metadata,
                },
            );
        }
        entries.next_sequence = entries.records.len() as u64;

        info!(
            path = %dir.display(),
            records = entries.records.len(),
            "Vector store loaded"
        );
        Ok(())
    }

    /// Remove every record and, if persisted, the snapshot files.
    pub fn clear(&self) -> Result<()> {
        {
            let mut entries = self.write()?;
            entries.records.clear();
            entries.next_sequence = 0;
        }
        if let Some(dir) = self.path() {
            persistence::remove_snapshot(dir)?;
        }
        info!("Vector store cleared");
        Ok(())
    }

    fn require_path(&self) -> Result<&Path> {
        self.path().ok_or_else(|| {
            PrismError::Persistence("vector store has no storage directory".to_string())
        })
    }
}

impl SimilarityIndex for VectorStore {
    fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &dyn Fn(&RecordMetadata) -> bool,
    ) -> Result<Vec<SearchHit>> {
        self.search_where(query, top_k, filter)
    }
}

/// Reject vectors that cannot be stored or compared.
fn validate_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(PrismError::InvalidVector("vector is empty".to_string()));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(PrismError::InvalidVector(format!(
            "component {} is not finite ({})",
            pos, vector[pos]
        )));
    }
    Ok(())
}

/// Truncate or zero-pad `vector` to exactly `dimension` components.
pub fn fit_to_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() != dimension {
        debug!(from = vector.len(), to = dimension, "Vector length adjusted");
        vector.resize(dimension, 0.0);
    }
    vector
}

/// Cosine similarity mapped to [0, 1].
fn similarity(a: &[f32], b: &[f32]) -> f64 {
    ((cosine_similarity(a, b) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
