//! Embedding adapter trait and implementations.
//!
//! - `HashingEmbedder` turns text into a fixed-length bag of hashed word and
//!   character-trigram features. It needs no model files and produces the
//!   same vector for the same text in every process, so vectors persisted by
//!   one run stay comparable with queries embedded by the next.
//! - `MockEmbedding` provides deterministic hash-seeded unit vectors for tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use prism_core::config::EmbeddingConfig;
use prism_core::error::{PrismError, Result};
use tracing::{debug, info};

/// Converts text into a fixed-length vector.
///
/// Contract: the output length always equals [`Embedder::dimensions`], empty
/// or whitespace-only input yields the zero vector, and well-formed non-empty
/// text never fails.
pub trait Embedder: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the dimensionality of vectors produced by this embedder.
    fn dimensions(&self) -> usize;

    /// The provider name for diagnostics.
    fn name(&self) -> &str;
}

/// Build the embedder named by `config.provider`.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    let embedder: Box<dyn Embedder> = match config.provider.as_str() {
        "hashing" => Box::new(
            HashingEmbedder::new(config.dimension)
                .with_vocabulary_capacity(config.vocabulary_capacity),
        ),
        "mock" => Box::new(MockEmbedding::new(config.dimension)),
        other => {
            return Err(PrismError::Config(format!(
                "unknown embedding provider '{}'",
                other
            )))
        }
    };
    info!(
        provider = embedder.name(),
        dimensions = embedder.dimensions(),
        "Embedding provider ready"
    );
    Ok(embedder)
}

// ---------------------------------------------------------------------------
// HashingEmbedder
// ---------------------------------------------------------------------------

const WORD_FEATURE_WEIGHT: f32 = 1.0;
const TRIGRAM_FEATURE_WEIGHT: f32 = 0.5;

/// Features remembered by a [`HashingEmbedder`] before it stops adding more.
pub const DEFAULT_VOCABULARY_CAPACITY: usize = 65_536;

/// Feature-hashing embedder.
///
/// The first half of the vector counts lowercase word tokens, the second half
/// counts character trigrams within each word (words shorter than three
/// characters count as a single gram). Each CJK ideograph is a word of its
/// own. Slots come from a `blake3` hash of the feature, so they never depend
/// on which texts were seen first. The result is L2-normalised.
///
/// Slots of recently seen features are memoised in a vocabulary of at most
/// `vocabulary_capacity` entries. Once it is full, new features are hashed
/// on every call and only read locks are taken.
#[derive(Debug)]
pub struct HashingEmbedder {
    dimensions: usize,
    word_width: usize,
    vocabulary_capacity: usize,
    vocabulary: RwLock<HashMap<String, usize>>,
}

impl HashingEmbedder {
    /// Create an embedder producing `dimensions`-long vectors.
    ///
    /// A zero dimension is bumped to one.
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            word_width: dimensions.div_ceil(2),
            vocabulary_capacity: DEFAULT_VOCABULARY_CAPACITY,
            vocabulary: RwLock::new(HashMap::new()),
        }
    }

    /// Bound the vocabulary memo. Zero disables it.
    pub fn with_vocabulary_capacity(mut self, capacity: usize) -> Self {
        self.vocabulary_capacity = capacity;
        self
    }

    /// Number of features (words and trigrams) currently memoised.
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.read().map(|v| v.len()).unwrap_or(0)
    }

    fn slot(&self, feature: &str, offset: usize, width: usize) -> Result<usize> {
        let full = {
            let vocabulary = self
                .vocabulary
                .read()
                .map_err(|e| PrismError::Embedding(format!("Vocabulary lock poisoned: {}", e)))?;
            if let Some(&slot) = vocabulary.get(feature) {
                return Ok(slot);
            }
            vocabulary.len() >= self.vocabulary_capacity
        };

        let slot = offset + hashed_slot(feature, width);
        if full {
            return Ok(slot);
        }

        let mut vocabulary = self
            .vocabulary
            .write()
            .map_err(|e| PrismError::Embedding(format!("Vocabulary lock poisoned: {}", e)))?;
        // Another writer may have filled it since the read.
        if vocabulary.len() < self.vocabulary_capacity {
            vocabulary.insert(feature.to_string(), slot);
            if vocabulary.len() == self.vocabulary_capacity {
                info!(
                    capacity = self.vocabulary_capacity,
                    "Embedding vocabulary full; further features are hashed per call"
                );
            }
        }
        Ok(slot)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(vector);
        }

        let gram_width = self.dimensions - self.word_width;
        for token in &tokens {
            let slot = self.slot(&format!("w:{}", token), 0, self.word_width)?;
            vector[slot] += WORD_FEATURE_WEIGHT;

            if gram_width == 0 {
                continue;
            }
            for gram in trigrams(token) {
                let slot = self.slot(&format!("g:{}", gram), self.word_width, gram_width)?;
                vector[slot] += TRIGRAM_FEATURE_WEIGHT;
            }
        }

        l2_normalize(&mut vector);
        debug!(
            tokens = tokens.len(),
            vocabulary = self.vocabulary_size(),
            "Text embedded"
        );
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

fn hashed_slot(feature: &str, width: usize) -> usize {
    let hash = blake3::hash(feature.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % width as u64) as usize
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

/// Split text into lowercase word tokens. CJK ideographs become one token each.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn trigrams(token: &str) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 3 {
        return vec![token.to_string()];
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedder returning deterministic pseudo-random unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs while unrelated texts are close to
/// orthogonal.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }
        l2_normalize(&mut result);
        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Embedder for MockEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hashing_dimension_and_norm() {
        let embedder = HashingEmbedder::new(64);
        let vec = embedder.embed("a red bicycle leaning against a brick wall").unwrap();
        assert_eq!(vec.len(), 64);
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        for text in ["", "   ", "!!! ,,, ..."] {
            let vec = embedder.embed(text).unwrap();
            assert_eq!(vec.len(), 16);
            assert!(vec.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_hashing_deterministic_across_instances() {
        let a = HashingEmbedder::new(128);
        let b = HashingEmbedder::new(128);

        // Warm `b` with unrelated text first; slots must not depend on history.
        b.embed("a loud chaotic street festival").unwrap();

        let va = a.embed("calm, quiet afternoon").unwrap();
        let vb = b.embed("calm, quiet afternoon").unwrap();
        assert_eq!(va, vb);
    }

    #[test]
    fn test_hashing_shared_words_are_closer() {
        let embedder = HashingEmbedder::new(1024);
        let query = embedder.embed("bicycle").unwrap();
        let bike = embedder
            .embed("a red bicycle leaning against a brick wall")
            .unwrap();
        let festival = embedder.embed("a loud chaotic street festival").unwrap();

        assert!(dot(&query, &bike) > dot(&query, &festival));
    }

    #[test]
    fn test_hashing_is_case_insensitive() {
        let embedder = HashingEmbedder::new(256);
        assert_eq!(
            embedder.embed("Red Bicycle").unwrap(),
            embedder.embed("red bicycle").unwrap()
        );
    }

    #[test]
    fn test_hashing_vocabulary_grows_with_new_features() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.vocabulary_size(), 0);

        embedder.embed("cat").unwrap();
        let after_first = embedder.vocabulary_size();
        assert_eq!(after_first, 2); // w:cat, g:cat

        embedder.embed("cat").unwrap();
        assert_eq!(embedder.vocabulary_size(), after_first);
    }

    #[test]
    fn test_hashing_vocabulary_stays_within_capacity() {
        let embedder = HashingEmbedder::new(64).with_vocabulary_capacity(64);
        for i in 0..20_000 {
            embedder.embed(&format!("word{} other{}", i, i * 7)).unwrap();
        }
        assert_eq!(embedder.vocabulary_size(), 64);

        // Vectors do not depend on what the memo holds.
        let fresh = HashingEmbedder::new(64);
        for text in ["word19999 other139993", "a brand new phrase", "cat"] {
            assert_eq!(embedder.embed(text).unwrap(), fresh.embed(text).unwrap());
        }
    }

    #[test]
    fn test_hashing_without_vocabulary() {
        let embedder = HashingEmbedder::new(64).with_vocabulary_capacity(0);
        let vector = embedder.embed("red bicycle").unwrap();
        assert_eq!(embedder.vocabulary_size(), 0);
        assert_eq!(vector, HashingEmbedder::new(64).embed("red bicycle").unwrap());
    }

    #[test]
    fn test_tokenize_splits_cjk_ideographs() {
        assert_eq!(tokenize("可爱的猫"), vec!["可", "爱", "的", "猫"]);
        assert_eq!(tokenize("red猫 cat!"), vec!["red", "猫", "cat"]);
    }

    #[test]
    fn test_trigrams_short_and_long() {
        assert_eq!(trigrams("ab"), vec!["ab"]);
        assert_eq!(trigrams("wall"), vec!["wal", "all"]);
    }

    #[test]
    fn test_hashing_single_dimension() {
        let embedder = HashingEmbedder::new(1);
        let vec = embedder.embed("anything at all").unwrap();
        assert_eq!(vec, vec![1.0]);
    }

    #[test]
    fn test_mock_embedding_deterministic_and_distinct() {
        let service = MockEmbedding::new(384);
        let v1 = service.embed("same text").unwrap();
        let v2 = service.embed("same text").unwrap();
        let v3 = service.embed("other text").unwrap();
        assert_eq!(v1.len(), 384);
        assert_eq!(v1, v2);
        assert_ne!(v1, v3);
    }

    #[test]
    fn test_mock_embedding_empty_text() {
        let service = MockEmbedding::new(8);
        let vec = service.embed("").unwrap();
        assert_eq!(vec, vec![0.0; 8]);
    }

    #[test]
    fn test_embedder_from_config() {
        let mut config = EmbeddingConfig::default();
        let embedder = embedder_from_config(&config).unwrap();
        assert_eq!(embedder.name(), "hashing");
        assert_eq!(embedder.dimensions(), 1024);

        config.provider = "mock".to_string();
        config.dimension = 32;
        let embedder = embedder_from_config(&config).unwrap();
        assert_eq!(embedder.name(), "mock");
        assert_eq!(embedder.dimensions(), 32);

        config.provider = "cloud".to_string();
        assert!(matches!(
            embedder_from_config(&config),
            Err(PrismError::Config(_))
        ));
    }

    #[test]
    fn test_trait_object_safety() {
        fn _assert_object_safe(_: &dyn Embedder) {}
    }
}
