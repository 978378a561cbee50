//! Utterance embeddings and per-intent centroids.
//!
//! Centroids are the normalised mean of each intent's seed-phrase
//! embeddings, computed once at startup.

use crate::catalog::seeds::seed_phrases;
use crate::ups::schema::IntentType;

pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic feature-hashing embedder over lowercase tokens and token
/// bigrams.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 512;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(16),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_end_matches('s').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);
        let mut add = |feature: &str, weight: f32| {
            let hash = fnv1a(feature.as_bytes());
            let index = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign * weight;
        };
        for token in &tokens {
            add(token, 1.0);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }
        normalize(vector)
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn normalize(v: Vec<f32>) -> Vec<f32> {
    let n = l2_norm(&v);
    if n > 0.0 {
        v.into_iter().map(|x| x / n).collect()
    } else {
        v
    }
}

/// Cosine similarity of two unit vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Normalised mean of `vectors`; `None` for an empty slice.
pub fn compute_centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    let mut acc = vec![0.0f32; dim];
    for v in vectors {
        for (slot, x) in acc.iter_mut().zip(normalize(v.clone())) {
            *slot += x;
        }
    }
    let n = vectors.len() as f32;
    for x in &mut acc {
        *x /= n;
    }
    Some(normalize(acc))
}

pub struct CentroidIndex {
    embedder: Box<dyn Embedder>,
    centroids: Vec<(IntentType, Vec<f32>)>,
}

impl CentroidIndex {
    /// Build centroids from the catalog seed phrases.
    pub fn from_seeds(embedder: Box<dyn Embedder>) -> Self {
        let centroids = IntentType::ALL
            .iter()
            .filter_map(|intent| {
                let vectors: Vec<Vec<f32>> = seed_phrases(*intent).iter().map(|p| embedder.embed(p)).collect();
                compute_centroid(&vectors).map(|c| (*intent, c))
            })
            .collect();
        Self { embedder, centroids }
    }

    /// Similarity of `text` to every centroid, clamped to `[0, 1]`, best
    /// first. Ties keep vocabulary order.
    pub fn similarities(&self, text: &str) -> Vec<(IntentType, f64)> {
        let query = self.embedder.embed(text);
        let mut scored: Vec<(IntentType, f64)> = self
            .centroids
            .iter()
            .map(|(intent, centroid)| (*intent, f64::from(cosine(&query, centroid)).clamp(0.0, 1.0)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }
}
