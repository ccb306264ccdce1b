//! Descriptor matching — Euclidean distance over 128-dim embeddings.

use crate::types::{round2, FaceDescriptor};

/// Default accept/reject similarity threshold.
pub const MATCH_THRESHOLD: f32 = 0.7;

/// Informational boundary above which a match is reported as
/// high-confidence. Never changes accept/reject.
pub const HIGH_CONFIDENCE: f32 = 0.8;

/// Confidence tier reported alongside a match, for callers and
/// analytics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Standard,
}

impl ConfidenceTier {
    pub fn for_similarity(similarity: f32) -> Self {
        if similarity >= HIGH_CONFIDENCE {
            ConfidenceTier::High
        } else {
            ConfidenceTier::Standard
        }
    }
}

/// The selected best match from a candidate scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Index into the candidate slice.
    pub index: usize,
    /// Similarity in [0, 1], rounded to two decimals.
    pub similarity: f32,
}

/// Euclidean distance between two descriptors.
///
/// Infallible: [`FaceDescriptor`] enforces 128 dimensions at
/// construction, so both sides are always the same length.
pub fn distance(a: &FaceDescriptor, b: &FaceDescriptor) -> f32 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Similarity in [0, 1]: `max(0, 1 - distance)`, rounded to two
/// decimal places.
pub fn similarity(a: &FaceDescriptor, b: &FaceDescriptor) -> f32 {
    round2((1.0 - distance(a, b)).max(0.0))
}

/// Strategy for selecting the best enrolled candidate for a probe.
pub trait Matcher {
    fn best_match(
        &self,
        query: &FaceDescriptor,
        candidates: &[FaceDescriptor],
        threshold: f32,
    ) -> Option<Match>;
}

/// Euclidean-similarity matcher.
///
/// Scans every candidate; ties resolve to the lowest index scanned
/// first, so the result is deterministic across runs.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        query: &FaceDescriptor,
        candidates: &[FaceDescriptor],
        threshold: f32,
    ) -> Option<Match> {
        let mut best: Option<Match> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            let sim = similarity(query, candidate);
            // Strict > keeps the first-seen candidate on equal similarity.
            let better = match &best {
                None => true,
                Some(prev) => sim > prev.similarity,
            };
            if better {
                best = Some(Match {
                    index,
                    similarity: sim,
                });
            }
        }

        match best {
            Some(m) if m.similarity >= threshold => Some(m),
            _ => None,
        }
    }
}
