use std::{cmp::Ordering, collections::HashMap};

use common::storage::types::StoredObject;
use serde::{Deserialize, Serialize};

/// Optional subscores gathered from the lexical and vector stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Scores {
    pub text: Option<f32>,
    pub vector: Option<f32>,
}

/// An item with its stage scores and fused total.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub item: T,
    pub scores: Scores,
    pub fused: f32,
}

impl<T> Scored<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            scores: Scores::default(),
            fused: 0.0,
        }
    }

    pub const fn with_vector_score(mut self, score: f32) -> Self {
        self.scores.vector = Some(score);
        self
    }

    pub const fn with_text_score(mut self, score: f32) -> Self {
        self.scores.text = Some(score);
        self
    }
}

/// Weights used for linear score fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub text: f32,
    pub vector: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            text: 0.6,
            vector: 0.4,
        }
    }
}

impl FusionWeights {
    /// Negative or non-finite weights count as zero.
    pub fn sanitized(self) -> Self {
        let clean = |w: f32| if w.is_finite() { w.max(0.0) } else { 0.0 };
        Self {
            text: clean(self.text),
            vector: clean(self.vector),
        }
    }
}

pub fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Position score for `rank` (0-based) among `len` candidates: the top scores 1 and the
/// scores fall linearly towards 0.
pub fn rank_decay(rank: usize, len: usize) -> f32 {
    if len == 0 || rank >= len {
        return 0.0;
    }
    clamp_unit((len - rank) as f32 / len as f32)
}

/// Orders by raw score descending, ties by id ascending.
pub fn sort_by_score_desc<T, F>(items: &mut [Scored<T>], score: F)
where
    T: StoredObject,
    F: Fn(&Scored<T>) -> f32,
{
    items.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.get_id().cmp(b.item.get_id()))
    });
}

pub fn sort_by_fused_desc<T>(items: &mut [Scored<T>])
where
    T: StoredObject,
{
    sort_by_score_desc(items, |scored| scored.fused);
}

/// Fuses the two ranked lists. Each list is turned into position scores, weighted, and
/// summed per id; an item missing from one list gets nothing from it. Stage scores are
/// carried through as the breakdown.
pub fn fuse_ranked<T>(
    text_ranked: Vec<Scored<T>>,
    vector_ranked: Vec<Scored<T>>,
    weights: FusionWeights,
) -> Vec<Scored<T>>
where
    T: StoredObject + Clone,
{
    let weights = weights.sanitized();
    let mut merged: HashMap<String, Scored<T>> = HashMap::new();

    let text_len = text_ranked.len();
    for (rank, candidate) in text_ranked.into_iter().enumerate() {
        let entry = merged
            .entry(candidate.item.get_id().to_owned())
            .or_insert_with(|| Scored::new(candidate.item.clone()));
        entry.scores.text = candidate.scores.text;
        entry.fused += weights.text * rank_decay(rank, text_len);
    }

    let vector_len = vector_ranked.len();
    for (rank, candidate) in vector_ranked.into_iter().enumerate() {
        let entry = merged
            .entry(candidate.item.get_id().to_owned())
            .or_insert_with(|| Scored::new(candidate.item.clone()));
        entry.scores.vector = candidate.scores.vector;
        entry.fused += weights.vector * rank_decay(rank, vector_len);
    }

    let mut fused: Vec<Scored<T>> = merged.into_values().collect();
    sort_by_fused_desc(&mut fused);
    fused
}
