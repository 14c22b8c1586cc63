use crate::error::{Result, SemanticAeError};
use candle_core::Tensor;
use std::collections::BTreeMap;

/// The real patch closest to one prototype
#[derive(Clone, Debug)]
pub struct NearestPatch {
    pub image_idx: usize,
    pub patch_idx: usize,
    /// Euclidean distance between the prototype and `embedding` at
    /// search time
    pub distance: f32,
    /// raw `D`-dim patch embedding
    pub embedding: Tensor,
}

/// Result of one search pass: prototype index -> nearest patch, or
/// `None` when no image in the data carried that attribute.
#[derive(Clone, Debug, Default)]
pub struct NearestPatchRecord {
    entries: BTreeMap<usize, Option<NearestPatch>>,
}

impl NearestPatchRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, prototype: usize, nearest: Option<NearestPatch>) {
        self.entries.insert(prototype, nearest);
    }

    /// nearest patch for `prototype`, or `EmptyCandidateSet`
    pub fn get(&self, prototype: usize) -> Result<&NearestPatch> {
        self.entries
            .get(&prototype)
            .and_then(|x| x.as_ref())
            .ok_or(SemanticAeError::EmptyCandidateSet { prototype })
    }

    /// prototypes that found a patch, in increasing index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &NearestPatch)> {
        self.entries
            .iter()
            .filter_map(|(&k, x)| x.as_ref().map(|x| (k, x)))
    }

    /// prototypes without any candidate patch
    pub fn empty_prototypes(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|(_, x)| x.is_none())
            .map(|(&k, _)| k)
            .collect()
    }

    pub fn num_found(&self) -> usize {
        self.entries.values().filter(|x| x.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Row of `candidates_md` nearest to `prototype_d` in L2 distance.
/// Ties go to the earliest row.
///
/// # Returns `(row, distance)`
pub fn nearest_row(prototype_d: &Tensor, candidates_md: &Tensor) -> Result<Option<(usize, f32)>> {
    if candidates_md.dim(0)? == 0 {
        return Ok(None);
    }

    let dist_m: Vec<f32> = candidates_md
        .broadcast_sub(&prototype_d.unsqueeze(0)?)?
        .sqr()?
        .sum(1)?
        .sqrt()?
        .to_vec1()?;

    Ok(dist_m
        .into_iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (j, d)| match best {
            Some((_, b)) if b <= d || d.is_nan() => best,
            _ => Some((j, d)),
        }))
}
