//! Reciprocal Rank Fusion for hybrid search.
//!
//! Score for an item = Σ 1/(k + rank + 1) over every list containing it,
//! with 0-indexed ranks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

pub const RRF_K: usize = 60;

/// Fuse ranked lists into one, keyed by `key`. The first occurrence of an
/// item is kept; ties are broken by first appearance.
pub fn rrf_fuse<T, K, F>(ranked_lists: Vec<Vec<T>>, key: F, k: usize, limit: usize) -> Vec<(T, f32)>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut scores: HashMap<K, usize> = HashMap::new();
    let mut fused: Vec<(T, f32)> = Vec::new();

    for list in ranked_lists {
        for (rank, item) in list.into_iter().enumerate() {
            let score = 1.0 / (k + rank + 1) as f32;
            let id = key(&item);
            match scores.get(&id) {
                Some(&slot) => fused[slot].1 += score,
                None => {
                    scores.insert(id, fused.len());
                    fused.push((item, score));
                }
            }
        }
    }

    // stable sort keeps first-appearance order for equal scores
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    fused.truncate(limit);
    fused
}
