use std::cmp::Ordering;

use ndarray::ArrayView1;

use crate::core::errors::EngineError;

pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, EngineError> {
    if query.is_empty() || candidate.is_empty() {
        return Err(EngineError::Internal("Vectors must not be empty".to_string()));
    }
    if query.len() != candidate.len() {
        return Err(EngineError::Internal(format!(
            "Vector length mismatch: {} != {}",
            query.len(),
            candidate.len()
        )));
    }

    let query = ArrayView1::from(query);
    let candidate = ArrayView1::from(candidate);

    let dot = query.dot(&candidate);
    let denom = query.dot(&query).sqrt() * candidate.dot(&candidate).sqrt();
    if denom <= f32::EPSILON {
        return Ok(0.0);
    }

    Ok(dot / denom)
}

/// Indices of `candidates` with their scores, best first. Ties keep input order.
pub fn rank_descending_by_cosine(
    query: &[f32],
    candidates: &[Vec<f32>],
) -> Result<Vec<(usize, f32)>, EngineError> {
    let mut scores = Vec::with_capacity(candidates.len());
    for (idx, candidate) in candidates.iter().enumerate() {
        let score = cosine_similarity(query, candidate)?;
        scores.push((idx, score));
    }

    scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
    Ok(scores)
}
