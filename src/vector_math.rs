use crate::core::errors::RagError;

/// Cosine similarity clamped to [-1, 1]. Zero-norm and non-finite vectors score 0.
pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, RagError> {
    if query.is_empty() || candidate.is_empty() {
        return Err(RagError::InvalidArgument(
            "vectors must not be empty".to_string(),
        ));
    }
    if query.len() != candidate.len() {
        return Err(RagError::DimensionMismatch {
            expected: query.len(),
            actual: candidate.len(),
        });
    }

    let dot: f64 = query
        .iter()
        .zip(candidate.iter())
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let denom = l2_norm(query) * l2_norm(candidate);
    if denom <= f64::from(f32::EPSILON) {
        return Ok(0.0);
    }

    let score = dot / denom;
    if !score.is_finite() {
        return Ok(0.0);
    }
    Ok(score.clamp(-1.0, 1.0) as f32)
}

/// Scores every candidate and sorts by descending similarity.
///
/// The sort is stable, so candidates with equal scores keep their input order.
pub fn rank_descending_by_cosine(
    query: &[f32],
    candidates: &[&[f32]],
) -> Result<Vec<(usize, f32)>, RagError> {
    let mut scores = Vec::with_capacity(candidates.len());
    for (idx, candidate) in candidates.iter().enumerate() {
        let score = cosine_similarity(query, candidate)?;
        scores.push((idx, score));
    }

    scores.sort_by(|left, right| right.1.total_cmp(&left.1));
    Ok(scores)
}

fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    #[test]
    fn non_finite_components_score_zero_and_rank_last() {
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[f32::INFINITY, 1.0], &[1.0, 1.0]).unwrap(), 0.0);

        let poisoned = [f32::NAN, 0.0];
        let aligned = [1.0, 0.0];
        let opposite = [-1.0, 0.0];
        let candidates: [&[f32]; 3] = [&poisoned, &aligned, &opposite];
        let ranked = rank_descending_by_cosine(&[1.0, 0.0], &candidates).unwrap();
        let order: Vec<usize> = ranked.iter().map(|(idx, _)| *idx).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let vec = vec![1.0, 2.0, 3.0, 4.0];
        let score = cosine_similarity(&vec, &vec).expect("cosine should work");
        assert!(approx_eq(score, 1.0));
    }

    #[test]
    fn cosine_is_zero_for_orthogonal_vectors() {
        let score = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("cosine should work");
        assert!(approx_eq(score, 0.0));
    }

    #[test]
    fn cosine_is_minus_one_for_opposite_vectors() {
        let score = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]).unwrap();
        assert!(approx_eq(score, -1.0));
    }

    #[test]
    fn zero_vector_scores_zero() {
        let score = cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn ranking_returns_highest_similarity_first() {
        let query = vec![1.0, 0.0];
        let a = [0.8, 0.2];
        let b = [0.1, 0.9];
        let c = [0.9, 0.0];
        let ranked = rank_descending_by_cosine(&query, &[&a, &b, &c]).expect("ranking should work");

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, 2);
        assert_eq!(ranked[2].0, 1);
    }

    #[test]
    fn ranking_keeps_input_order_for_ties() {
        let query = [1.0, 0.0];
        let same = [2.0, 0.0];
        let ranked = rank_descending_by_cosine(&query, &[&same, &[0.0, 1.0], &same]).unwrap();

        assert_eq!(ranked[0].0, 0);
        assert_eq!(ranked[1].0, 2);
        assert_eq!(ranked[2].0, 1);
    }
}
