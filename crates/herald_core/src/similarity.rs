//! Cosine matching of an embedding against candidate group centroids.

use serde::{Deserialize, Serialize};

use crate::{Group, GroupId};

pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum()
}

pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|x| *x as f64 * *x as f64)
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity in [-1, 1]. Zero-norm inputs score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub group_id: GroupId,
    pub score: f64,
    pub matched: bool,
}

/// Pick the most similar candidate; `matched` is `score >= threshold`.
///
/// Equal scores resolve to the smaller group id. Candidates whose centroid
/// dimension differs from `vector` are not comparable and are ignored.
/// Returns `None` when nothing is comparable, which callers treat as no match.
pub fn best_match<'a, I>(vector: &[f32], candidates: I, threshold: f64) -> Option<MatchOutcome>
where
    I: IntoIterator<Item = &'a Group>,
{
    let mut best: Option<(GroupId, f64)> = None;
    for group in candidates {
        if group.centroid.len() != vector.len() {
            continue;
        }
        let score = cosine_similarity(vector, &group.centroid);
        best = match best {
            None => Some((group.id, score)),
            Some((best_id, best_score)) => {
                if score > best_score || (score == best_score && group.id < best_id) {
                    Some((group.id, score))
                } else {
                    Some((best_id, best_score))
                }
            }
        };
    }
    best.map(|(group_id, score)| MatchOutcome {
        group_id,
        score,
        matched: score >= threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GroupStatus, Timestamp};

    fn group(centroid: Vec<f32>) -> Group {
        let now = Timestamp::now();
        Group {
            id: GroupId::new(),
            centroid,
            member_count: 1,
            status: GroupStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cosine_matches_known_values() {
        assert!((cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-12);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.99, 0.14, 0.0]);
        assert!((sim - 0.990_148).abs() < 1e-5, "sim = {sim}");
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn empty_candidates_never_match() {
        let candidates: Vec<Group> = Vec::new();
        assert!(best_match(&[1.0, 0.0], &candidates, 0.1).is_none());
    }

    #[test]
    fn picks_highest_score() {
        let near = group(vec![1.0, 0.1]);
        let far = group(vec![0.0, 1.0]);
        let candidates = vec![far.clone(), near.clone()];
        let outcome = best_match(&[1.0, 0.0], &candidates, 0.9).expect("outcome");
        assert_eq!(outcome.group_id, near.id);
        assert!(outcome.matched);
    }

    #[test]
    fn threshold_is_inclusive() {
        let candidate = group(vec![1.0, 1.0]);
        let vector = [1.0, 0.0];
        let exact = cosine_similarity(&vector, &candidate.centroid);
        let candidates = vec![candidate];
        let outcome = best_match(&vector, &candidates, exact).expect("outcome");
        assert!(outcome.matched);
        let outcome = best_match(&vector, &candidates, exact + 1e-9).expect("outcome");
        assert!(!outcome.matched);
    }

    #[test]
    fn ties_prefer_smaller_group_id() {
        let first = group(vec![0.0, 2.0]);
        let second = group(vec![0.0, 1.0]);
        assert!(first.id < second.id);
        let candidates = vec![second.clone(), first.clone()];
        let outcome = best_match(&[0.0, 5.0], &candidates, 0.5).expect("outcome");
        assert_eq!(outcome.group_id, first.id);
        assert_eq!(outcome.score, 1.0);
    }

    #[test]
    fn mismatched_dimensions_are_ignored() {
        let candidates = vec![group(vec![1.0, 0.0, 0.0])];
        assert!(best_match(&[1.0, 0.0], &candidates, 0.0).is_none());
    }
}
