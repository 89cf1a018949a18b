//! Running-mean maintenance of group centroids.
//!
//! The stored centroid is the raw arithmetic mean of member vectors. It is
//! never renormalized to unit length; cosine matching normalizes at
//! comparison time.

use crate::{ClusterError, ClusterResult};

/// `new[i] = (old[i] * old_count + v[i]) / (old_count + 1)`.
pub fn incremental_mean(old_centroid: &[f32], old_count: u32, new_vector: &[f32]) -> ClusterResult<Vec<f32>> {
    if old_centroid.len() != new_vector.len() {
        return Err(ClusterError::dimension_mismatch(
            old_centroid.len(),
            new_vector.len(),
            "centroid update",
        ));
    }
    let weight = old_count as f64;
    let next = weight + 1.0;
    Ok(old_centroid
        .iter()
        .zip(new_vector.iter())
        .map(|(old, new)| ((*old as f64 * weight + *new as f64) / next) as f32)
        .collect())
}
