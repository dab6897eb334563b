use std::f64::consts::PI;

/// Dot product of two equal-length vectors.
pub fn dot(u: &[f32], v: &[f32]) -> f64 {
    u.iter().zip(v).map(|(a, b)| *a as f64 * *b as f64).sum()
}

/// L2-normalize in place. A zero vector is left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

/// Angular distance between unit vectors: `2·acos(⟨u,v⟩)/π`, in [0,1].
pub fn angular_distance(u: &[f32], v: &[f32]) -> f64 {
    let cos = dot(u, v).clamp(-1.0, 1.0);
    // acos of a cosine in [0,1] spans [0, π/2] for non-negative similarity;
    // negative cosines clamp the distance at 1.
    (2.0 * cos.acos() / PI).min(1.0)
}

/// Similarity convention used everywhere downstream of a distance:
/// `1 − d/2`, in [0.5, 1] for unit vectors (orthogonal → 0.5).
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 - distance / 2.0
}

/// Cosine similarity mapped through the angular-distance convention.
pub fn angular_similarity(u: &[f32], v: &[f32]) -> f64 {
    similarity_from_distance(angular_distance(u, v))
}
