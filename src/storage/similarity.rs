//! Vector similarity helpers shared by the store and the search engine

use super::SimilarityFunction;
use ndarray::ArrayView1;

pub fn l2_norm(v: &[f32]) -> f32 {
    let view = ArrayView1::from(v);
    view.dot(&view).sqrt()
}

/// Similarity score, higher is closer. `None` when cosine is undefined.
pub fn score(function: SimilarityFunction, a: &[f32], b: &[f32]) -> Option<f32> {
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    match function {
        SimilarityFunction::Cosine => {
            let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
            if denom == 0.0 || !denom.is_finite() {
                None
            } else {
                Some(a.dot(&b) / denom)
            }
        }
        SimilarityFunction::Euclidean => {
            let diff = &a - &b;
            let distance = diff.dot(&diff).sqrt();
            Some(1.0 / (1.0 + distance))
        }
    }
}
