//! Reciprocal Rank Fusion algorithm for combining search results

use ahash::AHashMap;

/// One entity after fusion, with the component scores it was built from
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub rrf_score: f32,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
}

/// Apply Reciprocal Rank Fusion to combine two ranked lists
///
/// RRF formula: score(id) = sum over the lists containing id of 1 / (k + rank),
/// with 1-based ranks. Both inputs must already be sorted best first.
///
/// The union keeps first-seen order (vector list, then keyword list) and the
/// final sort is stable, so identical inputs always give identical output.
pub fn reciprocal_rank_fusion(
    vector_results: &[(String, f32)],
    keyword_results: &[(String, f32)],
    k: f32,
) -> Vec<FusedHit> {
    let mut hits: Vec<FusedHit> = Vec::with_capacity(vector_results.len() + keyword_results.len());
    let mut position: AHashMap<&str, usize> = AHashMap::new();

    for (rank, (id, score)) in vector_results.iter().enumerate() {
        let contribution = 1.0 / (k + rank as f32 + 1.0);
        match position.get(id.as_str()) {
            Some(&i) => hits[i].rrf_score += contribution,
            None => {
                position.insert(id.as_str(), hits.len());
                hits.push(FusedHit {
                    id: id.clone(),
                    rrf_score: contribution,
                    vector_score: Some(*score),
                    keyword_score: None,
                });
            }
        }
    }

    for (rank, (id, score)) in keyword_results.iter().enumerate() {
        let contribution = 1.0 / (k + rank as f32 + 1.0);
        match position.get(id.as_str()) {
            Some(&i) => {
                hits[i].rrf_score += contribution;
                hits[i].keyword_score.get_or_insert(*score);
            }
            None => {
                position.insert(id.as_str(), hits.len());
                hits.push(FusedHit {
                    id: id.clone(),
                    rrf_score: contribution,
                    vector_score: None,
                    keyword_score: Some(*score),
                });
            }
        }
    }

    hits.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits
}
