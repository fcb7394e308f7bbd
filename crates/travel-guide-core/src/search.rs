//! Brute-force similarity ranking.
//!
//! The vector store streams every persisted `(chunk_index, text, vector)`
//! row through [`top_k`]. Scores are cosine similarities; ordering is
//! score descending, then chunk index ascending, so equal scores always
//! come back in corpus order regardless of how the rows were read.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::models::RetrievedChunk;

/// A candidate row fed to [`top_k`].
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Rank `candidates` against `query_vec` and keep the best `k`.
///
/// Ranks in the result are 1-based.
pub fn top_k<I>(query_vec: &[f32], candidates: I, k: usize) -> Vec<RetrievedChunk>
where
    I: IntoIterator<Item = Candidate>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<RetrievedChunk> = candidates
        .into_iter()
        .map(|c| RetrievedChunk {
            rank: 0,
            chunk_index: c.chunk_index,
            score: cosine_similarity(query_vec, &c.vector),
            text: c.text,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    scored.truncate(k);

    for (i, hit) in scored.iter_mut().enumerate() {
        hit.rank = i + 1;
    }
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(i: usize, v: &[f32]) -> Candidate {
        Candidate {
            chunk_index: i,
            text: format!("chunk {}", i),
            vector: v.to_vec(),
        }
    }

    #[test]
    fn test_orders_by_similarity() {
        let hits = top_k(
            &[1.0, 0.0],
            vec![cand(0, &[0.0, 1.0]), cand(1, &[1.0, 0.1]), cand(2, &[1.0, 1.0])],
            2,
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 1);
        assert_eq!(hits[1].chunk_index, 2);
        assert_eq!((hits[0].rank, hits[1].rank), (1, 2));
    }

    #[test]
    fn test_ties_keep_corpus_order() {
        let hits = top_k(
            &[1.0, 0.0],
            vec![cand(7, &[2.0, 0.0]), cand(3, &[1.0, 0.0]), cand(5, &[3.0, 0.0])],
            3,
        );
        let order: Vec<usize> = hits.iter().map(|h| h.chunk_index).collect();
        assert_eq!(order, vec![3, 5, 7]);
    }

    #[test]
    fn test_k_larger_than_candidates() {
        let hits = top_k(&[1.0], vec![cand(0, &[1.0])], 10);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_zero_k() {
        assert!(top_k(&[1.0], vec![cand(0, &[1.0])], 0).is_empty());
    }
}
