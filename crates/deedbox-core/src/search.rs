//! Ranking and per-document grouping of vector search hits.
//!
//! The ordering used everywhere in retrieval is: score descending, then
//! `document_path` ascending, then `chunk_index` ascending. Stores only need
//! to produce candidates; [`rank_top_k`] applies the ordering and the bound.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::{document_name, DocumentRef, ScoredChunk, SearchResult};

/// Reject `top_k` values outside `1..=max_top_k`.
pub fn validate_top_k(top_k: usize, max_top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(Error::Config("top_k must be a positive integer".into()));
    }
    if top_k > max_top_k {
        return Err(Error::Config(format!(
            "top_k ({}) exceeds the maximum of {}",
            top_k, max_top_k
        )));
    }
    Ok(())
}

/// Total order over scored chunks used for ranking.
pub fn compare_hits(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.document_path.cmp(&b.document_path))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
}

/// Sort candidates and keep the best `top_k`.
///
/// Returns every candidate when fewer than `top_k` exist.
pub fn rank_top_k(mut candidates: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(compare_hits);
    candidates.truncate(top_k);
    candidates
}

/// Collapse ranked chunk hits into one result per document.
///
/// Each document keeps its best-scoring chunk as the content snippet and
/// that chunk's score. Results follow the ranking order of those chunks.
pub fn group_by_document(hits: &[ScoredChunk]) -> Vec<SearchResult> {
    let mut ranked: Vec<&ScoredChunk> = hits.iter().collect();
    ranked.sort_by(|a, b| compare_hits(a, b));

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for hit in ranked {
        if !seen.insert(hit.document_path.as_str()) {
            continue;
        }
        results.push(SearchResult {
            document: DocumentRef {
                name: document_name(&hit.document_path).to_string(),
                path: hit.document_path.clone(),
                content: hit.text.clone(),
            },
            score: hit.score,
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, index: usize, score: f32) -> ScoredChunk {
        ScoredChunk {
            document_path: path.to_string(),
            chunk_index: index,
            text: format!("{}#{}", path, index),
            score,
        }
    }

    #[test]
    fn test_validate_top_k() {
        assert!(validate_top_k(1, 50).is_ok());
        assert!(validate_top_k(50, 50).is_ok());
        assert!(matches!(validate_top_k(0, 50), Err(Error::Config(_))));
        assert!(matches!(validate_top_k(51, 50), Err(Error::Config(_))));
    }

    #[test]
    fn test_rank_orders_and_bounds() {
        let ranked = rank_top_k(
            vec![hit("a.txt", 0, 0.1), hit("b.txt", 0, 0.9), hit("c.txt", 0, 0.5)],
            2,
        );
        let paths: Vec<&str> = ranked.iter().map(|h| h.document_path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "c.txt"]);
    }

    #[test]
    fn test_rank_tie_breaks_by_path_then_index() {
        let ranked = rank_top_k(
            vec![
                hit("b.txt", 1, 0.5),
                hit("a.txt", 2, 0.5),
                hit("b.txt", 0, 0.5),
                hit("a.txt", 1, 0.5),
            ],
            10,
        );
        let keys: Vec<(&str, usize)> = ranked
            .iter()
            .map(|h| (h.document_path.as_str(), h.chunk_index))
            .collect();
        assert_eq!(
            keys,
            vec![("a.txt", 1), ("a.txt", 2), ("b.txt", 0), ("b.txt", 1)]
        );
    }

    #[test]
    fn test_rank_fewer_than_top_k() {
        let ranked = rank_top_k(vec![hit("a.txt", 0, 0.3)], 5);
        assert_eq!(ranked.len(), 1);
        assert!(rank_top_k(Vec::new(), 5).is_empty());
    }

    #[test]
    fn test_group_keeps_best_chunk_per_document() {
        let results = group_by_document(&[
            hit("leases/unit5.txt", 0, 0.4),
            hit("sales/house.pdf", 3, 0.8),
            hit("leases/unit5.txt", 2, 0.7),
        ]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.path, "sales/house.pdf");
        assert_eq!(results[0].document.name, "house.pdf");
        assert_eq!(results[1].document.path, "leases/unit5.txt");
        assert_eq!(results[1].document.content, "leases/unit5.txt#2");
        assert!((results[1].score - 0.7).abs() < 1e-6);
    }
}
