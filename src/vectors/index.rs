//! Brute-force cosine ranking over stored records.
//!
//! Every record is scored; a bounded heap keeps the best `k`.
//! Output is ordered by similarity (highest first), ties broken by the
//! lower key so earlier inserts rank first.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};

use serde::Serialize;

use crate::vectors::Record;

/// One ranked hit.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Key of the matched record
    pub key: u64,
    /// Display label of the matched record
    pub content: String,
    pub tags: BTreeSet<String>,
    /// Cosine similarity (-1.0 to 1.0)
    pub similarity: f32,
}

/// Optional narrowing applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Records must carry every one of these tags
    pub tags: BTreeSet<String>,
    /// Drop hits below this similarity
    pub min_similarity: Option<f32>,
}

impl SearchFilter {
    fn accepts_record(&self, record: &Record) -> bool {
        self.tags.iter().all(|tag| record.tags.contains(tag))
    }

    fn accepts_score(&self, similarity: f32) -> bool {
        self.min_similarity
            .map(|min| similarity >= min)
            .unwrap_or(true)
    }
}

/// Errors that can occur during ranking.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("Query vector is empty")]
    EmptyQuery,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Rank `records` against `query` and return the best `k`.
///
/// `dimensions` is the store's established D, if any. A store without an
/// established D holds no records, so any non-empty query yields no hits.
pub fn rank<'a, I>(
    records: I,
    query: &[f32],
    dimensions: Option<usize>,
    k: usize,
    filter: &SearchFilter,
) -> Result<Vec<QueryResult>, QueryError>
where
    I: IntoIterator<Item = &'a Record>,
{
    if query.is_empty() {
        return Err(QueryError::EmptyQuery);
    }

    if let Some(expected) = dimensions {
        if query.len() != expected {
            return Err(QueryError::DimensionMismatch {
                expected,
                got: query.len(),
            });
        }
    }

    if k == 0 {
        return Ok(vec![]);
    }

    let query_norm = l2_norm(query);
    let mut heap: BinaryHeap<Reverse<Candidate<'a>>> = BinaryHeap::with_capacity(k + 1);

    for record in records {
        if !filter.accepts_record(record) {
            continue;
        }

        let similarity = similarity_with_norm(query, query_norm, &record.embedding);
        if !filter.accepts_score(similarity) {
            continue;
        }

        heap.push(Reverse(Candidate { similarity, record }));
        if heap.len() > k {
            heap.pop();
        }
    }

    // Ascending order of Reverse<_> is best-first
    Ok(heap
        .into_sorted_vec()
        .into_iter()
        .map(|Reverse(c)| QueryResult {
            key: c.record.key,
            content: c.record.content.clone(),
            tags: c.record.tags.clone(),
            similarity: c.similarity,
        })
        .collect())
}

/// Cosine similarity between two vectors.
///
/// Defined as 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    similarity_with_norm(a, l2_norm(a), b)
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with the first norm precomputed.
fn similarity_with_norm(a: &[f32], a_norm: f32, b: &[f32]) -> f32 {
    let b_norm = l2_norm(b);
    if a_norm < f32::EPSILON || b_norm < f32::EPSILON {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let similarity = (dot / (a_norm * b_norm)).clamp(-1.0, 1.0);

    // fold -0.0 into 0.0 so it ties with exact zeros
    if similarity == 0.0 {
        0.0
    } else {
        similarity
    }
}

struct Candidate<'a> {
    similarity: f32,
    record: &'a Record,
}

impl Ord for Candidate<'_> {
    /// Greater means "ranks higher".
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.record.key.cmp(&self.record.key))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: u64, content: &str, embedding: Vec<f32>) -> Record {
        Record {
            key,
            content: content.to_string(),
            embedding,
            tags: BTreeSet::new(),
        }
    }

    fn sample_records() -> Vec<Record> {
        vec![
            record(1, "a", vec![1.0, 0.0]),
            record(2, "b", vec![0.0, 1.0]),
            record(3, "c", vec![1.0, 1.0]),
        ]
    }

    #[test]
    fn test_cosine_symmetric() {
        let a = [0.3, -1.2, 4.0];
        let b = [2.0, 0.5, -0.7];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_self_similarity_is_one() {
        let v = [0.25, -3.0, 7.5, 1.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_similarity_is_zero() {
        let zero = [0.0, 0.0, 0.0];
        let v = [1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_rank_reference_example() {
        let records = sample_records();
        let results = rank(&records, &[1.0, 0.0], Some(2), 2, &SearchFilter::default()).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "a");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(results[1].content, "c");
        assert!((results[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn test_rank_zero_query_returns_zero_similarity() {
        let records = sample_records();
        let results = rank(&records, &[0.0, 0.0], Some(2), 1, &SearchFilter::default()).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].similarity, 0.0);
        // all tie at zero, so the earliest key wins
        assert_eq!(results[0].key, 1);
    }

    #[test]
    fn test_rank_k_larger_than_store() {
        let records = sample_records();
        let results = rank(&records, &[0.5, 0.5], Some(2), 10, &SearchFilter::default()).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_rank_k_zero() {
        let records = sample_records();
        let results = rank(&records, &[0.5, 0.5], Some(2), 0, &SearchFilter::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_rank_sorted_non_increasing() {
        let records: Vec<Record> = (0..20)
            .map(|i| record(i + 1, "x", vec![1.0, i as f32 * 0.37, (i % 3) as f32]))
            .collect();

        let results = rank(&records, &[0.2, 1.0, 0.4], Some(3), 7, &SearchFilter::default()).unwrap();

        assert_eq!(results.len(), 7);
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_ties_break_by_ascending_key() {
        let records = vec![
            record(7, "late", vec![2.0, 0.0]),
            record(3, "early", vec![1.0, 0.0]),
            record(5, "middle", vec![3.0, 0.0]),
        ];

        for _ in 0..3 {
            let results = rank(&records, &[1.0, 0.0], Some(2), 3, &SearchFilter::default()).unwrap();
            let keys: Vec<u64> = results.iter().map(|r| r.key).collect();
            assert_eq!(keys, vec![3, 5, 7]);
        }
    }

    #[test]
    fn test_empty_query_rejected() {
        let records = sample_records();
        let result = rank(&records, &[], Some(2), 3, &SearchFilter::default());
        assert_eq!(result.unwrap_err(), QueryError::EmptyQuery);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let records = sample_records();
        let result = rank(&records, &[1.0, 0.0, 0.0], Some(2), 3, &SearchFilter::default());
        assert!(matches!(
            result,
            Err(QueryError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let records: Vec<Record> = vec![];
        let results = rank(&records, &[1.0, 0.0], None, 5, &SearchFilter::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_tag_filter() {
        let mut records = sample_records();
        records[2].tags.insert("audio".to_string());

        let filter = SearchFilter {
            tags: BTreeSet::from(["audio".to_string()]),
            ..Default::default()
        };
        let results = rank(&records, &[1.0, 0.0], Some(2), 5, &filter).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "c");
    }

    #[test]
    fn test_min_similarity_threshold() {
        let records = sample_records();
        let filter = SearchFilter {
            min_similarity: Some(0.9),
            ..Default::default()
        };
        let results = rank(&records, &[1.0, 0.0], Some(2), 5, &filter).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, 1);
    }
}
