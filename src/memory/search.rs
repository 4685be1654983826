use std::cmp::Ordering;

use ndarray::ArrayView1;

use super::types::{MemoryHit, MemoryRecord};

// ---------------------------------------------------------------------------
// Distance
// ---------------------------------------------------------------------------

/// Cosine distance `1 - cos(a, b)` in `[0.0, 2.0]`.
///
/// Returns `None` when the vectors differ in length. A zero vector has no
/// direction and sits at distance `1.0` from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }

    let a = ArrayView1::from(a).mapv(f64::from);
    let b = ArrayView1::from(b).mapv(f64::from);

    let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norm == 0.0 {
        return Some(1.0);
    }

    let similarity = (a.dot(&b) / norm).clamp(-1.0, 1.0);
    Some(1.0 - similarity)
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Ordering used by search results: ascending distance, then most recent
/// timestamp, then highest id.
pub fn compare_hits(a: &MemoryHit, b: &MemoryHit) -> Ordering {
    a.distance
        .partial_cmp(&b.distance)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| b.id.cmp(&a.id))
}

/// Score `records` against `query` and return the best `limit` hits.
///
/// Records whose embedding length differs from the query are returned
/// separately (by id) so the caller can report them.
pub fn rank(query: &[f32], records: Vec<MemoryRecord>, limit: usize) -> (Vec<MemoryHit>, Vec<i64>) {
    let mut skipped = Vec::new();
    let mut hits: Vec<MemoryHit> = records
        .into_iter()
        .filter_map(|record| match cosine_distance(query, &record.embedding) {
            Some(distance) => Some(MemoryHit {
                id: record.id,
                role: record.role,
                content: record.content,
                timestamp: record.timestamp,
                distance,
            }),
            None => {
                skipped.push(record.id);
                None
            }
        })
        .collect();

    hits.sort_by(compare_hits);
    hits.truncate(limit);
    (hits, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: i64, embedding: Vec<f32>, minutes: i64) -> MemoryRecord {
        MemoryRecord {
            id,
            username: "alice".to_string(),
            role: Role::User,
            content: format!("memory {id}"),
            embedding,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let d = cosine_distance(&[0.3, 0.4, 0.5], &[0.3, 0.4, 0.5]).unwrap();
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn distance_ignores_magnitude() {
        let d = cosine_distance(&[1.0, 2.0], &[10.0, 20.0]).unwrap();
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn opposite_and_orthogonal_vectors() {
        let opposite = cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((opposite - 2.0).abs() < 1e-9);
        let orthogonal = cosine_distance(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!((orthogonal - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_lengths_have_no_distance() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0, 0.0]), None);
    }

    #[test]
    fn zero_vector_is_neutral() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), Some(1.0));
    }

    #[test]
    fn ranks_by_distance_then_recency() {
        let records = vec![
            record(1, vec![0.0, 1.0], 0),
            record(2, vec![1.0, 0.0], 1),
            record(3, vec![1.0, 0.0], 5),
            record(4, vec![1.0, 0.1], 10),
        ];

        let (hits, skipped) = rank(&[1.0, 0.0], records, 10);
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();

        // 2 and 3 tie on distance; the later one wins.
        assert_eq!(ids, vec![3, 2, 4, 1]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn equal_timestamps_fall_back_to_id() {
        let records = vec![record(7, vec![1.0, 0.0], 0), record(8, vec![1.0, 0.0], 0)];
        let (hits, _) = rank(&[1.0, 0.0], records, 10);
        assert_eq!(hits[0].id, 8);
    }

    #[test]
    fn truncates_and_reports_skipped() {
        let records = vec![
            record(1, vec![1.0, 0.0], 0),
            record(2, vec![1.0, 0.0, 0.0], 0),
            record(3, vec![0.5, 0.5], 0),
        ];

        let (hits, skipped) = rank(&[1.0, 0.0], records, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        assert_eq!(skipped, vec![2]);
    }
}
