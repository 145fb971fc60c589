//! Rank-order helpers shared by semantic and combined search.

use std::collections::{HashMap, HashSet};

use lumen_core::defaults;
use lumen_core::{Photo, VectorMatch};

/// Candidates needed to fill `[offset, offset + limit)` when each result
/// costs `factor` candidates. Saturates, then caps at
/// [`defaults::SEARCH_MAX_CANDIDATES`].
pub fn candidate_count(limit: i64, offset: i64, factor: usize) -> usize {
    let window = limit.max(0).saturating_add(offset.max(0));
    usize::try_from(window)
        .unwrap_or(usize::MAX)
        .saturating_mul(factor.max(1))
        .min(defaults::SEARCH_MAX_CANDIDATES)
}

/// Photo ids in the order the index ranked them, first occurrence wins.
pub fn ranked_photo_ids(matches: &[VectorMatch]) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(matches.len());
    matches
        .iter()
        .map(|m| m.metadata.photo_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// The `[offset, offset + limit)` window of `items`. Out-of-range windows are empty.
pub fn page<T: Clone>(items: &[T], limit: i64, offset: i64) -> Vec<T> {
    let offset = offset.max(0) as usize;
    let limit = limit.max(0) as usize;
    items.iter().skip(offset).take(limit).cloned().collect()
}

/// Arrange `photos` to follow `ranked_ids`, dropping ids with no photo.
pub fn in_rank_order(ranked_ids: &[i64], photos: Vec<Photo>) -> Vec<Photo> {
    let mut by_id: HashMap<i64, Photo> = photos.into_iter().map(|p| (p.id, p)).collect();
    ranked_ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect()
}

/// Keep the ids of `ranked_ids` present in `survivors`, preserving rank order.
pub fn retain_ranked(ranked_ids: &[i64], survivors: &[i64]) -> Vec<i64> {
    let keep: HashSet<i64> = survivors.iter().copied().collect();
    ranked_ids
        .iter()
        .copied()
        .filter(|id| keep.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::VectorMetadata;

    fn hit(id: &str, photo_id: i64, distance: f32) -> VectorMatch {
        VectorMatch {
            id: id.to_string(),
            distance,
            metadata: VectorMetadata::image(photo_id),
        }
    }

    fn photo(id: i64) -> Photo {
        Photo {
            id,
            file_path: format!("/p/{}.jpg", id),
            file_name: format!("{}.jpg", id),
            is_video: false,
            date_taken: None,
            location_name: None,
            country: None,
            city: None,
            is_processed: true,
            has_embeddings: true,
            has_faces_processed: true,
            thumbnail_small: None,
            thumbnail_medium: None,
            thumbnail_large: None,
        }
    }

    #[test]
    fn test_candidate_count_saturates_and_caps() {
        assert_eq!(candidate_count(5, 5, 1), 10);
        assert_eq!(candidate_count(50, 0, 3), 150);
        assert_eq!(candidate_count(2, -7, 3), 6);
        assert_eq!(
            candidate_count(i64::MAX, i64::MAX, 3),
            defaults::SEARCH_MAX_CANDIDATES
        );
        assert_eq!(
            candidate_count(i64::MAX, 1, 1),
            defaults::SEARCH_MAX_CANDIDATES
        );
    }

    #[test]
    fn test_ranked_ids_dedupe_keeps_first() {
        let ids = ranked_photo_ids(&[hit("3", 3, 0.1), hit("1", 1, 0.2), hit("x", 3, 0.3)]);
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_page_out_of_range_is_empty() {
        let items = vec![1, 2, 3];
        assert_eq!(page(&items, 2, 1), vec![2, 3]);
        assert!(page(&items, 5, 10).is_empty());
        assert!(page(&items, 0, 0).is_empty());
        assert_eq!(page(&items, 2, -4), vec![1, 2]);
    }

    #[test]
    fn test_rank_order_ignores_fetch_order_and_drops_missing() {
        let ordered = in_rank_order(&[5, 9, 2], vec![photo(2), photo(5)]);
        let ids: Vec<i64> = ordered.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![5, 2]);
    }

    #[test]
    fn test_retain_ranked_uses_rank_not_survivor_order() {
        assert_eq!(retain_ranked(&[4, 8, 1, 7], &[7, 1, 4]), vec![4, 1, 7]);
    }
}
