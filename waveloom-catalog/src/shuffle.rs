//! Interleaves a shuffle batch's favorite and regular result sets, grounded
//! on the tail of `AmpacheServer::networkFinished`'s `Shuffle` branch.

use std::collections::HashMap;

type Record = HashMap<String, String>;

/// Builds a batch of `limit` records: every position where `(i+1) %
/// favorite_frequency == 0` is filled from `favorites` (round-robin), the
/// rest from `regulars` (round-robin). `shuffled` is the server's running
/// shuffle counter, advanced by one per position so favorite placement is
/// continuous across batches rather than restarting at the first position
/// of each call. `favorite_index`/`regular_index` are likewise caller-owned
/// so a persistent pool keeps rotating across many calls instead of
/// restarting at index 0 every time it's handed a fresh `favorites`/
/// `regulars` slice.
pub fn interleave(
    favorites: &[Record],
    regulars: &[Record],
    limit: usize,
    favorite_frequency: usize,
    shuffled: &mut u64,
    favorite_index: &mut usize,
    regular_index: &mut usize,
) -> Vec<Record> {
    let mut out = Vec::with_capacity(limit);
    let favorite_frequency = favorite_frequency.max(1);

    for _ in 0..limit {
        *shuffled += 1;
        if *shuffled % favorite_frequency as u64 == 0 && !favorites.is_empty() {
            out.push(favorites[*favorite_index % favorites.len()].clone());
            *favorite_index += 1;
        } else if !regulars.is_empty() {
            out.push(regulars[*regular_index % regulars.len()].clone());
            *regular_index += 1;
        } else if !favorites.is_empty() {
            out.push(favorites[*favorite_index % favorites.len()].clone());
            *favorite_index += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> Record {
        let mut r = Record::new();
        r.insert("id".into(), id.into());
        r
    }

    #[test]
    fn every_fourth_position_is_a_favorite() {
        let favorites = vec![record("fav1"), record("fav2")];
        let regulars = vec![record("r1"), record("r2"), record("r3")];
        let mut shuffled = 0;
        let (mut favorite_index, mut regular_index) = (0, 0);

        let batch = interleave(&favorites, &regulars, 8, 4, &mut shuffled, &mut favorite_index, &mut regular_index);

        for (i, rec) in batch.iter().enumerate() {
            let position = i + 1;
            if position % 4 == 0 {
                assert!(rec.get("id").unwrap().starts_with("fav"), "position {position} should be a favorite");
            } else {
                assert!(rec.get("id").unwrap().starts_with('r'), "position {position} should be regular");
            }
        }
    }

    #[test]
    fn continues_counter_across_calls() {
        let favorites = vec![record("fav1")];
        let regulars = vec![record("r1")];
        let mut shuffled = 2;
        let (mut favorite_index, mut regular_index) = (0, 0);

        // shuffled goes 3, 4 -> position (shuffled=4) should be a favorite.
        let batch = interleave(&favorites, &regulars, 2, 4, &mut shuffled, &mut favorite_index, &mut regular_index);
        assert_eq!(batch[0].get("id").unwrap(), "r1");
        assert_eq!(batch[1].get("id").unwrap(), "fav1");
        assert_eq!(shuffled, 4);
    }

    #[test]
    fn falls_back_to_whichever_bucket_is_non_empty() {
        let favorites: Vec<Record> = vec![];
        let regulars = vec![record("r1")];
        let mut shuffled = 0;
        let (mut favorite_index, mut regular_index) = (0, 0);
        let batch = interleave(&favorites, &regulars, 5, 4, &mut shuffled, &mut favorite_index, &mut regular_index);
        assert_eq!(batch.len(), 5);
        assert!(batch.iter().all(|r| r.get("id").unwrap() == "r1"));
    }

    #[test]
    fn persistent_indices_keep_rotating_across_repeated_calls() {
        let favorites = vec![record("fav1"), record("fav2")];
        let regulars = vec![record("r1"), record("r2")];
        let mut shuffled = 0;
        let (mut favorite_index, mut regular_index) = (0, 0);

        let first = interleave(&favorites, &regulars, 4, 4, &mut shuffled, &mut favorite_index, &mut regular_index);
        let second = interleave(&favorites, &regulars, 4, 4, &mut shuffled, &mut favorite_index, &mut regular_index);

        // Same small pool reused across two calls without a refetch still
        // advances through every element instead of restarting at index 0.
        assert_ne!(first, second);
    }
}
