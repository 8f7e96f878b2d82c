use std::ops::Range;

use eidcore::error::{CoreError, CoreResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One batch of the plan: a row range confined to a single shard
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub shard_id: usize,
    pub local: Range<usize>,
    pub weights: Option<Vec<f32>>,
}

impl PlanEntry {
    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}

/// Tile a global index interval into shard-local batches.
///
/// Every shard is cut into `ceil(len / batch_size)` batches; the batches
/// overlapping `interval` are kept in catalog order and the first and last
/// are trimmed so that the entry lengths add up to `interval.len()`.
///
/// # Arguments
///
/// * `lengths` - event count per shard, in catalog order
/// * `batch_size` - maximum rows per entry
/// * `interval` - global half-open range `[lo, hi)`
/// * `weights` - optional global weight vector, sliced per entry
/// * `shuffle_seed` - when set, entry order is shuffled with this seed
///
/// # Returns
///
/// * `Vec<PlanEntry>` - the batch plan, empty for an empty interval
///
pub fn resolve(
    lengths: &[usize],
    batch_size: usize,
    interval: Range<usize>,
    weights: Option<&[f32]>,
    shuffle_seed: Option<u64>,
) -> CoreResult<Vec<PlanEntry>> {
    if batch_size == 0 {
        return Err(CoreError::Configuration("batch size must be positive".to_string()));
    }
    let total: usize = lengths.iter().sum();
    let (lo, hi) = (interval.start, interval.end);
    if lo > hi || hi > total {
        return Err(CoreError::Index { lo, hi, total });
    }
    if let Some(w) = weights {
        if w.len() < hi {
            return Err(CoreError::WeightsTooShort { needed: hi, got: w.len() });
        }
    }
    if lo == hi {
        return Ok(Vec::new());
    }

    // global start of every shard-local batch, in catalog order
    let mut batches: Vec<(usize, Range<usize>, usize)> = Vec::new();
    let mut shard_start = 0;
    for (shard_id, &len) in lengths.iter().enumerate() {
        let mut local = 0;
        while local < len {
            let end = (local + batch_size).min(len);
            batches.push((shard_id, local..end, shard_start + local));
            local = end;
        }
        shard_start += len;
    }

    // batches overlapping [lo, hi): the first one starting at or before lo,
    // up to the last one starting before hi
    let first = batches.partition_point(|(_, _, start)| *start <= lo) - 1;
    let last = batches.partition_point(|(_, _, start)| *start < hi);

    let mut plan: Vec<PlanEntry> = batches[first..last]
        .iter()
        .map(|(shard_id, local, start)| {
            let trim_lo = lo.saturating_sub(*start);
            let trim_hi = (start + local.len()).saturating_sub(hi);
            PlanEntry { shard_id: *shard_id, local: local.start + trim_lo..local.end - trim_hi, weights: None }
        })
        .collect();

    if let Some(w) = weights {
        let mut offsets = Vec::with_capacity(lengths.len());
        let mut acc = 0;
        for &len in lengths {
            offsets.push(acc);
            acc += len;
        }
        for entry in plan.iter_mut() {
            let global = offsets[entry.shard_id];
            entry.weights = Some(w[global + entry.local.start..global + entry.local.end].to_vec());
        }
    }

    if let Some(seed) = shuffle_seed {
        let mut rng = StdRng::seed_from_u64(seed);
        plan.shuffle(&mut rng);
    }

    log::debug!("interval [{}, {}) resolved into {} batches", lo, hi, plan.len());
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(lengths: &[usize], plan: &[PlanEntry]) -> Vec<usize> {
        let offsets: Vec<usize> = lengths
            .iter()
            .scan(0, |acc, &len| {
                let start = *acc;
                *acc += len;
                Some(start)
            })
            .collect();
        let offsets = &offsets;
        plan.iter()
            .flat_map(|entry| entry.local.clone().map(move |row| offsets[entry.shard_id] + row))
            .collect()
    }

    #[test]
    fn test_reference_scenario() {
        let plan = resolve(&[100, 250, 130], 100, 120..300, None, None).unwrap();
        assert_eq!(
            plan,
            vec![
                PlanEntry { shard_id: 1, local: 20..100, weights: None },
                PlanEntry { shard_id: 1, local: 100..200, weights: None },
            ]
        );
        assert_eq!(plan.iter().map(PlanEntry::len).sum::<usize>(), 180);
    }

    #[test]
    fn test_tiling_is_complete_and_ordered() {
        let layouts: Vec<Vec<usize>> = vec![
            vec![100, 250, 130],
            vec![7],
            vec![0, 5, 0, 12, 1],
            vec![33, 33, 33],
            vec![1, 1, 1, 1],
        ];
        for lengths in &layouts {
            let total: usize = lengths.iter().sum();
            for batch_size in [1, 3, 10, 64, 500] {
                for lo in (0..=total).step_by(7) {
                    for hi in (lo..=total).step_by(5).chain(std::iter::once(total)) {
                        let plan = resolve(lengths, batch_size, lo..hi, None, None).unwrap();
                        assert_eq!(flatten(lengths, &plan), (lo..hi).collect::<Vec<_>>());
                        for entry in &plan {
                            assert!(!entry.is_empty());
                            assert!(entry.len() <= batch_size);
                            assert!(entry.local.end <= lengths[entry.shard_id]);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_boundaries_on_shard_edges() {
        let plan = resolve(&[10, 10], 4, 10..20, None, None).unwrap();
        assert!(plan.iter().all(|e| e.shard_id == 1));
        assert_eq!(plan.first().unwrap().local, 0..4);
        assert_eq!(plan.last().unwrap().local, 8..10);

        let plan = resolve(&[10, 10], 4, 0..10, None, None).unwrap();
        assert!(plan.iter().all(|e| e.shard_id == 0));
    }

    #[test]
    fn test_interval_narrower_than_one_batch() {
        let plan = resolve(&[100], 50, 61..63, None, None).unwrap();
        assert_eq!(plan, vec![PlanEntry { shard_id: 0, local: 61..63, weights: None }]);
    }

    #[test]
    fn test_errors_and_empty_interval() {
        assert!(resolve(&[10], 4, 3..3, None, None).unwrap().is_empty());
        assert!(matches!(resolve(&[10], 0, 0..5, None, None), Err(CoreError::Configuration(_))));
        assert!(matches!(resolve(&[10], 4, 0..11, None, None), Err(CoreError::Index { .. })));
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = 6..2;
        assert!(matches!(resolve(&[10], 4, reversed, None, None), Err(CoreError::Index { .. })));
        let short = vec![1.0; 5];
        assert!(matches!(
            resolve(&[10], 4, 0..8, Some(&short), None),
            Err(CoreError::WeightsTooShort { needed: 8, got: 5 })
        ));
    }

    #[test]
    fn test_weights_follow_their_rows_through_the_shuffle() {
        let lengths = [6, 9, 4];
        let weights: Vec<f32> = (0..19).map(|i| i as f32).collect();
        let plan = resolve(&lengths, 4, 2..17, Some(&weights), Some(7)).unwrap();
        let offsets = [0, 6, 15];
        for entry in &plan {
            let expected: Vec<f32> = entry.local.clone().map(|row| (offsets[entry.shard_id] + row) as f32).collect();
            assert_eq!(entry.weights.as_ref().unwrap(), &expected);
        }
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let lengths = [40, 40, 40];
        let ordered = resolve(&lengths, 5, 0..120, None, None).unwrap();
        let a = resolve(&lengths, 5, 0..120, None, Some(1)).unwrap();
        let b = resolve(&lengths, 5, 0..120, None, Some(1)).unwrap();
        let c = resolve(&lengths, 5, 0..120, None, Some(2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, ordered);
        assert_ne!(a, c);

        let mut sorted = a.clone();
        sorted.sort_by_key(|e| (e.shard_id, e.local.start));
        assert_eq!(sorted, ordered);
    }
}
