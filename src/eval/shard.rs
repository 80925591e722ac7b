/// Parallel map with ordered reassembly for CPU-bound metrics.
///
/// Input is cut into near-equal contiguous shards, each shard is scored on the
/// blocking thread pool, and shard results are concatenated in shard order, so
/// the output lines up with the input exactly as a sequential map would.

use std::sync::Arc;

use crate::errors::HarnessError;

/// Sizes of `pieces` contiguous partitions of `len` items: `len / pieces`
/// each, plus one extra for the first `len % pieces` partitions.
pub fn partition_sizes(len: usize, pieces: usize) -> Vec<usize> {
    let pieces = pieces.max(1);
    let size = len / pieces;
    let extra = len % pieces;
    (0..pieces).map(|i| size + usize::from(i < extra)).collect()
}

/// Worker count for a metric: `tiers` apply below 1000 items, below 3000
/// items and otherwise; the result never exceeds `cap`.
pub fn shard_count(len: usize, tiers: [usize; 3], cap: usize) -> usize {
    let wanted = if len < 1000 {
        tiers[0]
    } else if len < 3000 {
        tiers[1]
    } else {
        tiers[2]
    };
    wanted.min(cap).max(1)
}

/// Apply `f` to every item on up to `shards` blocking workers. Output order
/// equals input order.
pub async fn parallel_map_ordered<T, R, F>(items: Vec<T>, shards: usize, f: F) -> Result<Vec<R>, HarnessError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
{
    let total = items.len();
    let f = Arc::new(f);
    let mut remaining = items.into_iter();
    let mut handles = Vec::new();

    for size in partition_sizes(total, shards) {
        if size == 0 {
            continue;
        }
        let chunk: Vec<T> = remaining.by_ref().take(size).collect();
        let f = Arc::clone(&f);
        handles.push(tokio::task::spawn_blocking(move || chunk.iter().map(|item| f(item)).collect::<Vec<R>>()));
    }
    tracing::debug!(items = total, workers = handles.len(), "Sharded metric computation");

    let mut results = Vec::with_capacity(total);
    for handle in handles {
        let part = handle.await.map_err(|e| HarnessError::Worker(e.to_string()))?;
        results.extend(part);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_sizes() {
        assert_eq!(partition_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(partition_sizes(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(partition_sizes(0, 2), vec![0, 0]);
        assert_eq!(partition_sizes(5, 0), vec![5]);
    }

    #[test]
    fn test_shard_count_tiers() {
        let meteor = [6, 12, 24];
        assert_eq!(shard_count(999, meteor, 96), 6);
        assert_eq!(shard_count(1000, meteor, 96), 12);
        assert_eq!(shard_count(3000, meteor, 96), 24);
        assert_eq!(shard_count(5000, [32, 64, 96], 48), 48);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let out: Vec<usize> = parallel_map_ordered(Vec::<usize>::new(), 4, |x| *x).await.unwrap();
        assert!(out.is_empty());
    }

    proptest! {
        #[test]
        fn test_partitions_cover_input(len in 0usize..500, pieces in 1usize..100) {
            let sizes = partition_sizes(len, pieces);
            prop_assert_eq!(sizes.len(), pieces);
            prop_assert_eq!(sizes.iter().sum::<usize>(), len);
            let max = sizes.iter().max().copied().unwrap_or(0);
            let min = sizes.iter().min().copied().unwrap_or(0);
            prop_assert!(max - min <= 1);
        }

        #[test]
        fn test_sharded_equals_sequential(items in prop::collection::vec(any::<i32>(), 0..200), shards in 1usize..40) {
            let rt = tokio::runtime::Builder::new_multi_thread().worker_threads(2).build().unwrap();
            let expected: Vec<i64> = items.iter().map(|x| *x as i64 * 3 - 1).collect();
            let got = rt.block_on(parallel_map_ordered(items, shards, |x| *x as i64 * 3 - 1)).unwrap();
            prop_assert_eq!(got, expected);
        }
    }
}
