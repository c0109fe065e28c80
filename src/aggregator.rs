//! Binning algorithm (spec §4.4): group files with known sizes into
//! tape-friendly aggregations targeting `target_agg_size` (default 5 GiB),
//! grounded in `nlds_processors/utils/aggregations.py`'s smallest-first
//! bin-packing heuristic.

use crate::catalog::models::CatalogFile;
use crate::error::NldsError;
use crate::protocol::envelope::PathDetails;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

/// Default target aggregation size: 5 GiB.
pub const DEFAULT_TARGET_AGG_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Anything with a catalog original-path and a known size can be binned;
/// both `PathDetails` and `CatalogFile` implement this.
pub trait Sizeable {
    fn original_path(&self) -> &str;
    fn size(&self) -> u64;
}

impl Sizeable for PathDetails {
    fn original_path(&self) -> &str {
        &self.original_path
    }
    fn size(&self) -> u64 {
        self.size
    }
}

impl Sizeable for CatalogFile {
    fn original_path(&self) -> &str {
        &self.original_path
    }
    fn size(&self) -> u64 {
        self.size
    }
}

/// Partition `items` into disjoint bins whose totals approximate
/// `target_agg_size`, per spec §4.4:
///
/// - if the total size is under target, return one bin holding everything;
/// - otherwise choose `N = floor(total / target)` bins (or `N = 5` if the
///   mean file size itself exceeds target, guarding against a handful of
///   huge files each landing in their own bin);
/// - sort descending by size and assign each file to the currently
///   smallest bin.
///
/// Rejects empty input (P4).
pub fn aggregate<T: Sizeable + Clone>(
    items: &[T],
    target_agg_size: u64,
) -> Result<Vec<Vec<T>>, NldsError> {
    if items.is_empty() {
        return Err(NldsError::EmptyAggregationInput);
    }

    let total_size: u64 = items.iter().map(|f| f.size()).sum();
    if total_size < target_agg_size {
        return Ok(vec![items.to_vec()]);
    }

    let mean_size = total_size / items.len() as u64;
    let bin_count = if mean_size > target_agg_size {
        5
    } else {
        std::cmp::max(1, (total_size / target_agg_size) as usize)
    };

    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by(|a, b| b.size().cmp(&a.size()));

    let mut bins: Vec<Vec<T>> = vec![Vec::new(); bin_count];
    let mut bin_sizes = vec![0u64; bin_count];

    for item in sorted {
        let (smallest_index, _) = bin_sizes
            .iter()
            .enumerate()
            .min_by_key(|&(_, &size)| size)
            .expect("bin_count is always >= 1");
        bin_sizes[smallest_index] += item.size();
        bins[smallest_index].push(item.clone());
    }

    Ok(bins)
}

/// Deterministic aggregation id: the first 16 hex characters of a
/// SHAKE-256 digest over the concatenation of member original paths, in
/// the order given. A pure function of the member set's order (spec §3,
/// invariant 4 in §8).
pub fn aggregation_id<T: Sizeable>(members: &[T]) -> String {
    let mut hasher = Shake256::default();
    for member in members {
        hasher.update(member.original_path().as_bytes());
    }
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; 8];
    reader.read(&mut out);
    out.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct TestFile {
        path: String,
        size: u64,
    }

    impl Sizeable for TestFile {
        fn original_path(&self) -> &str {
            &self.path
        }
        fn size(&self) -> u64 {
            self.size
        }
    }

    fn file(path: &str, size: u64) -> TestFile {
        TestFile {
            path: path.to_string(),
            size,
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        let items: Vec<TestFile> = Vec::new();
        assert!(matches!(
            aggregate(&items, DEFAULT_TARGET_AGG_SIZE),
            Err(NldsError::EmptyAggregationInput)
        ));
    }

    #[test]
    fn single_file_returns_single_bin() {
        let items = vec![file("/test/a", 100)];
        let bins = aggregate(&items, DEFAULT_TARGET_AGG_SIZE).unwrap();
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].len(), 1);
    }

    #[test]
    fn total_under_target_returns_single_bin_of_all_files() {
        // S1: 4 files of 100/200/300/400 bytes, target 5 GiB.
        let items = vec![
            file("/test/a", 100),
            file("/test/b", 200),
            file("/test/c", 300),
            file("/test/d", 400),
        ];
        let bins = aggregate(&items, DEFAULT_TARGET_AGG_SIZE).unwrap();
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].len(), 4);
    }

    #[test]
    fn large_mix_produces_five_aggregations() {
        // S2: 14 files sized 10^1..10^14 bytes at 5 GiB target -> exactly
        // 5 aggregations, the largest holding the 10 smallest files, each
        // other holding one of the 4 largest.
        let target = 5 * 1024 * 1024 * 1024u64;
        let items: Vec<TestFile> = (1..=14)
            .map(|exp| file(&format!("/test/f{exp}"), 10u64.pow(exp)))
            .collect();
        let bins = aggregate(&items, target).unwrap();
        assert_eq!(bins.len(), 5);

        let covered: std::collections::HashSet<String> = bins
            .iter()
            .flatten()
            .map(|f| f.path.clone())
            .collect();
        assert_eq!(covered.len(), 14);

        let largest_bin = bins.iter().max_by_key(|b| b.len()).unwrap();
        assert_eq!(largest_bin.len(), 10);
    }

    #[test]
    fn partition_covers_input_and_bins_are_disjoint() {
        let items = vec![
            file("/a", 1_000_000_000),
            file("/b", 2_000_000_000),
            file("/c", 3_000_000_000),
            file("/d", 4_000_000_000),
            file("/e", 5_000_000_000),
        ];
        let bins = aggregate(&items, DEFAULT_TARGET_AGG_SIZE).unwrap();
        let mut seen = std::collections::HashSet::new();
        for bin in &bins {
            for f in bin {
                assert!(seen.insert(f.path.clone()), "path seen twice: {}", f.path);
            }
        }
        assert_eq!(seen.len(), items.len());
    }

    #[test]
    fn aggregation_id_is_pure_function_of_member_order() {
        let a = vec![file("/x", 10), file("/y", 20)];
        let b = vec![file("/x", 999), file("/y", 1)];
        assert_eq!(aggregation_id(&a), aggregation_id(&b));

        let reordered = vec![file("/y", 20), file("/x", 10)];
        assert_ne!(aggregation_id(&a), aggregation_id(&reordered));
        assert_eq!(aggregation_id(&a).len(), 16);
    }
}
