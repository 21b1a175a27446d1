//! Static split of a work queue across extraction threads.

/// Contiguous slice of the work queue handled by one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: u64,
    pub count: u64,
}

/// Split `[0, total)` into exactly `nthreads` contiguous ranges. Every
/// thread gets `total / nthreads` rows; the last one also takes the
/// remainder. Returns an empty list when `nthreads` is 0.
pub fn partition(total: u64, nthreads: usize) -> Vec<Range> {
    if nthreads == 0 {
        return Vec::new();
    }
    let n = nthreads as u64;
    let per_thread = total / n;
    (0..n)
        .map(|i| Range {
            offset: i * per_thread,
            count: if i == n - 1 {
                per_thread + total % n
            } else {
                per_thread
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ten_rows_three_threads() {
        assert_eq!(
            partition(10, 3),
            vec![
                Range { offset: 0, count: 3 },
                Range { offset: 3, count: 3 },
                Range { offset: 6, count: 4 },
            ]
        );
    }

    #[test]
    fn fewer_rows_than_threads() {
        let ranges = partition(2, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[3], Range { offset: 0, count: 2 });
        assert!(ranges[..3].iter().all(|r| r.count == 0));
    }

    #[test]
    fn empty_queue() {
        assert!(partition(0, 3).iter().all(|r| r.count == 0));
        assert_eq!(partition(0, 1), vec![Range { offset: 0, count: 0 }]);
    }

    #[test]
    fn zero_threads_yields_nothing() {
        assert!(partition(10, 0).is_empty());
    }

    proptest! {
        #[test]
        fn ranges_cover_every_row_exactly_once(total in 0u64..10_000, nthreads in 1usize..64) {
            let ranges = partition(total, nthreads);
            prop_assert_eq!(ranges.len(), nthreads);

            let mut seen = vec![0u8; total as usize];
            for r in &ranges {
                for row in r.offset..r.offset + r.count {
                    prop_assert!(row < total);
                    seen[row as usize] += 1;
                }
            }
            prop_assert!(seen.iter().all(|&c| c == 1));
        }

        #[test]
        fn nonempty_ranges_are_contiguous(total in 0u64..10_000, nthreads in 1usize..64) {
            let mut next = 0;
            for r in partition(total, nthreads).into_iter().filter(|r| r.count > 0) {
                prop_assert_eq!(r.offset, next);
                next = r.offset + r.count;
            }
            prop_assert_eq!(next, total);
        }
    }
}
