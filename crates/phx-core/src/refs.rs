//! Correlation ref generation.
//!
//! Refs are decimal strings drawn from a signed 32-bit counter. The counter
//! advances with a compare-and-swap so concurrent callers never observe the
//! same value, and wraps to `0` once it has handed out `i32::MAX`. Refs can
//! therefore reappear after roughly two billion requests; consumers treat a
//! reply for an unknown ref as stale rather than as an error.

use std::sync::atomic::{AtomicI32, Ordering};

/// Monotonic, wrapping, thread-safe ref source.
#[derive(Debug, Default)]
pub struct RefGenerator {
    counter: AtomicI32,
}

impl RefGenerator {
    /// New generator. The first ref handed out is `"1"`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator whose next ref is the successor of `value`.
    pub fn starting_at(value: i32) -> Self {
        Self {
            counter: AtomicI32::new(value),
        }
    }

    /// Next ref as an integer.
    pub fn next_value(&self) -> i32 {
        let mut current = self.counter.load(Ordering::Relaxed);
        loop {
            let next = if current == i32::MAX { 0 } else { current + 1 };
            match self.counter.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Next ref as a decimal string.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> String {
        self.next_value().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn first_ref_is_one() {
        let refs = RefGenerator::new();
        assert_eq!(refs.next(), "1");
        assert_eq!(refs.next(), "2");
    }

    #[test]
    fn wraps_to_zero_after_max() {
        let refs = RefGenerator::starting_at(i32::MAX - 1);
        assert_eq!(refs.next_value(), i32::MAX);
        assert_eq!(refs.next(), "0");
        assert_eq!(refs.next(), "1");
    }

    #[test]
    fn concurrent_callers_get_distinct_refs() {
        let refs = Arc::new(RefGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let refs = Arc::clone(&refs);
                std::thread::spawn(move || (0..1000).map(|_| refs.next_value()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let values = handle.join().unwrap();
            // Each thread sees its own values strictly increasing.
            assert!(values.windows(2).all(|w| w[0] < w[1]));
            for v in values {
                assert!(seen.insert(v), "duplicate ref {v}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn refs_strictly_increase_without_wrap(start in 0i32..1_000_000, n in 1usize..500) {
                let refs = RefGenerator::starting_at(start);
                let values: Vec<i64> = (0..n)
                    .map(|_| refs.next().parse::<i64>().unwrap())
                    .collect();
                prop_assert!(values.windows(2).all(|w| w[0] < w[1]));
                prop_assert_eq!(values[0], i64::from(start) + 1);
            }

            #[test]
            fn wrap_never_panics(offset in 0i32..50) {
                let refs = RefGenerator::starting_at(i32::MAX - offset);
                for _ in 0..100 {
                    let v = refs.next_value();
                    prop_assert!(v >= 0);
                }
            }
        }
    }
}
