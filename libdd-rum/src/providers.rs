// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time, thread-id and randomness seams.
//!
//! The beacon engine never calls `SystemTime` or `rand` directly; it
//! goes through these traits so tests can pin every source of
//! non-determinism.

use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond/nanosecond wall-clock source.
pub trait TimeProvider: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> u64;
}

/// Positive thread-id source for the `it` record key.
pub trait ThreadIdProvider: Send + Sync {
    fn thread_id(&self) -> i32;
}

/// Randomness source for device-id substitution, traffic control and
/// session-number seeding.
pub trait RandomProvider: Send + Sync {
    /// A uniformly distributed positive 63-bit integer.
    fn next_positive_i64(&self) -> i64;

    /// A uniformly distributed integer in `[0,100)`.
    fn next_percentage(&self) -> i32;
}

/// Default wall clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    }

    fn now_nanos(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64)
    }
}

/// Default thread ids: the opaque [`std::thread::ThreadId`] hashed down
/// to a positive 31-bit integer.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdThreadIdProvider;

impl ThreadIdProvider for StdThreadIdProvider {
    fn thread_id(&self) -> i32 {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        let id = (hasher.finish() & 0x7fff_ffff) as i32;
        // 0 is reserved for "no thread" on the wire.
        id.max(1)
    }
}

/// Default randomness backed by [`rand::thread_rng`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngRandomProvider;

impl RandomProvider for ThreadRngRandomProvider {
    fn next_positive_i64(&self) -> i64 {
        rand::thread_rng().gen_range(1..i64::MAX)
    }

    fn next_percentage(&self) -> i32 {
        rand::thread_rng().gen_range(0..100)
    }
}

/// Hands out session numbers: positive, monotonically increasing,
/// seeded from the random provider, wrapping back to 1.
pub struct SessionIdProvider {
    next: AtomicI32,
}

impl SessionIdProvider {
    pub fn new(random: &dyn RandomProvider) -> Self {
        let seed = (random.next_positive_i64() % i64::from(i32::MAX)) as i32;
        Self {
            next: AtomicI32::new(seed.max(1)),
        }
    }

    pub fn next_session_id(&self) -> i32 {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let next = if current == i32::MAX { 1 } else { current + 1 };
            match self.next.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(observed) => current = observed,
            }
        }
    }
}

/// The provider bundle threaded through beacons and the worker.
#[derive(Clone)]
pub(crate) struct Providers {
    pub time: Arc<dyn TimeProvider>,
    pub thread: Arc<dyn ThreadIdProvider>,
    pub random: Arc<dyn RandomProvider>,
}

impl Default for Providers {
    fn default() -> Self {
        Self {
            time: Arc::new(SystemTimeProvider),
            thread: Arc::new(StdThreadIdProvider),
            random: Arc::new(ThreadRngRandomProvider),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    //! Deterministic providers for tests.

    use super::*;
    use std::sync::atomic::AtomicI64;

    /// A clock that only moves when told to.
    #[derive(Debug, Default)]
    pub struct MockTimeProvider {
        millis: AtomicI64,
    }

    impl MockTimeProvider {
        pub fn new(millis: i64) -> Self {
            Self {
                millis: AtomicI64::new(millis),
            }
        }

        pub fn set_millis(&self, millis: i64) {
            self.millis.store(millis, Ordering::Relaxed);
        }

        pub fn advance_millis(&self, delta: i64) {
            self.millis.fetch_add(delta, Ordering::Relaxed);
        }
    }

    impl TimeProvider for MockTimeProvider {
        fn now_millis(&self) -> i64 {
            self.millis.load(Ordering::Relaxed)
        }

        fn now_nanos(&self) -> u64 {
            (self.millis.load(Ordering::Relaxed) as u64) * 1_000_000
        }
    }

    /// A fixed thread id.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedThreadIdProvider(pub i32);

    impl ThreadIdProvider for FixedThreadIdProvider {
        fn thread_id(&self) -> i32 {
            self.0
        }
    }

    /// Fixed randomness.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedRandomProvider {
        pub positive: i64,
        pub percentage: i32,
    }

    impl RandomProvider for FixedRandomProvider {
        fn next_positive_i64(&self) -> i64 {
            self.positive
        }

        fn next_percentage(&self) -> i32 {
            self.percentage
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn system_time_is_monotonic_enough() {
        let provider = SystemTimeProvider;
        let a = provider.now_millis();
        let b = provider.now_millis();
        assert!(b >= a);
        assert!(a > 0);
    }

    #[test]
    fn thread_id_is_positive_and_stable_within_thread() {
        let provider = StdThreadIdProvider;
        let a = provider.thread_id();
        assert!(a > 0);
        assert_eq!(a, provider.thread_id());
    }

    #[test]
    fn thread_ids_differ_across_threads() {
        let provider = StdThreadIdProvider;
        let here = provider.thread_id();
        let there = std::thread::spawn(move || StdThreadIdProvider.thread_id())
            .join()
            .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn random_percentage_in_range() {
        let provider = ThreadRngRandomProvider;
        for _ in 0..1000 {
            let p = provider.next_percentage();
            assert!((0..100).contains(&p));
        }
    }

    #[test]
    fn session_ids_increase_and_stay_positive() {
        let random = FixedRandomProvider {
            positive: 41,
            percentage: 0,
        };
        let provider = SessionIdProvider::new(&random);
        assert_eq!(provider.next_session_id(), 41);
        assert_eq!(provider.next_session_id(), 42);
    }

    #[test]
    fn session_ids_wrap_to_one() {
        let provider = SessionIdProvider {
            next: AtomicI32::new(i32::MAX),
        };
        assert_eq!(provider.next_session_id(), i32::MAX);
        assert_eq!(provider.next_session_id(), 1);
    }

    #[test]
    fn mock_time_advances() {
        let clock = MockTimeProvider::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance_millis(500);
        assert_eq!(clock.now_millis(), 1_500);
        assert_eq!(clock.now_nanos(), 1_500_000_000);
    }
}
