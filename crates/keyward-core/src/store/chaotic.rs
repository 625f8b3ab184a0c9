//! Chaotic store wrapper for fault injection testing
//!
//! Store wrapper that randomly fails operations to test error handling. Used
//! for chaos testing to ensure the key manager never applies a mutation in
//! memory when the durable write behind it failed.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use super::{KeyStore, StoreError};

/// Chaotic store wrapper that randomly injects failures
///
/// Delegates to an underlying store but fails operations based on a
/// configured failure rate. Uses Arc<Mutex<>> for the RNG state, making it
/// Clone and thread-safe. The failure rate can be changed at runtime so a
/// test can build up state cleanly and then turn chaos on.
#[derive(Clone)]
pub struct ChaoticStore<S: KeyStore> {
    inner: Arc<S>,
    chaos: Arc<Mutex<Chaos>>,
    /// Operation counter
    operation_count: Arc<AtomicUsize>,
}

struct Chaos {
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: ChaoticRng,
}

/// Simple deterministic RNG for chaos injection
///
/// Uses linear congruential generator (LCG) for fast, deterministic randomness.
/// This ensures chaos tests are reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next_f64(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: KeyStore> ChaoticStore<S> {
    /// Create a new chaotic store wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert_rate(failure_rate);

        Self {
            inner: Arc::new(inner),
            chaos: Arc::new(Mutex::new(Chaos { failure_rate, rng: ChaoticRng::new(seed) })),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Change the failure rate for subsequent operations.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn set_failure_rate(&self, failure_rate: f64) {
        assert_rate(failure_rate);
        self.chaos.lock().unwrap_or_else(PoisonError::into_inner).failure_rate = failure_rate;
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of store operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    fn should_fail(&self) -> bool {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        let mut chaos = self.chaos.lock().unwrap_or_else(PoisonError::into_inner);
        let failure_rate = chaos.failure_rate;
        chaos.rng.next_f64() < failure_rate
    }
}

fn assert_rate(failure_rate: f64) {
    assert!(
        (0.0..=1.0).contains(&failure_rate),
        "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
    );
}

#[async_trait]
impl<S: KeyStore> KeyStore for ChaoticStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.should_fail() {
            return Err(StoreError::Io(format!("chaos: injected read failure for '{key}'")));
        }

        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.should_fail() {
            return Err(StoreError::Io(format!("chaos: injected write failure for '{key}'")));
        }

        self.inner.put(key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn zero_rate_never_fails() {
        let store = ChaoticStore::new(MemoryStore::new(), 0.0);

        for i in 0..100 {
            store.put(&format!("k{i}"), b"v").await.unwrap();
        }

        assert_eq!(store.inner().len(), 100);
        assert_eq!(store.operation_count(), 100);
    }

    #[tokio::test]
    async fn full_rate_always_fails_and_leaves_inner_untouched() {
        let store = ChaoticStore::new(MemoryStore::new(), 1.0);

        for i in 0..20 {
            assert!(store.put(&format!("k{i}"), b"v").await.is_err());
        }

        assert!(store.inner().is_empty());
    }

    #[tokio::test]
    async fn rate_can_change_at_runtime() {
        let store = ChaoticStore::new(MemoryStore::new(), 0.0);
        store.put("before", b"v").await.unwrap();

        store.set_failure_rate(1.0);
        assert!(store.get("before").await.is_err());

        store.set_failure_rate(0.0);
        assert!(store.get("before").await.unwrap().is_some());
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_out_of_range_rate() {
        let _ = ChaoticStore::new(MemoryStore::new(), 1.5);
    }
}
