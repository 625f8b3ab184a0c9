//! Entropy sources for key generation.
//!
//! Production code uses [`OsEntropy`]. Tests inject [`SeededEntropy`] so that
//! generated identities and sender keys are reproducible from a seed.

use std::sync::{Mutex, PoisonError};

use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};

use crate::CryptoError;

/// Source of random bytes for key generation.
///
/// # Invariants
///
/// - Production implementations MUST be cryptographically secure
/// - A failed fill MUST be reported, never papered over with zeros
pub trait Entropy: Send + Sync + 'static {
    /// Fill `buffer` with random bytes.
    fn fill(&self, buffer: &mut [u8]) -> Result<(), CryptoError>;
}

/// Operating system RNG (getrandom).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn fill(&self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        getrandom::fill(buffer).map_err(|e| CryptoError::Entropy(e.to_string()))
    }
}

/// Deterministic ChaCha20 RNG seeded from a `u64`.
///
/// Same seed, same byte sequence. NOT for production keys.
pub struct SeededEntropy {
    rng: Mutex<ChaCha20Rng>,
}

impl SeededEntropy {
    /// Create a seeded entropy source.
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)) }
    }
}

impl Entropy for SeededEntropy {
    fn fill(&self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
        Ok(())
    }
}
