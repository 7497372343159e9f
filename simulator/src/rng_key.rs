//! Splittable generator keys for reproducible sampling.
//!
//! An [`RngKey`] is an opaque position in a deterministic pseudo-random
//! stream. Keys are never advanced in place: every independent sub-draw gets
//! its own child key via [`RngKey::split`], and every scalar draw seeds a
//! fresh generator from exactly one key. The same parent key always yields
//! the same children, so a whole pipeline run is a pure function of its root
//! key.
//!
//! Children are derived with the splitmix64 finalizer applied to the mixed
//! parent plus a distinct odd-gamma offset per child index. The finalizer is a
//! bijection on `u64`, so the children of one parent are pairwise distinct.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

fn splitmix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Opaque deterministic generator key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RngKey(u64);

impl RngKey {
    /// Root key for a run.
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Raw key value, for logging and persistence.
    pub fn raw(&self) -> u64 {
        self.0
    }

    fn child(&self, index: usize) -> RngKey {
        let base = splitmix64(self.0);
        let offset = (index as u64).wrapping_add(1).wrapping_mul(GOLDEN_GAMMA);
        RngKey(splitmix64(base.wrapping_add(offset)))
    }

    /// Derive `n` independent child keys.
    pub fn split(&self, n: usize) -> Vec<RngKey> {
        (0..n).map(|i| self.child(i)).collect()
    }

    /// Derive a fixed number of child keys, for destructuring at call sites.
    ///
    /// `key.split_array::<N>()` equals the first `N` entries of `key.split(N)`.
    pub fn split_array<const N: usize>(&self) -> [RngKey; N] {
        std::array::from_fn(|i| self.child(i))
    }

    /// Fresh generator seeded from this key.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.0)
    }
}

/// Endless source of per-batch keys.
///
/// `Fresh` splits the carried key at every step and yields one child, giving
/// a new batch each time. `Cycle` repeats a fixed set of keys so that training
/// sees a finite dataset of `n` unique batches. A `Cycle` over no keys is
/// exhausted immediately.
#[derive(Debug, Clone)]
pub enum KeyStream {
    Fresh(RngKey),
    Cycle { keys: Vec<RngKey>, position: usize },
}

impl KeyStream {
    pub fn fresh(key: RngKey) -> Self {
        KeyStream::Fresh(key)
    }

    /// Cycle through `num_unique` keys split from `key`; `0` means fresh
    /// keys forever.
    pub fn with_unique_batches(key: RngKey, num_unique: usize) -> Self {
        if num_unique == 0 {
            return KeyStream::Fresh(key);
        }
        KeyStream::Cycle {
            keys: key.split(num_unique),
            position: 0,
        }
    }
}

impl Iterator for KeyStream {
    type Item = RngKey;

    fn next(&mut self) -> Option<RngKey> {
        match self {
            KeyStream::Fresh(carry) => {
                let [next_carry, batch_key] = carry.split_array::<2>();
                *carry = next_carry;
                Some(batch_key)
            }
            KeyStream::Cycle { keys, position } => {
                if keys.is_empty() {
                    return None;
                }
                let index = *position % keys.len();
                *position = (index + 1) % keys.len();
                Some(keys[index])
            }
        }
    }
}
