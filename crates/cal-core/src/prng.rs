//! Reproducible per-object random draws.
//!
//! Smearing must give the same answer for the same object no matter how the
//! input is chunked or how often it is reprocessed. Each draw is seeded from
//! an `XxHash64` digest of the object's own keys (bit patterns of its floats
//! plus the event number), so no generator state is shared between objects.

use std::hash::Hasher;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use twox_hash::XxHash64;

/// Digest of floating-point keys and an event number.
pub fn seed_from(keys: &[f64], event: u64) -> u64 {
    let mut h = XxHash64::with_seed(0);
    for k in keys {
        h.write_u64(k.to_bits());
    }
    h.write_u64(event);
    h.finish()
}

/// One standard-normal draw for `seed`.
pub fn standard_normal(seed: u64) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed);
    StandardNormal.sample(&mut rng)
}

/// One uniform draw in `[0, 1)` for `seed`.
pub fn uniform(seed: u64) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed);
    rng.random::<f64>()
}

/// One uniform integer in the inclusive range `[lo, hi]` for `seed`.
pub fn uniform_in(seed: u64, lo: u32, hi: u32) -> u32 {
    let mut rng = StdRng::seed_from_u64(seed);
    rng.random_range(lo..=hi)
}
