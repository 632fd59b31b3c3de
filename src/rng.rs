//! Seeded random number generators.
//!
//! Every channel gets its own generator derived from the run seed, so a
//! channel's random draws do not depend on how other channels interleave.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Multiplier used to spread channel ids over the seed space (golden ratio).
const CHANNEL_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Create a random number generator, optionally seeded for reproducibility.
///
/// With `None` the generator is seeded from OS entropy.
#[must_use]
pub fn create_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Create the generator of one channel from the run seed.
#[must_use]
pub fn channel_rng(seed: Option<u64>, channel: u32) -> StdRng {
    create_rng(seed.map(|s| s ^ u64::from(channel).wrapping_mul(CHANNEL_SEED_STRIDE)))
}
