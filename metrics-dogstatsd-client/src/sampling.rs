use std::cell::RefCell;

use rand::{Rng as _, SeedableRng as _};
use rand_xoshiro::Xoshiro256StarStar;

thread_local! {
    static FAST_RNG: RefCell<Xoshiro256StarStar> = RefCell::new(Xoshiro256StarStar::from_rng(&mut rand::rng()));
}

/// Decides whether a sample with the given rate should be kept.
///
/// Samples with a rate of 1.0 or more are always kept. Otherwise, a thread-local PRNG ([Xoshiro256**][xoshiro]) keeps
/// the sample with a probability equal to `rate`.
///
/// [xoshiro]: https://prng.di.unimi.it/
pub(crate) fn should_sample(rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }

    FAST_RNG.with(|rng| rng.borrow_mut().random::<f64>() < rate)
}
