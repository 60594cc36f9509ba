/// Weighted job selection
///
/// Probabilities are integers over `WEIGHT_UNIT`. Each inject/develop
/// `mining.notify` draws one uniform integer in `[0, WEIGHT_UNIT)` and is shown
/// to the miner only when the draw falls below that upstream's weight.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Correction factor applied to the per-mille base. Three upstreams compete
/// for the miner, so each draw is scaled by three.
pub const CORRECTION: u32 = 3;

/// Denominator for every draw.
pub const WEIGHT_UNIT: u32 = 1000 * CORRECTION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Weights {
    pub inject: u32,
    pub develop: u32,
}

impl Weights {
    /// The develop share is reserved first; the inject share is capped to
    /// whatever is left, so `inject + develop <= WEIGHT_UNIT` always holds.
    pub fn new(inject_fraction: f64, develop_fraction: f64) -> Self {
        let unit = WEIGHT_UNIT as f64;
        let develop = (unit * sanitize(develop_fraction)) as u32;
        let inject = ((unit * sanitize(inject_fraction)) as u32).min(WEIGHT_UNIT - develop);

        Self { inject, develop }
    }
}

fn sanitize(fraction: f64) -> f64 {
    if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// One upstream's thinning filter. Each pump owns its own so draws are
/// independent.
pub struct JobFilter {
    weight: u32,
    rng: StdRng,
}

impl JobFilter {
    /// Seeded from OS entropy.
    pub fn new(weight: u32) -> Self {
        Self {
            weight,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(weight: u32, seed: u64) -> Self {
        Self {
            weight,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Draw once; true means the job goes to the miner.
    pub fn admit(&mut self) -> bool {
        self.rng.gen_range(0..WEIGHT_UNIT) < self.weight
    }
}
