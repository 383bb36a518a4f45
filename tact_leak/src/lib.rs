//! Timing side-channel detection built on the hardware cycle counter.
//! Candidate input pairs are evolved until they show a stable cycle
//! difference, then confirmed statistically the dudect way.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

mod check;
mod count;
mod dudect;
mod fuzz;
mod measure;
mod optimizer;

pub use check::{Check, CheckResult};
pub use count::Count;
pub use dudect::{DudeCT, DudeResult};
pub use fuzz::Fuzz;
pub use measure::Sampler;
pub use optimizer::Optimizer;
pub use tact_traits::{CycleTarget, FnTarget};

// Return success on t = 4.5 (very high confidence).
// Give up on t < 0.674 (50% confidence) when over 100k samples.
pub(crate) const T_SUCCESS: f64 = 4.5;
pub(crate) const T_GIVE_UP: f64 = 0.674;
pub(crate) const GIVE_UP_MIN_SAMPLES: usize = 100_000;
pub(crate) const SAMPLES_PER_ROUND: u64 = 10_000;

/// A candidate pair of inputs to compare against each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct InputPair {
    pub first: Vec<u8>,
    pub second: Vec<u8>,
}

/// An input pair together with its measured cycle difference.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct ScoredInputPair {
    pub score: f64,
    pub highest: f64,
    pub lowest: f64,
    pub pair: InputPair,
}

// The raw counter is noisy; score on the minimum of a few reps so equal
// candidates keep scoring equal.
const SCORE_REPS: usize = 4;

impl ScoredInputPair {
    /// Scores a pair by the cycle difference between its two inputs.
    pub fn generate<T: CycleTarget>(
        sampler: Sampler,
        target: &mut T,
        first: Vec<u8>,
        second: Vec<u8>,
    ) -> Self {
        let first_cycles = sampler.min_cycles(target, &first, SCORE_REPS).as_raw() as f64;
        let second_cycles = sampler.min_cycles(target, &second, SCORE_REPS).as_raw() as f64;

        let (highest, lowest) = if first_cycles >= second_cycles {
            (first_cycles, second_cycles)
        } else {
            (second_cycles, first_cycles)
        };

        ScoredInputPair {
            score: highest - lowest,
            highest,
            lowest,
            pair: InputPair { first, second },
        }
    }
}

/// A confirmed timing leak.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct LeakReport {
    /// The t statistic at the moment the verdict fired.
    pub t: f64,
    /// Two-tailed p-value for that t.
    pub p: f64,
    /// Total measurements taken by the confirmation run.
    pub samples: usize,
    /// Mean cycle difference between the two inputs.
    pub cycles_diff: f64,
    /// The two inputs that time differently.
    pub pair: InputPair,
}
