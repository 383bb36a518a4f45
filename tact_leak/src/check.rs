// This file contains the "check" operation

use crate::dudect::{DudeCT, DudeResult};
use crate::measure::Sampler;
use crate::{InputPair, LeakReport, GIVE_UP_MIN_SAMPLES, SAMPLES_PER_ROUND, T_GIVE_UP, T_SUCCESS};
use log::info;
use tact_stats::p_value_from_t;
use tact_traits::{CycleTarget, TactError, TactResult};

/// Verdict of a check run.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    /// The two inputs take measurably different time.
    Leak(LeakReport),
    /// The t statistic stayed small after many samples; the target is
    /// probably constant time for this input pair.
    ConstantTime { t: f64, samples: usize },
}

/// Compares the timing of two given inputs through the same target.
pub struct Check<T>
where
    T: CycleTarget,
{
    target: T,
    sampler: Sampler,
    input: InputPair,
}

impl<T> Check<T>
where
    T: CycleTarget,
{
    // Create a new check operation with the given target and two inputs
    pub fn new(target: T, first: Vec<u8>, second: Vec<u8>) -> TactResult<Self> {
        if first.len() != second.len() {
            return Err(TactError::from(
                "the first input and the second input are not the same size",
            ));
        }

        if first.len() != target.input_len() {
            return Err(TactError::from(format!(
                "inputs must be {} bytes for this target",
                target.input_len()
            )));
        }

        Ok(Check {
            target,
            sampler: Sampler::new(),
            input: InputPair { first, second },
        })
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Samples until the t statistic either clears the success threshold or
    /// stays below the give-up threshold for long enough.
    pub fn run(&mut self) -> CheckResult {
        let mut dudect = DudeCT::new(
            T_SUCCESS,
            T_GIVE_UP,
            GIVE_UP_MIN_SAMPLES,
            &self.input.first,
            &self.input.second,
            &mut self.target,
            self.sampler,
        );

        loop {
            let (t, result) = dudect.sample(SAMPLES_PER_ROUND);
            let p = p_value_from_t(t);

            info!(
                "samples: {}, t-value: {}, confidence: {}%",
                dudect.len(),
                t,
                (1.0 - p) * 100.0
            );

            match result {
                DudeResult::Ok => {
                    let samples = dudect.len();
                    let cycles_diff = dudect.mean_difference();
                    drop(dudect);
                    return CheckResult::Leak(LeakReport {
                        t,
                        p,
                        samples,
                        cycles_diff,
                        pair: self.input.clone(),
                    });
                }
                DudeResult::Err => {
                    let samples = dudect.len();
                    return CheckResult::ConstantTime { t, samples };
                }
                DudeResult::Progress => {
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tact_traits::FnTarget;

    thread_local! {
        static TICKS: Cell<u64> = const { Cell::new(0) };
    }

    fn fake_counter() -> u64 {
        TICKS.with(|t| t.get())
    }

    fn advance(n: u64) {
        TICKS.with(|t| t.set(t.get() + n));
    }

    fn leaky_target() -> FnTarget<impl FnMut(&[u8])> {
        FnTarget::new(2, |input: &[u8]| {
            advance(500 + input[0] as u64 * 50);
        })
    }

    #[test]
    fn test_rejects_inputs_of_different_sizes() {
        let check = Check::new(leaky_target(), vec![0, 0], vec![1]);
        assert!(check.is_err());
    }

    #[test]
    fn test_rejects_inputs_of_wrong_size() {
        let check = Check::new(leaky_target(), vec![0; 3], vec![1; 3]);
        assert!(check.is_err());
    }

    #[test]
    fn test_finds_leak_between_slow_and_fast_inputs() {
        let mut check = Check::new(leaky_target(), vec![0, 0], vec![255, 0])
            .unwrap()
            .with_sampler(Sampler::with_counter(fake_counter));

        match check.run() {
            CheckResult::Leak(report) => {
                assert!(report.t >= 4.5);
                assert!((report.cycles_diff - 12_750.0).abs() < 1.0);
                assert_eq!(report.pair.first, vec![0, 0]);
                assert_eq!(report.pair.second, vec![255, 0]);
            }
            CheckResult::ConstantTime { .. } => panic!("expected a leak"),
        }
    }
}
