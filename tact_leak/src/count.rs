// This file contains the "count" operation

use crate::measure::Sampler;
use tact_clock::CycleCount;
use tact_traits::{CycleTarget, TactError, TactResult};

// Enough repetitions to shake preemption out of the minimum.
const DEFAULT_REPS: usize = 16;

/// Counts the cycles consumed by a target for a single input.
pub struct Count<T>
where
    T: CycleTarget,
{
    target: T,
    input: Vec<u8>,
    sampler: Sampler,
    reps: usize,
}

impl<T> Count<T>
where
    T: CycleTarget,
{
    // Create a new count operation with the given target and one input
    pub fn new(target: T, input: Vec<u8>) -> TactResult<Self> {
        if input.len() != target.input_len() {
            return Err(TactError::from(format!(
                "input must be {} bytes for this target",
                target.input_len()
            )));
        }

        Ok(Count {
            target,
            input,
            sampler: Sampler::new(),
            reps: DEFAULT_REPS,
        })
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_reps(mut self, reps: usize) -> Self {
        self.reps = reps.max(1);
        self
    }

    /// The smallest cycle count observed for the input.
    pub fn run(&mut self) -> CycleCount {
        self.sampler
            .min_cycles(&mut self.target, &self.input, self.reps)
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

    #[test]
    fn test_rejects_input_of_wrong_size() {
        let target = FnTarget::new(4, |_input: &[u8]| {});
        assert!(Count::new(target, vec![0; 3]).is_err());
    }

    #[test]
    fn test_counts_input_dependent_cost() {
        let target = FnTarget::new(1, |input: &[u8]| {
            TICKS.with(|t| t.set(t.get() + 100 + input[0] as u64));
        });
        let mut count = Count::new(target, vec![50])
            .unwrap()
            .with_sampler(Sampler::with_counter(fake_counter));

        assert_eq!(count.run().as_raw(), 150);
    }

    #[test]
    fn test_count_on_hardware_counter() {
        let target = FnTarget::new(8, |input: &[u8]| {
            std::hint::black_box(input.iter().fold(0u64, |acc, &b| acc.wrapping_add(b as u64)));
        });
        let mut count = Count::new(target, vec![1; 8]).unwrap();
        // Sane value, no wraparound between the two reads.
        assert!(count.run().as_raw() < u64::MAX / 2);
    }
}
