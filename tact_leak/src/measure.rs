use std::hint::black_box;
use tact_clock::CycleCount;
use tact_traits::CycleTarget;

fn hardware_counter() -> u64 {
    tact_clock::read_cycles().as_raw()
}

/// Measures target executions in elapsed cycles.
///
/// The counter is held as a plain function pointer so tests can substitute a
/// deterministic source for the hardware counter.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    read_counter: fn() -> u64,
}

impl Sampler {
    pub fn new() -> Self {
        Sampler {
            read_counter: hardware_counter,
        }
    }

    pub fn with_counter(read_counter: fn() -> u64) -> Self {
        Sampler { read_counter }
    }

    /// Cycles consumed by one execution of the target with the given input.
    /// The input goes through a black box so the call cannot be optimized away.
    pub fn cycles<T>(&self, target: &mut T, input: &[u8]) -> CycleCount
    where
        T: CycleTarget + ?Sized,
    {
        let start = (self.read_counter)();
        target.execute(black_box(input));
        let end = (self.read_counter)();
        CycleCount(end.wrapping_sub(start))
    }

    /// The smallest cycle count over `reps` executions.
    /// The minimum is the execution least disturbed by interrupts and
    /// scheduling.
    pub fn min_cycles<T>(&self, target: &mut T, input: &[u8], reps: usize) -> CycleCount
    where
        T: CycleTarget + ?Sized,
    {
        let mut best = self.cycles(target, input);
        for _ in 1..reps {
            best = best.min(self.cycles(target, input));
        }
        best
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}
