use crate::measure::Sampler;
use rolling_stats::Stats;
use tact_stats::welch_t;
use tact_traits::CycleTarget;

#[derive(Eq, PartialEq, Debug)]
pub enum DudeResult {
    Ok,       // Success
    Err,      // Failure
    Progress, // Neither success nor failure, still in progress.
}

/// Online dudect-style tester: keeps sampling the two inputs through the same
/// target and watches the t statistic between the two cycle distributions.
pub struct DudeCT<'a, T>
where
    T: CycleTarget,
{
    t_threshold: f64,
    t_fail: f64,
    fail_min_samples: usize,
    first: &'a [u8],
    second: &'a [u8],
    target: &'a mut T,
    sampler: Sampler,
    first_stats: Stats<f64>,
    second_stats: Stats<f64>,
}

impl<'a, T> DudeCT<'a, T>
where
    T: CycleTarget,
{
    pub fn new(
        t_threshold: f64,
        t_fail: f64,
        fail_min_samples: usize,
        first: &'a [u8],
        second: &'a [u8],
        target: &'a mut T,
        sampler: Sampler,
    ) -> Self {
        DudeCT {
            t_threshold,
            t_fail,
            fail_min_samples,
            first,
            second,
            target,
            sampler,
            first_stats: Stats::new(),
            second_stats: Stats::new(),
        }
    }

    /// Total number of measurements taken so far, both inputs included.
    pub fn len(&self) -> usize {
        self.first_stats.count as usize + self.second_stats.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute difference between the two mean cycle counts.
    pub fn mean_difference(&self) -> f64 {
        (self.first_stats.mean - self.second_stats.mean).abs()
    }

    /// Takes `num_samples` interleaved measurements of each input and returns
    /// the t statistic together with the verdict so far.
    pub fn sample(&mut self, num_samples: u64) -> (f64, DudeResult) {
        for _ in 0..num_samples {
            let first_cycles = self.sampler.cycles(self.target, self.first);
            self.first_stats.update(first_cycles.as_raw() as f64);

            let second_cycles = self.sampler.cycles(self.target, self.second);
            self.second_stats.update(second_cycles.as_raw() as f64);
        }

        let t = welch_t(&self.first_stats, &self.second_stats);

        // Return results when t value is above threshold
        if t >= self.t_threshold {
            (t, DudeResult::Ok)
        }
        // Check if we should give up
        else if self.first_stats.count as usize > self.fail_min_samples && t <= self.t_fail {
            (t, DudeResult::Err)
        } else {
            // Neither success nor failure, keep going.
            (t, DudeResult::Progress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static TICKS: Cell<u64> = const { Cell::new(0) };
    }

    fn fake_counter() -> u64 {
        TICKS.with(|t| t.get())
    }

    fn advance(n: u64) {
        TICKS.with(|t| t.set(t.get() + n));
    }

    /// Costs cycles proportional to the input byte, like a data-dependent loop.
    struct LeakyTarget;

    impl CycleTarget for LeakyTarget {
        fn input_len(&self) -> usize {
            1
        }

        fn execute(&mut self, input: &[u8]) {
            advance(1_000 + input[0] as u64 * 100);
        }
    }

    /// Input-independent cost with a small input-independent jitter, so the
    /// variance is non-zero but the means match.
    struct ConstantTarget {
        calls: u64,
    }

    impl CycleTarget for ConstantTarget {
        fn input_len(&self) -> usize {
            1
        }

        fn execute(&mut self, _input: &[u8]) {
            let mut cost = 1_000;
            if self.calls % 3 == 0 {
                cost += 1;
            }
            self.calls += 1;
            advance(cost);
        }
    }

    #[test]
    fn test_detects_data_dependent_timing() {
        let mut target = LeakyTarget;
        let first = [0u8];
        let second = [200u8];
        let mut dudect = DudeCT::new(
            4.5,
            0.674,
            100_000,
            &first,
            &second,
            &mut target,
            Sampler::with_counter(fake_counter),
        );

        let (t, result) = dudect.sample(100);
        assert_eq!(result, DudeResult::Ok);
        assert!(t > 4.5);
        assert_eq!(dudect.len(), 200);
        assert!((dudect.mean_difference() - 20_000.0).abs() < 1.0);
    }

    #[test]
    fn test_gives_up_on_constant_time_target() {
        let mut target = ConstantTarget { calls: 0 };
        let first = [0u8];
        let second = [200u8];
        let mut dudect = DudeCT::new(
            4.5,
            0.674,
            50,
            &first,
            &second,
            &mut target,
            Sampler::with_counter(fake_counter),
        );

        let (t, result) = dudect.sample(300);
        assert_eq!(result, DudeResult::Err);
        assert!(t < 0.674);
    }

    #[test]
    fn test_reports_progress_before_verdict() {
        let mut target = ConstantTarget { calls: 0 };
        let first = [7u8];
        let second = [7u8];
        let mut dudect = DudeCT::new(
            4.5,
            0.674,
            1_000_000,
            &first,
            &second,
            &mut target,
            Sampler::with_counter(fake_counter),
        );

        let (_t, result) = dudect.sample(100);
        assert_eq!(result, DudeResult::Progress);
    }
}
