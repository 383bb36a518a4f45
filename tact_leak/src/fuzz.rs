// This file contains the "fuzz" operation

use crate::dudect::{DudeCT, DudeResult};
use crate::measure::Sampler;
use crate::optimizer::Optimizer;
use crate::{
    LeakReport, ScoredInputPair, GIVE_UP_MIN_SAMPLES, SAMPLES_PER_ROUND, T_GIVE_UP, T_SUCCESS,
};
use log::{debug, info};
use tact_stats::p_value_from_t;
use tact_traits::CycleTarget;

// Check evolution results once every 500 generations.
const CHECK_EVERY_GENERATIONS: usize = 500;

// A candidate is a local optimum when it tops this many consecutive checks.
const MOVING_WINDOW: usize = 10;

const DEFAULT_MAX_GENERATIONS: usize = 20_000;

/// Searches for variable-time input pairs: evolves candidates by measured
/// cycle difference, then confirms the winner the dudect way.
pub struct Fuzz<T>
where
    T: CycleTarget,
{
    target: T,
    sampler: Sampler,
    max_generations: usize,
}

impl<T> Fuzz<T>
where
    T: CycleTarget,
{
    pub fn new(target: T) -> Self {
        Fuzz {
            target,
            sampler: Sampler::new(),
            max_generations: DEFAULT_MAX_GENERATIONS,
        }
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_max_generations(mut self, max_generations: usize) -> Self {
        self.max_generations = max_generations;
        self
    }

    /// Runs the search. Returns `None` when the generation budget is spent
    /// without a confirmed leak, which is the good outcome for the target.
    pub fn run(&mut self) -> Option<LeakReport> {
        let input_len = self.target.input_len();
        let mut generations_left = self.max_generations;

        loop {
            // Evolution phase: find a candidate pair whose score maxes out.
            let candidate = {
                let sampler = self.sampler;
                let target = &mut self.target;
                let mut optimizer = Optimizer::new(input_len, |first: &[u8], second: &[u8]| {
                    ScoredInputPair::generate(sampler, target, first.to_vec(), second.to_vec())
                        .score
                });

                info!("Evolving candidate input pairs");
                let mut best = ScoredInputPair::default();
                let mut moving_window = vec![0.0; MOVING_WINDOW];

                loop {
                    if generations_left == 0 {
                        break None;
                    }
                    let round = CHECK_EVERY_GENERATIONS.min(generations_left);
                    for _ in 0..round {
                        optimizer.step();
                    }
                    generations_left -= round;

                    let population = optimizer.scored_population();
                    let pop_best = population[0].clone();

                    if pop_best.score != 0.0 {
                        debug!(
                            "candidate score {}: {:x?} vs {:x?}",
                            pop_best.score, pop_best.pair.first, pop_best.pair.second
                        );
                    } else {
                        info!("Looks constant-time so far...");
                    }

                    // Adjust moving window
                    moving_window.remove(0);
                    moving_window.push(pop_best.score);

                    if pop_best.score > best.score {
                        best = pop_best;
                    }

                    // The window holding nothing but the best score means the
                    // evolution is maxed out.
                    if best.score != 0.0 && moving_window.iter().all(|score| *score == best.score) {
                        break Some(best);
                    }
                }
            };

            let best = candidate?;

            info!(
                "Checking candidate pair {:x?} vs {:x?}",
                best.pair.first, best.pair.second
            );

            let mut dudect = DudeCT::new(
                T_SUCCESS,
                T_GIVE_UP,
                GIVE_UP_MIN_SAMPLES,
                &best.pair.first,
                &best.pair.second,
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
                        info!(
                            "Found timing difference of {} cycles with {}% confidence",
                            cycles_diff,
                            (1.0 - p) * 100.0
                        );
                        return Some(LeakReport {
                            t,
                            p,
                            samples,
                            cycles_diff,
                            pair: best.pair,
                        });
                    }
                    DudeResult::Err => {
                        info!(
                            "Candidate input pair rejected: t-statistic small after many samples. \
                             Continuing to evolve candidate inputs."
                        );
                        break;
                    }
                    DudeResult::Progress => {
                        continue;
                    }
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

    #[test]
    fn test_fuzz_finds_data_dependent_branch() {
        // Costs an extra kilocycle when the first byte is above 127, like a
        // secret-dependent branch.
        let target = FnTarget::new(1, |input: &[u8]| {
            let mut cost = 1_000;
            if input[0] > 127 {
                cost += 1_000;
            }
            TICKS.with(|t| t.set(t.get() + cost));
        });

        let report = Fuzz::new(target)
            .with_sampler(Sampler::with_counter(fake_counter))
            .run();

        let report = report.expect("expected a timing leak");
        assert!(report.t >= 4.5);
        assert!((report.cycles_diff - 1_000.0).abs() < 1.0);
        let first_slow = report.pair.first[0] > 127;
        let second_slow = report.pair.second[0] > 127;
        assert_ne!(first_slow, second_slow);
    }

    #[test]
    fn test_fuzz_gives_up_on_constant_time_target() {
        let target = FnTarget::new(1, |_input: &[u8]| {
            TICKS.with(|t| t.set(t.get() + 700));
        });

        let report = Fuzz::new(target)
            .with_sampler(Sampler::with_counter(fake_counter))
            .with_max_generations(1_000)
            .run();

        assert!(report.is_none());
    }
}
