use crate::{InputPair, ScoredInputPair};
use rand::{seq::SliceRandom, Rng};

// TODO: Find optimal values for these consts

// Population size
const POPULATION_SIZE: usize = 200;

// Mutation rate
const MUTATION_RATE: f64 = 0.05;

// Ratio of "large mutations" (random u8 replacement) vs "small mutations" u8 increment / decrement.
const LARGE_MUTATION_RATIO: f64 = 0.25;

// Directly clone this ratio of top performers
const CLONE_RATIO: f64 = 0.10;

// Breed from this top percentage of the population
const BREEDING_POOL: f64 = 0.25;

/// Generational genetic optimizer over input pairs.
/// The fitness function scores a pair; evolution maximizes the score.
pub struct Optimizer<T>
where
    T: FnMut(&[u8], &[u8]) -> f64,
{
    population: Vec<InputPair>,
    fitness: T,
}

impl<T> Optimizer<T>
where
    T: FnMut(&[u8], &[u8]) -> f64,
{
    pub fn new(len: usize, fitness_function: T) -> Self {
        Optimizer {
            population: initial_population(len),
            fitness: fitness_function,
        }
    }

    // Get the population, ordered most fit to least fit.
    pub fn population(&mut self) -> Vec<InputPair> {
        let mut scored = self.scored_population();

        let mut result: Vec<InputPair> = Vec::with_capacity(scored.len());
        for individual in scored.drain(..) {
            result.push(individual.pair);
        }

        result
    }

    // Get the scored population, ordered most fit to least fit.
    pub fn scored_population(&mut self) -> Vec<ScoredInputPair> {
        let mut scored: Vec<ScoredInputPair> = Vec::with_capacity(self.population.len());

        for individual in self.population.iter() {
            let fitness = (self.fitness)(&individual.first, &individual.second);
            scored.push(ScoredInputPair {
                score: fitness,
                pair: individual.clone(),
                ..Default::default()
            });
        }

        // Sort most fit to least fit
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        scored
    }

    pub fn average_score(&mut self) -> f64 {
        let scored = self.scored_population();
        let sum: f64 = scored.iter().map(|val| val.score).sum();
        sum / (scored.len() as f64)
    }

    pub fn step(&mut self) {
        // Get fitness of all individuals
        let mut scored: Vec<ScoredInputPair> = Vec::with_capacity(self.population.len());

        for individual in self.population.drain(..) {
            let fitness = (self.fitness)(&individual.first, &individual.second);
            scored.push(ScoredInputPair {
                score: fitness,
                pair: individual,
                ..Default::default()
            });
        }

        // Sort most fit to least fit
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        // Calculate number to clone and number to breed
        let num_clone: usize = (POPULATION_SIZE as f64 * CLONE_RATIO) as usize;
        let breed_pool: usize = (POPULATION_SIZE as f64 * BREEDING_POOL) as usize;
        let breed_fill: usize = POPULATION_SIZE - num_clone;

        // Create the next generation
        let mut next_gen: Vec<InputPair> = Vec::with_capacity(POPULATION_SIZE);

        // Clone the top contenders
        for scored_pair in scored.iter().take(num_clone) {
            next_gen.push(scored_pair.pair.clone());
        }

        // Breed and mutate the rest
        let mut rng = rand::thread_rng();
        for _ in 0..breed_fill {
            // Select two individuals
            let parent_one = &scored[rng.gen_range(0..breed_pool)].pair;
            let parent_two = &scored[rng.gen_range(0..breed_pool)].pair;

            let mut child = InputPair {
                first: breed_slice(&mut rng, &parent_one.first, &parent_two.first),
                second: breed_slice(&mut rng, &parent_one.second, &parent_two.second),
            };

            // Mutate
            if rng.gen_bool(MUTATION_RATE) {
                if rng.gen() {
                    mutate_slice(&mut rng, &mut child.first);
                } else {
                    mutate_slice(&mut rng, &mut child.second);
                }
            }

            next_gen.push(child);
        }

        self.population = next_gen;
    }
}

fn breed_slice<R: Rng>(rng: &mut R, first: &[u8], second: &[u8]) -> Vec<u8> {
    let mut child: Vec<u8> = Vec::with_capacity(first.len());
    for n in 0..first.len() {
        if rng.gen() {
            child.push(first[n]);
        } else {
            child.push(second[n]);
        }
    }

    child
}

fn mutate_slice<R: Rng>(rng: &mut R, slice: &mut [u8]) {
    // OK to unwrap here, slice should never be empty
    let mutating_gene = slice.choose_mut(rng).unwrap();

    if rng.gen_bool(LARGE_MUTATION_RATIO) {
        // Large mutation, assign another random u8
        *mutating_gene = rng.gen();
    } else {
        // Small mutation, increment or decrement
        if rng.gen() {
            *mutating_gene = mutating_gene.wrapping_add(1);
        } else {
            *mutating_gene = mutating_gene.wrapping_sub(1);
        }
    }
}

fn initial_population(len: usize) -> Vec<InputPair> {
    let mut population = Vec::with_capacity(POPULATION_SIZE);
    for _ in 0..POPULATION_SIZE {
        population.push(random_individual(len));
    }
    population
}

fn random_individual(len: usize) -> InputPair {
    InputPair {
        first: (0..len).map(|_| rand::random::<u8>()).collect(),
        second: (0..len).map(|_| rand::random::<u8>()).collect(),
    }
}
