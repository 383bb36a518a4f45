use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::fmt::{Display, Formatter};
use std::hint::black_box;
use tact_leak::{Check, CheckResult, Count, FnTarget, Fuzz, LeakReport};
use tact_traits::{TactError, TactResult};

const SECRET: [u8; 16] = *b"orpheus in tact!";

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Routine {
    /// Early-exit byte comparison, returns on the first mismatch.
    Naive,
    /// Constant-time xor-accumulator comparison.
    Ct,
}

impl Display for Routine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Routine::Naive => write!(f, "naive"),
            Routine::Ct => write!(f, "ct"),
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Hunts timing side-channels in memcmp flavors using the cycle counter")]
struct Cli {
    /// Which comparison routine to measure
    #[arg(short, long, value_enum, default_value_t = Routine::Naive)]
    routine: Routine,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evolve an input pair exposing a timing difference in the routine
    Fuzz,
    /// Compare the timing of two inputs in hexadecimal format
    Check { input1: String, input2: String },
    /// Count the cycles consumed for a single input in hexadecimal format
    Count { input: String },
}

fn naive_eq(a: &[u8], b: &[u8]) -> bool {
    for i in 0..a.len() {
        if a[i] != b[i] {
            return false;
        }
    }
    true
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = 0u8;
    for i in 0..a.len() {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

fn comparison_target(routine: Routine) -> FnTarget<impl FnMut(&[u8])> {
    FnTarget::new(SECRET.len(), move |input: &[u8]| {
        let equal = match routine {
            Routine::Naive => naive_eq(&SECRET, input),
            Routine::Ct => ct_eq(&SECRET, input),
        };
        black_box(equal);
    })
}

fn decode_input(hex_input: &str) -> TactResult<Vec<u8>> {
    hex::decode(hex_input)
        .map_err(|e| TactError::new_with_cause("could not decode hexadecimal input", e))
}

fn print_report(report: &LeakReport) {
    println!(
        "Found timing difference of {} cycles between these two inputs with {}% confidence:",
        report.cycles_diff,
        (1.0 - report.p) * 100.0
    );
    println!("input 1: {}", hex::encode(&report.pair.first));
    println!("input 2: {}", hex::encode(&report.pair.second));
}

fn main() -> TactResult<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("Failed to create logger");

    debug!("measuring the {} comparison routine", cli.routine);

    match cli.command {
        Command::Fuzz => {
            let mut fuzz = Fuzz::new(comparison_target(cli.routine));
            match fuzz.run() {
                Some(report) => print_report(&report),
                None => println!("No timing difference found within the generation budget."),
            }
        }
        Command::Check { input1, input2 } => {
            let first = decode_input(&input1)?;
            let second = decode_input(&input2)?;
            let mut check = Check::new(comparison_target(cli.routine), first, second)?;
            match check.run() {
                CheckResult::Leak(report) => print_report(&report),
                CheckResult::ConstantTime { t, samples } => {
                    println!(
                        "t-statistic {t} small after {samples} samples. \
                         Routine is probably constant time for these inputs."
                    );
                }
            }
        }
        Command::Count { input } => {
            let input = decode_input(&input)?;
            let mut count = Count::new(comparison_target(cli.routine), input)?;
            println!("{}", count.run().as_raw());
        }
    }

    Ok(())
}
