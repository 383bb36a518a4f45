use std::error::Error;
use std::fmt::{Display, Formatter};

/// Common tact Error type.
#[derive(Debug)]
pub struct TactError {
    message: String,
    cause: Option<String>,
}

impl Display for TactError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}\n   cause: {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for TactError {}

impl From<&str> for TactError {
    fn from(s: &str) -> TactError {
        TactError {
            message: s.to_string(),
            cause: None,
        }
    }
}

impl From<String> for TactError {
    fn from(s: String) -> TactError {
        TactError {
            message: s,
            cause: None,
        }
    }
}

impl TactError {
    pub fn new_with_cause(message: &str, cause: impl Error) -> Self {
        TactError {
            message: message.to_string(),
            cause: Some(cause.to_string()),
        }
    }

    pub fn add_context(mut self, context: &str) -> TactError {
        self.cause = Some(context.into());
        self
    }
}

// Generic Result type for tact.
pub type TactResult<T> = Result<T, TactError>;

/// Anything that can be driven with a byte input and measured in elapsed cycles.
/// The two inputs of a timing comparison are fed through the same target so the
/// only varying factor is the input content itself.
pub trait CycleTarget {
    /// The exact size in bytes of the inputs this target accepts.
    fn input_len(&self) -> usize;

    /// Runs the operation under measurement once with the given input.
    fn execute(&mut self, input: &[u8]);
}

/// Adapter to use a plain closure as a measurement target.
pub struct FnTarget<F>
where
    F: FnMut(&[u8]),
{
    len: usize,
    f: F,
}

impl<F> FnTarget<F>
where
    F: FnMut(&[u8]),
{
    pub fn new(len: usize, f: F) -> Self {
        FnTarget { len, f }
    }
}

impl<F> CycleTarget for FnTarget<F>
where
    F: FnMut(&[u8]),
{
    fn input_len(&self) -> usize {
        self.len
    }

    fn execute(&mut self, input: &[u8]) {
        (self.f)(input)
    }
}
