use portable_atomic::{AtomicU64, Ordering};
use tact_traits::{TactError, TactResult};

const CALIBRATION_PERIOD_NS: u64 = 10_000_000;

/// Frequency estimation for converting raw counter-values to nanoseconds.
/// One global instance backs the clock; tests can hold their own.
pub struct Calibration {
    frequency_ns: AtomicU64,
    init_counter: AtomicU64,
    init_time_ns: AtomicU64,
}

impl Calibration {
    pub const fn new() -> Self {
        Calibration {
            frequency_ns: AtomicU64::new(0),
            init_counter: AtomicU64::new(0),
            init_time_ns: AtomicU64::new(0),
        }
    }

    /// Calibrates the cycle counter vs. a real time clock.
    /// Takes the counter reader, an RTC reader in nanoseconds and a sleep
    /// function so the whole procedure stays testable with synthetic sources.
    pub fn calibrate(
        &self,
        read_raw_counter: fn() -> u64,
        read_rtc_ns: impl Fn() -> u64,
        sleep_ns: impl Fn(u64),
    ) -> TactResult<()> {
        let start_counter = read_raw_counter();
        let start_time = read_rtc_ns();

        sleep_ns(CALIBRATION_PERIOD_NS);

        let end_counter = read_raw_counter();
        let end_time = read_rtc_ns();

        let counter_diff = end_counter.wrapping_sub(start_counter);
        let time_diff_ns = end_time.saturating_sub(start_time);

        if counter_diff == 0 {
            return Err(TactError::from(
                "calibration failed: cycle counter did not advance",
            ));
        }
        if time_diff_ns == 0 {
            return Err(TactError::from(
                "calibration failed: RTC delta is zero; check RTC hardware/clock source",
            ));
        }

        let freq_ns_u128 =
            (u128::from(counter_diff) * 1_000_000_000u128) / u128::from(time_diff_ns);
        let freq_ns = u64::try_from(freq_ns_u128).unwrap_or(u64::MAX);
        self.frequency_ns.store(freq_ns, Ordering::Relaxed);
        self.init_counter.store(start_counter, Ordering::Relaxed);
        self.init_time_ns.store(start_time, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_calibrated(&self) -> bool {
        self.frequency_ns.load(Ordering::Relaxed) != 0
    }

    /// Counter increments per second, as estimated by the last calibration.
    pub fn frequency_hz(&self) -> u64 {
        self.frequency_ns.load(Ordering::Relaxed)
    }

    /// Translates a raw counter-value to real time nanoseconds.
    /// Requires a successful [`Calibration::calibrate`] run first; a zero
    /// frequency divides by zero here and the panic is deliberate fail-fast.
    pub fn counter_to_nanos(&self, counter: u64) -> u64 {
        let freq = self.frequency_ns.load(Ordering::Relaxed);
        let init_counter = self.init_counter.load(Ordering::Relaxed);
        let init_time_ns = self.init_time_ns.load(Ordering::Relaxed);
        let counter_diff = counter.wrapping_sub(init_counter);

        init_time_ns.saturating_add(((counter_diff as u128 * 1_000_000_000) / freq as u128) as u64)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_CALIBRATION: Calibration = Calibration::new();

/// Calibrates the process-wide instance used by [`crate::CycleClock`].
pub fn calibrate(
    read_raw_counter: fn() -> u64,
    read_rtc_ns: impl Fn() -> u64,
    sleep_ns: impl Fn(u64),
) -> TactResult<()> {
    GLOBAL_CALIBRATION.calibrate(read_raw_counter, read_rtc_ns, sleep_ns)
}

pub fn is_calibrated() -> bool {
    GLOBAL_CALIBRATION.is_calibrated()
}

pub fn counter_to_nanos(counter: u64) -> u64 {
    GLOBAL_CALIBRATION.counter_to_nanos(counter)
}
