#[cfg(test)]
#[macro_use]
extern crate approx;
use bincode::de::BorrowDecoder;
use bincode::de::Decoder;
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::BorrowDecode;
use bincode::{Decode, Encode};
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{AddAssign, Div, Mul, SubAssign};
use std::sync::{Arc, Once};
use std::time::Duration;

mod calibration;
pub use calibration::{calibrate, counter_to_nanos, is_calibrated, Calibration};

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
use x86_64 as arch;

#[cfg(target_arch = "x86")]
mod x86;
#[cfg(target_arch = "x86")]
use x86 as arch;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
use aarch64 as arch;

#[cfg(target_arch = "riscv64")]
mod riscv64;
#[cfg(target_arch = "riscv64")]
use riscv64 as arch;

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "riscv64"
)))]
mod fallback;
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "riscv64"
)))]
use fallback as arch;

/// A raw reading of the processor's cycle counter.
/// The underlying type is a u64 counting cycles since an unspecified reference
/// point, typically the last processor reset. It is a fixed 64bit value on
/// every platform, whatever the native word size is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct CycleCount(pub u64);

impl CycleCount {
    pub fn as_raw(&self) -> u64 {
        let Self(cycles) = self;
        *cycles
    }

    /// Cycles elapsed since an earlier reading, modulo 64bit wraparound.
    pub fn elapsed_since(&self, earlier: CycleCount) -> CycleCount {
        let Self(now) = self;
        let CycleCount(earlier) = earlier;
        CycleCount(now.wrapping_sub(earlier))
    }
}

impl From<u64> for CycleCount {
    fn from(cycles: u64) -> Self {
        CycleCount(cycles)
    }
}

impl From<CycleCount> for u64 {
    fn from(val: CycleCount) -> Self {
        let CycleCount(cycles) = val;
        cycles
    }
}

/// The counter as the signed 64bit value the instruction historically returned.
impl From<CycleCount> for i64 {
    fn from(val: CycleCount) -> Self {
        let CycleCount(cycles) = val;
        cycles as i64
    }
}

impl Sub for CycleCount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self.elapsed_since(rhs)
    }
}

impl Add for CycleCount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        let CycleCount(lhs) = self;
        let CycleCount(rhs) = rhs;
        CycleCount(lhs.wrapping_add(rhs))
    }
}

impl Encode for CycleCount {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let CycleCount(cycles) = self;
        cycles.encode(encoder)
    }
}

impl Decode for CycleCount {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(CycleCount(u64::decode(decoder)?))
    }
}

impl<'de> BorrowDecode<'de> for CycleCount {
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(CycleCount(u64::decode(decoder)?))
    }
}

impl Display for CycleCount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Self(cycles) = *self;
        if cycles >= 1_000_000_000 {
            write!(f, "{:.3} Gcy", cycles as f64 / 1_000_000_000.0)
        } else if cycles >= 1_000_000 {
            write!(f, "{:.3} Mcy", cycles as f64 / 1_000_000.0)
        } else if cycles >= 1_000 {
            write!(f, "{:.3} kcy", cycles as f64 / 1_000.0)
        } else {
            write!(f, "{cycles} cy")
        }
    }
}

/// Reads the current value of the processor's cycle counter.
///
/// This is a single non-serialized read: rdtsc on x86/x86_64, the virtual
/// counter on aarch64, rdcycle on riscv64 and a wall clock fallback elsewhere.
/// No check is made for counter availability or privilege level; on a platform
/// where the instruction is unavailable the read faults at the hardware level.
/// Counters are per-core and not guaranteed to be synchronized across cores,
/// so only compare two readings taken on the same core.
#[inline]
#[must_use]
pub fn read_cycles() -> CycleCount {
    CycleCount(arch::read_raw_counter())
}

/// For measurement times, the underlying type is a u64 representing nanoseconds.
/// It is always positive to simplify the reasoning on the user side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct TactDuration(pub u64);

impl TactDuration {
    pub const MIN: TactDuration = TactDuration(0u64);
    pub const MAX: TactDuration = TactDuration(u64::MAX);

    pub fn max(self, other: TactDuration) -> TactDuration {
        let Self(lhs) = self;
        let Self(rhs) = other;
        TactDuration(lhs.max(rhs))
    }

    pub fn min(self, other: TactDuration) -> TactDuration {
        let Self(lhs) = self;
        let Self(rhs) = other;
        TactDuration(lhs.min(rhs))
    }

    pub fn as_nanos(&self) -> u64 {
        let Self(nanos) = self;
        *nanos
    }
}

/// bridge the API with standard Durations.
impl From<Duration> for TactDuration {
    fn from(duration: Duration) -> Self {
        TactDuration(duration.as_nanos() as u64)
    }
}

impl From<TactDuration> for Duration {
    fn from(val: TactDuration) -> Self {
        let TactDuration(nanos) = val;
        Duration::from_nanos(nanos)
    }
}

impl From<u64> for TactDuration {
    fn from(duration: u64) -> Self {
        TactDuration(duration)
    }
}

impl From<TactDuration> for u64 {
    fn from(val: TactDuration) -> Self {
        let TactDuration(nanos) = val;
        nanos
    }
}

impl Sub for TactDuration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        let TactDuration(lhs) = self;
        let TactDuration(rhs) = rhs;
        TactDuration(lhs - rhs)
    }
}

impl Add for TactDuration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        let TactDuration(lhs) = self;
        let TactDuration(rhs) = rhs;
        TactDuration(lhs + rhs)
    }
}

impl AddAssign for TactDuration {
    fn add_assign(&mut self, rhs: Self) {
        let TactDuration(lhs) = self;
        let TactDuration(rhs) = rhs;
        *lhs += rhs;
    }
}

impl SubAssign for TactDuration {
    fn sub_assign(&mut self, rhs: Self) {
        let TactDuration(lhs) = self;
        let TactDuration(rhs) = rhs;
        *lhs -= rhs;
    }
}

// a way to divide a duration by a scalar.
// useful to compute averages for example.
impl<T> Div<T> for TactDuration
where
    T: Into<u64>,
{
    type Output = Self;
    fn div(self, rhs: T) -> Self {
        let TactDuration(lhs) = self;
        TactDuration(lhs / rhs.into())
    }
}

// a way to multiply a duration by a scalar.
// useful to compute offsets for example.
impl<T> Mul<T> for TactDuration
where
    T: Into<u64>,
{
    type Output = TactDuration;

    fn mul(self, rhs: T) -> TactDuration {
        let TactDuration(lhs) = self;
        TactDuration(lhs * rhs.into())
    }
}

// u64 * TactDuration
impl Mul<TactDuration> for u64 {
    type Output = TactDuration;

    fn mul(self, rhs: TactDuration) -> TactDuration {
        let TactDuration(nanos) = rhs;
        TactDuration(self * nanos)
    }
}

impl Encode for TactDuration {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let TactDuration(nanos) = self;
        nanos.encode(encoder)
    }
}

impl Decode for TactDuration {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(TactDuration(u64::decode(decoder)?))
    }
}

impl<'de> BorrowDecode<'de> for TactDuration {
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(TactDuration(u64::decode(decoder)?))
    }
}

impl Display for TactDuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Self(nanos) = *self;
        if nanos >= 86_400_000_000_000 {
            write!(f, "{:.3} d", nanos as f64 / 86_400_000_000_000.0)
        } else if nanos >= 3_600_000_000_000 {
            write!(f, "{:.3} h", nanos as f64 / 3_600_000_000_000.0)
        } else if nanos >= 60_000_000_000 {
            write!(f, "{:.3} m", nanos as f64 / 60_000_000_000.0)
        } else if nanos >= 1_000_000_000 {
            write!(f, "{:.3} s", nanos as f64 / 1_000_000_000.0)
        } else if nanos >= 1_000_000 {
            write!(f, "{:.3} ms", nanos as f64 / 1_000_000.0)
        } else if nanos >= 1_000 {
            write!(f, "{:.3} µs", nanos as f64 / 1_000.0)
        } else {
            write!(f, "{nanos} ns")
        }
    }
}

/// A measurement time is just a duration from a fixed point in time.
pub type TactTime = TactDuration;

static GLOBAL_CALIBRATION_ONCE: Once = Once::new();

/// Calibrates the process-wide counter-to-nanoseconds conversion once,
/// against the system clock. The first call blocks for the calibration
/// period (10ms); later calls are free.
fn ensure_calibrated() {
    GLOBAL_CALIBRATION_ONCE.call_once(|| {
        calibration::calibrate(
            arch::read_raw_counter,
            || {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap()
                    .as_nanos() as u64
            },
            |ns| std::thread::sleep(Duration::from_nanos(ns)),
        )
        .expect("cycle counter calibration failed");
    });
}

#[derive(Clone, Debug)]
enum ClockSource {
    Counter,
    Mock(Arc<portable_atomic::AtomicU64>),
}

/// A running measurement clock.
/// The clock is a monotonic clock that starts at an arbitrary reference time.
/// It is clone resilient, ie a clone will be the same clock, even when mocked.
#[derive(Clone, Debug)]
pub struct CycleClock {
    inner: ClockSource,
    ref_time_ns: u64,
}

/// A mock clock that can be controlled by the user.
#[derive(Debug, Clone)]
pub struct CycleClockMock(Arc<portable_atomic::AtomicU64>);

impl CycleClockMock {
    pub fn increment(&self, amount: Duration) {
        let Self(nanos) = self;
        nanos.fetch_add(amount.as_nanos() as u64, portable_atomic::Ordering::SeqCst);
    }

    /// Decrements the time by the given amount.
    /// Be careful this breaks the monotonicity of the clock.
    pub fn decrement(&self, amount: Duration) {
        let Self(nanos) = self;
        nanos.fetch_sub(amount.as_nanos() as u64, portable_atomic::Ordering::SeqCst);
    }

    /// Gets the current value of time.
    pub fn value(&self) -> u64 {
        let Self(nanos) = self;
        nanos.load(portable_atomic::Ordering::SeqCst)
    }

    /// A convenient way to get the current time from the mocking side.
    pub fn now(&self) -> TactTime {
        self.value().into()
    }

    /// Sets the absolute value of the time.
    pub fn set_value(&self, value: u64) {
        let Self(nanos) = self;
        nanos.store(value, portable_atomic::Ordering::SeqCst);
    }
}

impl CycleClock {
    /// Creates a CycleClock using now as its reference time.
    /// It will start at 0ns incrementing monotonically.
    pub fn new() -> Self {
        ensure_calibrated();
        let ref_time_ns = calibration::counter_to_nanos(arch::read_raw_counter());
        CycleClock {
            inner: ClockSource::Counter,
            ref_time_ns,
        }
    }

    /// Builds a monotonic clock starting at the given reference time.
    pub fn from_ref_time(ref_time_ns: u64) -> Self {
        ensure_calibrated();
        let now_ns = calibration::counter_to_nanos(arch::read_raw_counter());
        CycleClock {
            inner: ClockSource::Counter,
            ref_time_ns: now_ns.saturating_sub(ref_time_ns),
        }
    }

    /// Build a fake clock with a reference time of 0.
    /// The mock interface enables you to control all the clones of the clock given.
    pub fn mock() -> (Self, CycleClockMock) {
        let nanos = Arc::new(portable_atomic::AtomicU64::new(0));
        (
            CycleClock {
                inner: ClockSource::Mock(nanos.clone()),
                ref_time_ns: 0,
            },
            CycleClockMock(nanos),
        )
    }

    // Now returns the time that passed since the reference time, usually the start time.
    // It is a monotonically increasing value.
    #[inline]
    pub fn now(&self) -> TactTime {
        let now_ns = match &self.inner {
            ClockSource::Counter => calibration::counter_to_nanos(arch::read_raw_counter()),
            ClockSource::Mock(nanos) => nanos.load(portable_atomic::Ordering::SeqCst),
        };
        TactDuration(now_ns.saturating_sub(self.ref_time_ns))
    }

    /// The raw counter reading backing this clock.
    /// On a mocked clock this is the mocked nanosecond value.
    #[inline]
    pub fn cycles(&self) -> CycleCount {
        match &self.inner {
            ClockSource::Counter => read_cycles(),
            ClockSource::Mock(nanos) => CycleCount(nanos.load(portable_atomic::Ordering::SeqCst)),
        }
    }
}

impl Default for CycleClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A trait to provide a clock to the measurement harness.
pub trait ClockProvider {
    fn get_clock(&self) -> CycleClock;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cycles_pair_is_non_decreasing() {
        let a = read_cycles();
        let b = read_cycles();
        // Permissible wraparound aside, the counter never goes backwards on
        // one core. The delta stays sane even if the thread migrated.
        assert!(b.as_raw() >= a.as_raw() || (b - a).as_raw() < u64::MAX / 2);
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    #[test]
    fn test_read_cycles_tight_loop_strictly_increases() {
        // Each call consumes at least one cycle, so the TSC never reads the
        // same value twice in a row.
        let mut prev = read_cycles();
        for _ in 0..1_000 {
            let next = read_cycles();
            assert!(next.as_raw() > prev.as_raw());
            prev = next;
        }
    }

    #[test]
    fn test_cyclecount_is_64bit_everywhere() {
        assert_eq!(core::mem::size_of::<CycleCount>(), 8);
        let count = CycleCount(u64::MAX);
        let signed: i64 = count.into();
        assert_eq!(signed, -1);
    }

    #[test]
    fn test_cyclecount_delta_wraps() {
        let before_wrap = CycleCount(u64::MAX - 10);
        let after_wrap = CycleCount(5);
        assert_eq!((after_wrap - before_wrap).as_raw(), 16);
    }

    #[test]
    fn test_cyclecount_display() {
        assert_eq!(CycleCount(999).to_string(), "999 cy");
        assert_eq!(CycleCount(42_000).to_string(), "42.000 kcy");
        assert_eq!(CycleCount(1_500_000).to_string(), "1.500 Mcy");
        assert_eq!(CycleCount(2_000_000_000).to_string(), "2.000 Gcy");
    }

    #[test]
    fn test_tactduration_comparison_operators() {
        let a = TactDuration(100);
        let b = TactDuration(200);

        assert!(a < b);
        assert!(b > a);
        assert_ne!(a, b);
        assert_eq!(a, TactDuration(100));
    }

    #[test]
    fn test_tactduration_arithmetic_operations() {
        let a = TactDuration(100);
        let b = TactDuration(50);

        assert_eq!(a + b, TactDuration(150));
        assert_eq!(a - b, TactDuration(50));
        assert_eq!(a * 2u32, TactDuration(200));
        assert_eq!(a / 2u32, TactDuration(50));
        assert_eq!(2u64 * a, TactDuration(200));
    }

    #[test]
    fn test_tactduration_display() {
        let nano = TactDuration(42);
        assert_eq!(nano.to_string(), "42 ns");

        let micro = TactDuration(42_000);
        assert_eq!(micro.to_string(), "42.000 µs");

        let milli = TactDuration(42_000_000);
        assert_eq!(milli.to_string(), "42.000 ms");

        let sec = TactDuration(1_500_000_000);
        assert_eq!(sec.to_string(), "1.500 s");

        let min = TactDuration(90_000_000_000);
        assert_eq!(min.to_string(), "1.500 m");

        let hour = TactDuration(3_600_000_000_000);
        assert_eq!(hour.to_string(), "1.000 h");

        let day = TactDuration(86_400_000_000_000);
        assert_eq!(day.to_string(), "1.000 d");
    }

    #[test]
    fn longest_duration() {
        let maxtact = TactDuration(u64::MAX);
        let maxd: Duration = maxtact.into();
        assert_eq!(maxd.as_nanos(), u64::MAX as u128);
        let s = maxd.as_secs();
        let y = s / 60 / 60 / 24 / 365;
        assert!(y >= 584); // 584 years of continuous measurement, we should be good.
    }

    #[test]
    fn test_mock() {
        let (clock, mock) = CycleClock::mock();
        assert_eq!(clock.now(), Duration::from_secs(0).into());
        mock.increment(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1).into());
    }

    #[test]
    fn test_mock_clone() {
        let (clock, mock) = CycleClock::mock();
        assert_eq!(clock.now(), Duration::from_secs(0).into());
        let clock_clone = clock.clone();
        mock.increment(Duration::from_secs(1));
        assert_eq!(clock_clone.now(), Duration::from_secs(1).into());
    }

    #[test]
    fn test_mock_clock_advanced_operations() {
        let (clock, mock) = CycleClock::mock();

        assert_eq!(clock.now(), TactDuration(0));

        mock.increment(Duration::from_secs(10));
        assert_eq!(clock.now(), Duration::from_secs(10).into());

        // Decrement is unusual but supported.
        mock.decrement(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5).into());

        mock.set_value(30_000_000_000);
        assert_eq!(clock.now(), Duration::from_secs(30).into());

        assert_eq!(mock.now(), Duration::from_secs(30).into());
        assert_eq!(mock.value(), 30_000_000_000);
    }

    #[test]
    fn test_from_ref_time() {
        let tolerance_ms = 50;
        let clock = CycleClock::from_ref_time(1_000_000_000);
        assert_relative_eq!(
            <TactDuration as Into<Duration>>::into(clock.now()).as_millis() as f64,
            Duration::from_secs(1).as_millis() as f64,
            epsilon = tolerance_ms as f64
        );
    }

    #[test]
    fn test_clock_now_is_non_decreasing() {
        let clock = CycleClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn test_clock_provider_trait() {
        struct TestClockProvider {
            clock: CycleClock,
        }

        impl ClockProvider for TestClockProvider {
            fn get_clock(&self) -> CycleClock {
                self.clock.clone()
            }
        }

        let (clock, mock) = CycleClock::mock();
        let provider = TestClockProvider { clock };

        let provider_clock = provider.get_clock();
        assert_eq!(provider_clock.now(), TactDuration(0));

        mock.increment(Duration::from_secs(5));
        assert_eq!(provider_clock.now(), Duration::from_secs(5).into());
    }
}
