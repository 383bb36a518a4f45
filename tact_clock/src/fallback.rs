// Fallback for architectures without a usable cycle counter: wall clock
// nanoseconds stand in for cycles so the rest of the stack keeps working.
#[inline(always)]
pub fn read_raw_counter() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}
