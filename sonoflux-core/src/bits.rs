//! Power-of-two helpers for FFT and buffer sizing.

/// Next power of two >= `n`. Zero maps to 1; values already a power of
/// two are returned unchanged, so the function is idempotent.
pub fn next_power_of_two(n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    n.next_power_of_two()
}

/// Signed variant for config values that may arrive as `<= 0`.
pub fn next_power_of_two_i64(n: i64) -> i64 {
    if n <= 0 {
        return 1;
    }
    (n as u64).next_power_of_two() as i64
}

pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}
