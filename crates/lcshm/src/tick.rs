//! Message tick source.
//!
//! The tick is a change-detection stamp, not a clock: receivers poll the
//! slot and compare against the tick they last consumed. Zero doubles as
//! the "slot empty" sentinel, so writers publish with [`nonzero_tick`].

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, truncated to 32 bits.
///
/// Successive calls in practice produce increasing values, but the only
/// guaranteed property is "changes over time". Can return 0 (on wrap, or
/// if the clock reads before the epoch).
pub fn tick() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u32)
        .unwrap_or(0)
}

/// A tick suitable for publication: retries [`tick`] until it is non-zero.
pub fn nonzero_tick() -> u32 {
    loop {
        let tick = tick();
        if tick != 0 {
            return tick;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonzero_tick_is_nonzero() {
        assert_ne!(nonzero_tick(), 0);
    }

    #[test]
    fn test_tick_does_not_go_backwards_quickly() {
        let first = tick();
        let second = tick();
        // Milliseconds truncated to u32 wrap every ~49 days; back-to-back
        // calls land on the same or a later stamp.
        assert!(second >= first || first == u32::MAX);
    }
}
