//! Time utilities with a clock abstraction for testability.
//!
//! Grace periods, session expiry, and reconnect cadence all read the current
//! time through [`Clock`], so tests can drive them without real delays.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Get current Unix timestamp in milliseconds
    fn now_millis(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        unix_timestamp_millis()
    }
}

/// Manually-advanced clock for testing.
///
/// Starts at a fixed instant and only moves when [`FixedClock::advance`] is
/// called, so expiry windows can be crossed deterministically.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    /// Create a new fixed clock set to the given timestamp
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    /// Move the clock forward by `delta_millis`
    pub fn advance(&self, delta_millis: i64) {
        self.now.fetch_add(delta_millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Get current Unix timestamp in milliseconds
pub fn unix_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_returns_non_zero_timestamp() {
        // テスト項目: SystemClock が 0 以外のタイムスタンプを返す
        // given (前提条件):
        let clock = SystemClock;

        // when (操作):
        let timestamp = clock.now_millis();

        // then (期待する結果):
        assert!(timestamp > 0);
    }

    #[test]
    fn test_fixed_clock_returns_fixed_timestamp() {
        // テスト項目: FixedClock が固定されたタイムスタンプを返す
        // given (前提条件):
        let clock = FixedClock::new(1234567890123);

        // when (操作):
        let timestamp1 = clock.now_millis();
        let timestamp2 = clock.now_millis();

        // then (期待する結果):
        assert_eq!(timestamp1, 1234567890123);
        assert_eq!(timestamp2, 1234567890123);
    }

    #[test]
    fn test_fixed_clock_advance_moves_time_forward() {
        // テスト項目: advance で時刻が指定分だけ進む
        // given (前提条件):
        let clock = FixedClock::new(1_000);

        // when (操作):
        clock.advance(500);

        // then (期待する結果):
        assert_eq!(clock.now_millis(), 1_500);
    }
}
