//! Helper utilities for Socksd
//!
//! This module provides common utility functions used throughout the server.

use rand::Rng;
use std::time::Duration;

/// Default buffer size for relay copies
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default outbound CONNECT timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default BIND wait in milliseconds
pub const DEFAULT_BIND_WAIT_MS: u64 = 60_000;

/// Default lower bound of the random BIND port range
pub const DEFAULT_MIN_BIND_PORT: u16 = 10_000;

/// Default upper bound of the random BIND port range
pub const DEFAULT_MAX_BIND_PORT: u16 = 20_000;

/// Pause after a failed `accept()` on the server listener
pub const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Pick a port uniformly from `min..=max`
///
/// The bounds are swapped when given in the wrong order.
pub fn random_port(min: u16, max: u16) -> u16 {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    rand::thread_rng().gen_range(low..=high)
}

/// Parse duration from milliseconds
pub fn duration_from_millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_BUFFER_SIZE, 8192);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT_MS, 10_000);
        assert_eq!(DEFAULT_BIND_WAIT_MS, 60_000);
        assert!(DEFAULT_MIN_BIND_PORT < DEFAULT_MAX_BIND_PORT);
    }

    #[test]
    fn test_random_port_in_range() {
        for _ in 0..1000 {
            let port = random_port(10000, 10010);
            assert!((10000..=10010).contains(&port));
        }
    }

    #[test]
    fn test_random_port_single_value() {
        assert_eq!(random_port(44444, 44444), 44444);
    }

    #[test]
    fn test_random_port_swapped_bounds() {
        let port = random_port(20000, 19990);
        assert!((19990..=20000).contains(&port));
    }

    #[test]
    fn test_duration_from_millis() {
        assert_eq!(duration_from_millis(2000), Duration::from_secs(2));
        assert_eq!(duration_from_millis(0), Duration::ZERO);
    }
}
