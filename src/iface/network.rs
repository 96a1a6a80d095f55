use core::fmt;
use std::sync::{Mutex, PoisonError};

use crate::time::{Duration, Instant};
use crate::wire::IpEndpoint;

/// Error returned by [`NetworkLayer::send`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]

pub enum NetworkError {
    /// No route to the destination.
    Unreachable,
    /// The layer below has no room for the segment right now.
    Exhausted,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            NetworkError::Unreachable => write!(f, "destination unreachable"),
            NetworkError::Exhausted => write!(f, "buffer space exhausted"),
        }
    }
}

impl core::error::Error for NetworkError {}

/// The IP layer underneath TCP.
///
/// `send` is called without any connection lock held. It may block briefly, but it
/// must not call back into the sending [`Connection`](super::Connection).
pub trait NetworkLayer: Send + Sync {
    /// Wrap `segment` into an IPv4 packet from `src` to `dst` and hand it to a device.
    fn send(&self, src: IpEndpoint, dst: IpEndpoint, segment: &[u8]) -> Result<(), NetworkError>;
}

/// A monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Time elapsed since the clock was created, read from the operating system.
#[derive(Debug)]
pub struct SystemClock {
    epoch: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> SystemClock {
        SystemClock {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let elapsed = self.epoch.elapsed();
        Instant::from_micros(i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new(now: Instant) -> ManualClock {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: Instant) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(Instant::from_millis(5));
        assert_eq!(clock.now(), Instant::from_millis(5));
        clock.advance(Duration::from_millis(95));
        assert_eq!(clock.now(), Instant::from_millis(100));
        clock.set(Instant::ZERO);
        assert_eq!(clock.now(), Instant::ZERO);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
        assert!(first >= Instant::ZERO);
    }

    #[test]
    fn test_network_error_display() {
        assert_eq!(
            format!("{}", NetworkError::Unreachable),
            "destination unreachable"
        );
    }
}
