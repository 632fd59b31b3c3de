//! Virtual clock driving the simulation.
//!
//! Virtual time is wall-clock time elapsed since the run started, multiplied
//! by the acceleration factor. The clock is the single source of "now" for the
//! scheduling loop; channels and writers only ever see times handed to them
//! by the loop.

use std::time::{Duration, Instant};

/// Accelerated, pausable, monotonic simulation clock.
///
/// Times are `f64` seconds since the start of the run.
///
/// # Examples
///
/// ```
/// use readsim::clock::VirtualClock;
///
/// let clock = VirtualClock::start(10.0);
/// let t1 = clock.now();
/// let t2 = clock.now();
/// assert!(t2 >= t1);
/// ```
#[derive(Debug, Clone)]
pub struct VirtualClock {
    acceleration_factor: f64,
    origin: Instant,
    /// Virtual time accumulated before `origin`.
    offset: f64,
    paused_at: Option<f64>,
}

impl VirtualClock {
    /// Starts a clock at virtual time 0.
    ///
    /// The acceleration factor must be positive; it is validated by
    /// [`crate::config::SimulatorConfig::validate`] and by `Simulator::start`.
    #[must_use]
    pub fn start(acceleration_factor: f64) -> Self {
        Self::starting_at(0.0, acceleration_factor)
    }

    /// Starts a clock at the given virtual time.
    #[must_use]
    pub fn starting_at(virtual_time: f64, acceleration_factor: f64) -> Self {
        Self {
            acceleration_factor,
            origin: Instant::now(),
            offset: virtual_time.max(0.0),
            paused_at: None,
        }
    }

    /// Current virtual time in seconds.
    #[must_use]
    pub fn now(&self) -> f64 {
        match self.paused_at {
            Some(t) => t,
            None => self.offset + self.origin.elapsed().as_secs_f64() * self.acceleration_factor,
        }
    }

    /// The acceleration factor (virtual seconds per wall second).
    #[must_use]
    pub const fn acceleration_factor(&self) -> f64 {
        self.acceleration_factor
    }

    /// Whether the clock is frozen.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Freezes virtual time. Returns false if already paused.
    pub fn pause(&mut self) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(self.now());
        true
    }

    /// Resumes virtual time from where it was frozen. Returns false if not paused.
    pub fn resume(&mut self) -> bool {
        let Some(t) = self.paused_at.take() else {
            return false;
        };
        self.offset = t;
        self.origin = Instant::now();
        true
    }

    /// Wall-clock duration until virtual time reaches `virtual_time`.
    ///
    /// Returns `None` when the clock is paused or the target is not finite,
    /// i.e. when only an external event can wake the caller.
    #[must_use]
    pub fn wall_until(&self, virtual_time: f64) -> Option<Duration> {
        if self.is_paused() || !virtual_time.is_finite() {
            return None;
        }
        let secs = ((virtual_time - self.now()) / self.acceleration_factor).max(0.0);
        Duration::try_from_secs_f64(secs).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = VirtualClock::start(1000.0);
        let mut last = clock.now();
        for _ in 0..100 {
            let t = clock.now();
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn test_acceleration_scales_time() {
        let clock = VirtualClock::start(1000.0);
        std::thread::sleep(Duration::from_millis(20));
        // 20ms wall at 1000x is at least 20 virtual seconds.
        assert!(clock.now() >= 20.0);
    }

    #[test]
    fn test_pause_freezes_and_resume_continues() {
        let mut clock = VirtualClock::starting_at(5.0, 100.0);
        assert!(clock.pause());
        assert!(!clock.pause());
        let frozen = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now(), frozen);
        assert!(clock.wall_until(frozen + 1.0).is_none());

        assert!(clock.resume());
        assert!(!clock.resume());
        assert!(clock.now() >= frozen);
    }

    #[test]
    fn test_wall_until_scales_by_acceleration() {
        let clock = VirtualClock::start(10.0);
        let wait = clock.wall_until(10.0).unwrap();
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::from_millis(900));

        assert_eq!(clock.wall_until(-1.0), Some(Duration::ZERO));
        assert!(clock.wall_until(f64::INFINITY).is_none());
    }
}
