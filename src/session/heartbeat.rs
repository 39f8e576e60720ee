//! Heartbeat watchdog.
//!
//! The gateway emits `tick` events every `T`. The monitor keeps two
//! checkpoints relative to the last tick (or the start of the session):
//! `T × degraded` marks the session degraded, `T × timeout` declares it
//! stale. The driver sleeps until [`HeartbeatMonitor::next_deadline`] and
//! then asks [`HeartbeatMonitor::check`] what happened.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::now_millis;

use super::config::MAX_TIMEOUT;

// ============================================================================
// HeartbeatHealth
// ============================================================================

/// Snapshot of heartbeat metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatHealth {
    /// Whether the watchdog is currently armed.
    pub active: bool,
    /// Tick interval in effect for the current session.
    pub tick_interval: Option<Duration>,
    /// Ticks received in the current session.
    pub ticks: u64,
    /// Arrival time of the most recent tick.
    pub last_tick_at: Option<Instant>,
    /// Gap between the two most recent ticks.
    pub last_interval: Option<Duration>,
    /// Delay between the gateway stamping the last tick and its arrival.
    pub last_latency: Option<Duration>,
    /// Whether the degraded checkpoint has passed without a tick.
    pub degraded: bool,
}

// ============================================================================
// HeartbeatCheck
// ============================================================================

/// Outcome of a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatCheck {
    /// Nothing to report.
    Healthy,
    /// Degraded checkpoint just passed; reported once per silence.
    Degraded(Duration),
    /// Stale; the session must be torn down.
    Stale(Duration),
}

// ============================================================================
// HeartbeatMonitor
// ============================================================================

/// Tracks tick arrivals against the advertised interval.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    degraded_multiplier: f64,
    timeout_multiplier: f64,
    tick_interval: Duration,
    running: bool,
    paused: bool,
    armed_at: Instant,
    degraded: bool,
    ticks: u64,
    last_tick_at: Option<Instant>,
    last_interval: Option<Duration>,
    last_latency: Option<Duration>,
}

impl HeartbeatMonitor {
    /// Creates a stopped monitor.
    pub(crate) fn new(degraded_multiplier: f64, timeout_multiplier: f64) -> Self {
        Self {
            degraded_multiplier,
            timeout_multiplier,
            tick_interval: Duration::ZERO,
            running: false,
            paused: false,
            armed_at: Instant::now(),
            degraded: false,
            ticks: 0,
            last_tick_at: None,
            last_interval: None,
            last_latency: None,
        }
    }

    /// Changes the multipliers for the next session.
    pub(crate) fn set_multipliers(&mut self, degraded: f64, timeout: f64) {
        self.degraded_multiplier = degraded;
        self.timeout_multiplier = timeout;
    }

    /// Starts watching a new session with tick interval `tick_interval`,
    /// capped at [`MAX_TIMEOUT`].
    pub(crate) fn start(&mut self, tick_interval: Duration, now: Instant) {
        self.tick_interval = tick_interval.min(MAX_TIMEOUT);
        self.running = true;
        self.armed_at = now;
        self.degraded = false;
        self.ticks = 0;
        self.last_tick_at = None;
        self.last_interval = None;
        self.last_latency = None;
    }

    /// Stops watching; the session is gone.
    pub(crate) fn stop(&mut self) {
        self.running = false;
        self.degraded = false;
    }

    /// Stops expecting ticks without ending the session.
    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    /// Expects ticks again, counting silence from `now`.
    pub(crate) fn resume(&mut self, now: Instant) {
        self.paused = false;
        self.armed_at = now;
        self.degraded = false;
    }

    /// Records a tick that arrived at `now`, stamped `ts` by the gateway.
    ///
    /// Returns `true` if the tick cleared a degraded state.
    pub(crate) fn on_tick(&mut self, now: Instant, ts: Option<u64>) -> bool {
        if let Some(previous) = self.last_tick_at {
            self.last_interval = Some(now.saturating_duration_since(previous));
        }
        if let Some(ts) = ts {
            self.last_latency = Some(Duration::from_millis(now_millis().saturating_sub(ts)));
        }

        self.ticks += 1;
        self.last_tick_at = Some(now);
        self.armed_at = now;

        std::mem::take(&mut self.degraded)
    }

    /// Next instant at which [`HeartbeatMonitor::check`] has something to
    /// report, or `None` while disarmed.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        if !self.is_armed() {
            return None;
        }

        let multiplier = if self.degraded {
            self.timeout_multiplier
        } else {
            self.degraded_multiplier
        };
        Some(self.armed_at + self.tick_interval.mul_f64(multiplier))
    }

    /// Evaluates the silence at `now`.
    pub(crate) fn check(&mut self, now: Instant) -> HeartbeatCheck {
        if !self.is_armed() {
            return HeartbeatCheck::Healthy;
        }

        let silent = now.saturating_duration_since(self.armed_at);
        if silent >= self.tick_interval.mul_f64(self.timeout_multiplier) {
            return HeartbeatCheck::Stale(silent);
        }
        if !self.degraded && silent >= self.tick_interval.mul_f64(self.degraded_multiplier) {
            self.degraded = true;
            return HeartbeatCheck::Degraded(silent);
        }

        HeartbeatCheck::Healthy
    }

    /// Returns a snapshot of the metrics.
    pub(crate) fn health(&self) -> HeartbeatHealth {
        HeartbeatHealth {
            active: self.is_armed(),
            tick_interval: self.running.then_some(self.tick_interval),
            ticks: self.ticks,
            last_tick_at: self.last_tick_at,
            last_interval: self.last_interval,
            last_latency: self.last_latency,
            degraded: self.degraded,
        }
    }

    fn is_armed(&self) -> bool {
        self.running && !self.paused
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(30);

    fn started(now: Instant) -> HeartbeatMonitor {
        let mut monitor = HeartbeatMonitor::new(1.5, 2.5);
        monitor.start(T, now);
        monitor
    }

    #[test]
    fn test_stopped_monitor_has_no_deadline() {
        let mut monitor = HeartbeatMonitor::new(1.5, 2.5);
        assert_eq!(monitor.next_deadline(), None);
        assert_eq!(monitor.check(Instant::now() + T * 10), HeartbeatCheck::Healthy);
        assert!(!monitor.health().active);
    }

    #[test]
    fn test_degraded_then_stale() {
        let now = Instant::now();
        let mut monitor = started(now);

        assert_eq!(monitor.next_deadline(), Some(now + Duration::from_secs(45)));
        assert_eq!(monitor.check(now + Duration::from_secs(44)), HeartbeatCheck::Healthy);
        assert_eq!(
            monitor.check(now + Duration::from_secs(45)),
            HeartbeatCheck::Degraded(Duration::from_secs(45))
        );

        // Degraded is reported once; the next checkpoint is staleness.
        assert_eq!(monitor.next_deadline(), Some(now + Duration::from_secs(75)));
        assert_eq!(monitor.check(now + Duration::from_secs(50)), HeartbeatCheck::Healthy);
        assert_eq!(
            monitor.check(now + Duration::from_secs(75)),
            HeartbeatCheck::Stale(Duration::from_secs(75))
        );
    }

    #[test]
    fn test_tick_rearms_and_clears_degraded() {
        let now = Instant::now();
        let mut monitor = started(now);

        let at = now + Duration::from_secs(46);
        assert!(matches!(monitor.check(at), HeartbeatCheck::Degraded(_)));
        assert!(monitor.on_tick(at, None));
        assert!(!monitor.health().degraded);
        assert_eq!(monitor.next_deadline(), Some(at + Duration::from_secs(45)));

        assert!(!monitor.on_tick(at + T, None));
        let health = monitor.health();
        assert_eq!(health.ticks, 2);
        assert_eq!(health.last_interval, Some(T));
    }

    #[test]
    fn test_regular_ticks_never_fire() {
        let now = Instant::now();
        let mut monitor = started(now);

        for i in 1..=20u32 {
            let at = now + T * i;
            assert_eq!(monitor.check(at), HeartbeatCheck::Healthy);
            monitor.on_tick(at, None);
        }
    }

    #[test]
    fn test_pause_disarms_until_resume() {
        let now = Instant::now();
        let mut monitor = started(now);

        monitor.pause();
        assert_eq!(monitor.next_deadline(), None);
        assert_eq!(monitor.check(now + T * 10), HeartbeatCheck::Healthy);

        let later = now + T * 10;
        monitor.resume(later);
        assert_eq!(monitor.next_deadline(), Some(later + Duration::from_secs(45)));
    }

    #[test]
    fn test_latency_from_tick_timestamp() {
        let now = Instant::now();
        let mut monitor = started(now);

        monitor.on_tick(now, Some(now_millis().saturating_sub(120)));
        let latency = monitor.health().last_latency.expect("latency");
        assert!(latency >= Duration::from_millis(120));
        assert!(latency < Duration::from_secs(5));
    }

    #[test]
    fn test_fractional_interval() {
        let now = Instant::now();
        let mut monitor = HeartbeatMonitor::new(1.5, 2.5);
        monitor.start(Duration::from_millis(100), now);

        assert_eq!(monitor.next_deadline(), Some(now + Duration::from_millis(150)));
        assert!(matches!(
            monitor.check(now + Duration::from_millis(250)),
            HeartbeatCheck::Stale(_)
        ));
    }

    #[test]
    fn test_huge_advertised_interval_is_capped() {
        let now = Instant::now();
        let mut monitor = HeartbeatMonitor::new(1.5, 2.5);
        monitor.start(Duration::from_millis(u64::MAX), now);

        assert_eq!(monitor.health().tick_interval, Some(MAX_TIMEOUT));
        assert_eq!(monitor.next_deadline(), Some(now + MAX_TIMEOUT.mul_f64(1.5)));
    }
}
