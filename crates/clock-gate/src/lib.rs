#![deny(warnings)]

//! Time gate for the journey: decides whether the app is still locked and how
//! long is left until it opens.
//!
//! Everything here is a pure function of an injected instant:
//! - `ClockGate::is_locked` / `ClockGate::remaining` compare against one fixed target
//! - `CountdownObserver` turns repeated polls into a single `Unlocked` event
//! - `wait_for_unlock` drives the observer from a 1 second tokio interval

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 2026-02-14 00:00 at UTC+03:00 (no DST), i.e. 2026-02-13 21:00 UTC.
pub const DEFAULT_UNLOCK_AT_MS: i64 = 1_771_016_400_000;

/// Environment variable that forces the gate open when set to `"true"`.
pub const OVERRIDE_ENV: &str = "JOURNEY_UNLOCK_OVERRIDE";
/// Environment variable holding an RFC 3339 instant that replaces the target.
pub const UNLOCK_AT_ENV: &str = "JOURNEY_UNLOCK_AT";

/// Interval between countdown polls while locked.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

/// Source of the current instant.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and previews. Clones share the same instant.
#[derive(Clone, Debug)]
pub struct ManualClock {
    ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn at_millis(ms: i64) -> Self {
        Self {
            ms: Arc::new(AtomicI64::new(ms)),
        }
    }

    pub fn set_millis(&self, ms: i64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.ms.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn millis(&self) -> i64 {
        self.ms.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis())
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Time left until the gate opens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Remaining {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub total_ms: u64,
}

impl Remaining {
    /// Split a millisecond total into days/hours/minutes/seconds (floor division).
    ///
    /// Example:
    /// let r = Remaining::from_millis(90_061_000);
    /// assert_eq!((r.days, r.hours, r.minutes, r.seconds), (1, 1, 1, 1));
    pub fn from_millis(total_ms: u64) -> Self {
        Self {
            days: total_ms / MS_PER_DAY,
            hours: (total_ms / MS_PER_HOUR) % 24,
            minutes: (total_ms / MS_PER_MINUTE) % 60,
            seconds: (total_ms / MS_PER_SECOND) % 60,
            total_ms,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_ms == 0
    }
}

/// Fixed-instant gate with an optional force-unlock override.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockGate {
    target_ms: i64,
    force_unlock: bool,
}

impl Default for ClockGate {
    fn default() -> Self {
        Self {
            target_ms: DEFAULT_UNLOCK_AT_MS,
            force_unlock: false,
        }
    }
}

impl ClockGate {
    pub fn new<Tz: TimeZone>(target: DateTime<Tz>) -> Self {
        Self {
            target_ms: target.timestamp_millis(),
            force_unlock: false,
        }
    }

    pub fn with_target_millis(target_ms: i64) -> Self {
        Self {
            target_ms,
            force_unlock: false,
        }
    }

    /// Force `is_locked` to false. `remaining` is unaffected.
    pub fn with_override(mut self, force_unlock: bool) -> Self {
        self.force_unlock = force_unlock;
        self
    }

    pub fn target_millis(&self) -> i64 {
        self.target_ms
    }

    pub fn target(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.target_ms).single()
    }

    pub fn is_overridden(&self) -> bool {
        self.force_unlock
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        !self.force_unlock && now.timestamp_millis() < self.target_ms
    }

    /// Time until the target, clamped to zero once it has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Remaining {
        let diff = self.target_ms.saturating_sub(now.timestamp_millis());
        Remaining::from_millis(u64::try_from(diff).unwrap_or(0))
    }
}

/// Gate configuration, read once at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateConfig {
    pub force_unlock: bool,
    pub unlock_at: Option<DateTime<Utc>>,
}

impl GateConfig {
    /// Read `JOURNEY_UNLOCK_OVERRIDE` and `JOURNEY_UNLOCK_AT` from the process environment.
    pub fn from_env() -> Self {
        let force = std::env::var(OVERRIDE_ENV).ok();
        let at = std::env::var(UNLOCK_AT_ENV).ok();
        Self::from_vars(force.as_deref(), at.as_deref())
    }

    /// Build from raw variable values. Only the exact string `"true"` enables the
    /// override; an unparsable instant is ignored.
    pub fn from_vars(force_unlock: Option<&str>, unlock_at: Option<&str>) -> Self {
        let unlock_at = unlock_at.and_then(|raw| match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                warn!(value = raw, error = %e, "ignoring malformed JOURNEY_UNLOCK_AT");
                None
            }
        });
        Self {
            force_unlock: force_unlock == Some("true"),
            unlock_at,
        }
    }

    pub fn gate(&self) -> ClockGate {
        let gate = match self.unlock_at {
            Some(at) => ClockGate::new(at),
            None => ClockGate::default(),
        };
        gate.with_override(self.force_unlock)
    }
}

/// Discrete events emitted by the countdown observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateEvent {
    /// Still locked; carries the time left.
    Tick(Remaining),
    /// The gate has opened. Emitted once.
    Unlocked,
}

/// Turns repeated polls into ticks and a single `Unlocked`.
#[derive(Clone, Debug)]
pub struct CountdownObserver {
    gate: ClockGate,
    fired: bool,
}

impl CountdownObserver {
    pub fn new(gate: ClockGate) -> Self {
        Self { gate, fired: false }
    }

    /// Evaluate the gate at `now`. Returns `None` once `Unlocked` has been emitted.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<GateEvent> {
        if self.fired {
            return None;
        }
        if self.gate.is_locked(now) {
            return Some(GateEvent::Tick(self.gate.remaining(now)));
        }
        self.fired = true;
        info!("clock gate opened");
        Some(GateEvent::Unlocked)
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

/// Poll the gate every second until it opens, reporting each tick.
///
/// Returns once, right after the gate opens; polling stops there.
pub async fn wait_for_unlock<C, F>(gate: ClockGate, clock: &C, mut on_tick: F)
where
    C: Clock,
    F: FnMut(Remaining),
{
    let mut observer = CountdownObserver::new(gate);
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        match observer.poll(clock.now()) {
            Some(GateEvent::Tick(remaining)) => on_tick(remaining),
            Some(GateEvent::Unlocked) | None => return,
        }
    }
}
