//! Observers that turn raw UI signals into discrete session events.

use journey_core::StepId;

/// Fraction of sampled pixels that must be scratched off to reveal the photo.
pub const SCRATCH_REVEAL_FRACTION: f32 = 0.4;
/// Summed absolute acceleration (m/s²) that counts as a shake.
pub const SHAKE_THRESHOLD: f64 = 30.0;
/// Minimum gap between two shakes, in milliseconds.
pub const SHAKE_COOLDOWN_MS: i64 = 2_500;

/// Events fed into the session by observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObserverEvent {
    /// The scratch card of a step was uncovered.
    Revealed(StepId),
    /// The device was shaken.
    Shaken,
}

/// Watches scratch coverage of one step's card and fires once.
#[derive(Clone, Debug)]
pub struct ScratchObserver {
    step: StepId,
    fraction: f32,
    fired: bool,
}

impl ScratchObserver {
    pub fn new(step: StepId) -> Self {
        Self::with_fraction(step, SCRATCH_REVEAL_FRACTION)
    }

    pub fn with_fraction(step: StepId, fraction: f32) -> Self {
        Self {
            step,
            fraction,
            fired: false,
        }
    }

    /// Report how many of `sampled` pixels are cleared.
    pub fn sample(&mut self, cleared: usize, sampled: usize) -> Option<ObserverEvent> {
        if self.fired || sampled == 0 {
            return None;
        }
        if cleared as f32 / sampled as f32 > self.fraction {
            self.fired = true;
            return Some(ObserverEvent::Revealed(self.step.clone()));
        }
        None
    }
}

/// Debounced shake detection over accelerometer samples.
#[derive(Clone, Debug)]
pub struct ShakeDetector {
    threshold: f64,
    cooldown_ms: i64,
    last_fire_ms: Option<i64>,
}

impl Default for ShakeDetector {
    fn default() -> Self {
        Self::new(SHAKE_THRESHOLD)
    }
}

impl ShakeDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            cooldown_ms: SHAKE_COOLDOWN_MS,
            last_fire_ms: None,
        }
    }

    /// Feed one sample taken at `at_ms`.
    pub fn sample(&mut self, at_ms: i64, x: f64, y: f64, z: f64) -> Option<ObserverEvent> {
        let force = x.abs() + y.abs() + z.abs();
        if force.is_nan() || force <= self.threshold {
            return None;
        }
        if let Some(last) = self.last_fire_ms {
            if at_ms - last <= self.cooldown_ms {
                return None;
            }
        }
        self.last_fire_ms = Some(at_ms);
        Some(ObserverEvent::Shaken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_fires_once_past_threshold() {
        let mut obs = ScratchObserver::new(StepId::from("madrid"));
        assert_eq!(obs.sample(0, 0), None);
        assert_eq!(obs.sample(40, 100), None);
        assert_eq!(
            obs.sample(41, 100),
            Some(ObserverEvent::Revealed(StepId::from("madrid")))
        );
        assert_eq!(obs.sample(100, 100), None);
    }

    #[test]
    fn shake_is_debounced() {
        let mut shake = ShakeDetector::default();
        assert_eq!(shake.sample(0, 5.0, 5.0, 9.8), None);
        assert_eq!(shake.sample(10, 20.0, -10.0, 9.8), Some(ObserverEvent::Shaken));
        assert_eq!(shake.sample(2_000, 40.0, 0.0, 0.0), None);
        assert_eq!(shake.sample(2_510, 40.0, 0.0, 0.0), None);
        assert_eq!(shake.sample(2_511, 40.0, 0.0, 0.0), Some(ObserverEvent::Shaken));
    }

    #[test]
    fn nan_samples_are_ignored() {
        let mut shake = ShakeDetector::default();
        assert_eq!(shake.sample(0, f64::NAN, 0.0, 0.0), None);
        assert_eq!(shake.sample(10, 30.0, 0.0, 0.0), None);
        assert_eq!(shake.sample(20, 0.0, -31.0, 0.0), Some(ObserverEvent::Shaken));
    }
}
