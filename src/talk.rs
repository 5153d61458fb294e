//! Smoothing, threshold comparison and edge detection on the volume stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::source::VolumeSample;

/// Weight of the newest sample in the moving average.
const SMOOTHING_WEIGHT: f64 = 0.3;
const SMOOTHING_DECAY: f64 = 0.7;

/// Sensitivity shared between the controller and the display process.
/// Lower values open the mouth more easily.
#[derive(Debug, Clone)]
pub struct Threshold(Arc<AtomicU8>);

impl Threshold {
    pub fn new(value: u8) -> Self {
        Self(Arc::new(AtomicU8::new(value.min(100))))
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: u8) {
        self.0.store(value.min(100), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEvent {
    pub is_talking: bool,
}

pub struct TalkStateMachine {
    smoothed_volume: f64,
    is_talking: bool,
    threshold: Threshold,
}

impl TalkStateMachine {
    pub fn new(threshold: Threshold) -> Self {
        Self {
            smoothed_volume: 0.0,
            is_talking: false,
            threshold,
        }
    }

    /// Feeds one sample. Returns an event only when the talk state flips.
    pub fn update(&mut self, sample: VolumeSample) -> Option<TransitionEvent> {
        self.smoothed_volume =
            self.smoothed_volume * SMOOTHING_DECAY + sample.value() * SMOOTHING_WEIGHT;

        // 严格大于：等于阈值时不算说话
        let should_talk = self.smoothed_volume > f64::from(self.threshold.get());
        if should_talk == self.is_talking {
            return None;
        }
        self.is_talking = should_talk;
        Some(TransitionEvent { is_talking: should_talk })
    }

    /// Back to silence with the mouth closed. Reports a transition only if
    /// the mouth was open.
    pub fn reset(&mut self) -> Option<TransitionEvent> {
        self.smoothed_volume = 0.0;
        if !self.is_talking {
            return None;
        }
        self.is_talking = false;
        Some(TransitionEvent { is_talking: false })
    }

    pub fn smoothed_volume(&self) -> f64 {
        self.smoothed_volume
    }

    #[cfg(test)]
    pub fn is_talking(&self) -> bool {
        self.is_talking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn machine(threshold: u8) -> TalkStateMachine {
        TalkStateMachine::new(Threshold::new(threshold))
    }

    #[test]
    fn smoothed_volume_stays_within_input_bounds() {
        let mut sm = machine(30);
        let inputs = [0.0, 100.0, 100.0, 3.0, 57.0, 100.0, 0.0, 0.0, 42.0, 99.0];
        for v in inputs {
            sm.update(VolumeSample::new(v));
            let s = sm.smoothed_volume();
            assert!((0.0..=100.0).contains(&s), "smoothed {s} escaped [0,100]");
        }

        // Starting at 0 and only feeding 40s, the average approaches 40 from below.
        let mut sm = machine(100);
        for _ in 0..200 {
            sm.update(VolumeSample::new(40.0));
            assert!(sm.smoothed_volume() <= 40.0);
        }
        assert_relative_eq!(sm.smoothed_volume(), 40.0, epsilon = 1e-6);
    }

    #[test]
    fn constant_input_fires_a_single_transition() {
        let mut sm = machine(30);
        let events: Vec<_> = (0..50)
            .filter_map(|_| sm.update(VolumeSample::new(80.0)))
            .collect();
        assert_eq!(events, vec![TransitionEvent { is_talking: true }]);
        assert!(sm.is_talking());
    }

    #[test]
    fn equal_to_threshold_does_not_talk() {
        let mut sm = machine(30);
        // Converge exactly onto the threshold value.
        for _ in 0..500 {
            assert_eq!(sm.update(VolumeSample::new(30.0)), None);
        }
        assert!(!sm.is_talking());

        let mut sm = machine(30);
        let mut opened = false;
        for _ in 0..500 {
            if sm.update(VolumeSample::new(30.5)).is_some() {
                opened = true;
            }
        }
        assert!(opened);
    }

    #[test]
    fn threshold_changes_apply_to_the_next_sample() {
        let threshold = Threshold::new(90);
        let mut sm = TalkStateMachine::new(threshold.clone());
        for _ in 0..30 {
            assert_eq!(sm.update(VolumeSample::new(50.0)), None);
        }
        threshold.set(20);
        assert_eq!(
            sm.update(VolumeSample::new(50.0)),
            Some(TransitionEvent { is_talking: true })
        );
    }

    #[test]
    fn reset_closes_an_open_mouth() {
        let mut sm = machine(10);
        assert_eq!(sm.reset(), None);
        for _ in 0..10 {
            sm.update(VolumeSample::new(100.0));
        }
        assert_eq!(sm.reset(), Some(TransitionEvent { is_talking: false }));
        assert_eq!(sm.smoothed_volume(), 0.0);
    }

    #[test]
    fn threshold_is_capped_at_100() {
        let threshold = Threshold::new(250);
        assert_eq!(threshold.get(), 100);
        threshold.set(101);
        assert_eq!(threshold.get(), 100);
    }

    #[test]
    fn multiplier_sequence_opens_on_third_and_closes_after_drop() {
        let mut sm = machine(30);
        let multipliers = [0.1, 0.1, 0.9, 0.9, 0.1, 0.1, 0.1];
        let transitions: Vec<(usize, bool)> = multipliers
            .iter()
            .enumerate()
            .filter_map(|(i, m)| {
                sm.update(VolumeSample::from_multiplier(*m))
                    .map(|e| (i, e.is_talking))
            })
            .collect();

        // 3.0, 5.1, 30.57 (> 30), 48.399, 36.879, 28.816 (< 30)
        assert_eq!(transitions, vec![(2, true), (5, false)]);
    }
}
