use crate::game::timing::{LATENCY_MAX_MS, LATENCY_MIN_MS, beat_seconds};
use log::{debug, info};

pub const CALIBRATION_BPM: u32 = 60;
pub const CALIBRATION_BEATS: usize = 16;
pub const CALIBRATION_MAX_DELAY_MS: f64 = 500.0;
// Clicks start this long after calibration is requested.
pub const CALIBRATION_LEAD_S: f64 = 0.2;
// The session closes this long after the last beat's measure would end.
pub const CALIBRATION_TAIL_S: f64 = 0.3;
// Suggested latencies snap to this step.
pub const LATENCY_STEP_MS: f64 = 5.0;

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationResult {
    pub mean_delay_ms: f64,
    pub suggested_latency_ms: u32,
    pub matched: usize,
    pub beats: usize,
}

/// A click track and the taps matched against it. Advisory only: nothing
/// here touches score or judgment.
#[derive(Clone, Debug)]
pub struct Calibration {
    targets: Vec<f64>,
    matched: Vec<bool>,
    delays_ms: Vec<f64>,
    ends_at: f64,
}

impl Calibration {
    /// Lays out `CALIBRATION_BEATS` clicks starting shortly after `now`.
    pub fn starting_at(now: f64) -> Self {
        let beat = beat_seconds(CALIBRATION_BPM);
        let first = now + CALIBRATION_LEAD_S;
        let targets: Vec<f64> =
            (0..CALIBRATION_BEATS).map(|i| (i as f64).mul_add(beat, first)).collect();
        Self {
            matched: vec![false; targets.len()],
            targets,
            delays_ms: Vec::with_capacity(CALIBRATION_BEATS),
            ends_at: now + CALIBRATION_BEATS as f64 * beat + CALIBRATION_TAIL_S,
        }
    }

    #[inline(always)]
    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    #[inline(always)]
    pub fn ends_at(&self) -> f64 {
        self.ends_at
    }

    #[inline(always)]
    pub fn is_over(&self, now: f64) -> bool {
        now >= self.ends_at
    }

    /// Greedy match: the nearest unmatched click within the max delay. Taps
    /// with nothing in reach are dropped. Returns the signed delay if matched.
    pub fn record_tap(&mut self, tap: f64) -> Option<f64> {
        let max_s = CALIBRATION_MAX_DELAY_MS / 1000.0;
        let (idx, _) = self
            .targets
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.matched[*i])
            .map(|(i, t)| (i, (tap - t).abs()))
            .filter(|(_, d)| *d <= max_s)
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            })?;
        self.matched[idx] = true;
        let delay_ms = (tap - self.targets[idx]) * 1000.0;
        debug!("[CAL] beat {} delay={delay_ms:.1} ms", idx + 1);
        self.delays_ms.push(delay_ms);
        Some(delay_ms)
    }

    /// `None` if no tap was ever matched.
    pub fn finish(&self) -> Option<CalibrationResult> {
        if self.delays_ms.is_empty() {
            info!("Calibration finished without a usable tap.");
            return None;
        }
        let mean = self.delays_ms.iter().sum::<f64>() / self.delays_ms.len() as f64;
        let snapped = (mean / LATENCY_STEP_MS).round() * LATENCY_STEP_MS;
        let suggested =
            snapped.clamp(f64::from(LATENCY_MIN_MS), f64::from(LATENCY_MAX_MS)) as u32;
        info!(
            "Calibration finished: mean delay {mean:.1} ms ({}/{} beats), suggested latency {suggested} ms",
            self.delays_ms.len(),
            self.targets.len()
        );
        Some(CalibrationResult {
            mean_delay_ms: mean,
            suggested_latency_ms: suggested,
            matched: self.delays_ms.len(),
            beats: self.targets.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CALIBRATION_BEATS, Calibration};

    #[test]
    fn clicks_are_one_second_apart_after_lead_in() {
        let cal = Calibration::starting_at(10.0);
        assert_eq!(cal.targets().len(), CALIBRATION_BEATS);
        assert!((cal.targets()[0] - 10.2).abs() < 1e-9);
        assert!((cal.targets()[15] - 25.2).abs() < 1e-9);
        assert!((cal.ends_at() - 26.3).abs() < 1e-9);
        assert!(!cal.is_over(26.0));
        assert!(cal.is_over(26.31));
    }

    #[test]
    fn average_snaps_to_five_ms() {
        let mut cal = Calibration::starting_at(0.0);
        let t = cal.targets().to_vec();
        cal.record_tap(t[0] + 0.041);
        cal.record_tap(t[1] + 0.047);
        cal.record_tap(t[2] + 0.050);
        // mean 46 ms -> 45
        let r = cal.finish().expect("three matched taps");
        assert_eq!(r.suggested_latency_ms, 45);
        assert_eq!(r.matched, 3);
    }

    #[test]
    fn each_click_matches_once_and_far_taps_are_ignored() {
        let mut cal = Calibration::starting_at(0.0);
        let first = cal.targets()[0];
        assert!(cal.record_tap(first + 0.01).is_some());
        // Same click again: the next one is 0.99 s away, out of reach.
        assert!(cal.record_tap(first + 0.01).is_none());
        assert!(cal.record_tap(first - 0.6).is_none());
    }

    #[test]
    fn early_taps_clamp_to_zero_and_no_taps_yield_nothing() {
        let mut cal = Calibration::starting_at(0.0);
        assert!(cal.finish().is_none());
        let t = cal.targets()[3];
        cal.record_tap(t - 0.08);
        assert_eq!(cal.finish().map(|r| r.suggested_latency_ms), Some(0));
    }
}
