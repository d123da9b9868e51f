use crate::game::judgment::Grade;
use crate::game::pattern::{PATTERN_LENGTH, SUBDIVISIONS_PER_BEAT};

// ------------------ Unified timing constants (judgment + scheduling) ------------------
// Scheduler constants are in seconds, user-facing windows in milliseconds.

pub const SCHED_INTERVAL_S: f64 = 0.025;
pub const SCHED_LOOKAHEAD_S: f64 = 0.120;
pub const SCORE_REGEN_INTERVAL_S: f64 = 0.050;

// Hard-stop grace applied to in-flight voices when the engine stops.
pub const VOICE_STOP_GRACE_S: f64 = 0.09;
// Delay between pressing start and the first count-in click.
pub const COUNT_IN_LEAD_S: f64 = 0.08;
pub const COUNT_IN_BEATS: usize = 4;

pub const LATENCY_MIN_MS: u32 = 0;
pub const LATENCY_MAX_MS: u32 = 400;
pub const HIT_TOLERANCE_MAX: u8 = 100;
pub const HIT_WINDOW_MAX_MS: u32 = 250;
pub const PERFECT_WINDOW_MIN_MS: u32 = 10;
pub const PERFECT_WINDOW_MAX_MS: u32 = 80;

#[inline(always)]
pub fn beat_seconds(bpm: u32) -> f64 {
    60.0 / f64::from(bpm.max(1))
}

#[inline(always)]
pub fn subdivision_seconds(bpm: u32) -> f64 {
    beat_seconds(bpm) / SUBDIVISIONS_PER_BEAT as f64
}

#[inline(always)]
pub fn measure_seconds(bpm: u32) -> f64 {
    subdivision_seconds(bpm) * PATTERN_LENGTH as f64
}

/// Correctness tolerance in ms. The 0..100 dial scales it from an eighth to a
/// quarter of the beat, so it tracks the tempo.
pub fn tolerance_ms(bpm: u32, dial: u8) -> f64 {
    let beat_ms = beat_seconds(bpm) * 1000.0;
    let min_ms = beat_ms / 8.0;
    let max_ms = beat_ms / 4.0;
    let dial = f64::from(dial.min(HIT_TOLERANCE_MAX)) / f64::from(HIT_TOLERANCE_MAX);
    dial.mul_add(max_ms - min_ms, min_ms)
}

/// The hit window is never narrower than one subdivision at `bpm`.
pub fn effective_hit_window_ms(configured_ms: u32, bpm: u32) -> u32 {
    let min_ms = (subdivision_seconds(bpm) * 1000.0).round() as u32;
    let max_ms = HIT_WINDOW_MAX_MS.max(min_ms);
    configured_ms.clamp(min_ms, max_ms)
}

/// User-tunable timing knobs, already clamped.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Tolerances {
    pub latency_offset_ms: u32,
    pub hit_tolerance: u8,
    pub hit_window_ms: u32,
    pub perfect_window_ms: u32,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            latency_offset_ms: 15,
            hit_tolerance: 50,
            hit_window_ms: 250,
            perfect_window_ms: 30,
        }
    }
}

impl Tolerances {
    pub fn sanitized(self) -> Self {
        Self {
            latency_offset_ms: self.latency_offset_ms.clamp(LATENCY_MIN_MS, LATENCY_MAX_MS),
            hit_tolerance: self.hit_tolerance.min(HIT_TOLERANCE_MAX),
            hit_window_ms: self.hit_window_ms,
            perfect_window_ms: self
                .perfect_window_ms
                .clamp(PERFECT_WINDOW_MIN_MS, PERFECT_WINDOW_MAX_MS),
        }
    }

    #[inline(always)]
    pub fn latency_offset_s(&self) -> f64 {
        f64::from(self.latency_offset_ms) / 1000.0
    }
}

/// Judgment windows resolved for one tempo (all in seconds).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingProfile {
    pub hit_window_s: f64,
    pub tolerance_s: f64,
    pub perfect_window_s: f64,
    pub subdivision_s: f64,
}

impl TimingProfile {
    pub fn for_tempo(bpm: u32, tol: &Tolerances) -> Self {
        Self {
            hit_window_s: f64::from(effective_hit_window_ms(tol.hit_window_ms, bpm)) / 1000.0,
            tolerance_s: tolerance_ms(bpm, tol.hit_tolerance) / 1000.0,
            perfect_window_s: f64::from(tol.perfect_window_ms) / 1000.0,
            subdivision_s: subdivision_seconds(bpm),
        }
    }
}

/// Classify the signed error (seconds) of a tap already matched inside the hit
/// window.
#[inline(always)]
pub fn classify_error_s(error_s: f64, profile: &TimingProfile) -> Grade {
    let abs = error_s.abs();
    if abs > profile.tolerance_s {
        Grade::WrongTiming
    } else if abs <= profile.perfect_window_s {
        Grade::Perfect
    } else {
        Grade::Good
    }
}

/// Nearest grid slot to `time` within the measure starting at `measure_start`.
pub fn closest_subdivision(time: f64, measure_start: f64, bpm: u32) -> usize {
    let subdiv = subdivision_seconds(bpm);
    if subdiv <= 0.0 {
        return 0;
    }
    let relative = ((time - measure_start) / subdiv).round();
    relative.clamp(0.0, (PATTERN_LENGTH - 1) as f64) as usize
}

/// "12 ms late", "3 ms early" or "0 ms".
pub fn format_error_ms(ms: f64) -> String {
    let rounded = ms.round() as i64;
    match rounded {
        0 => "0 ms".to_string(),
        r if r > 0 => format!("{r} ms late"),
        r => format!("{} ms early", r.abs()),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Tolerances, TimingProfile, classify_error_s, closest_subdivision, effective_hit_window_ms,
        format_error_ms, measure_seconds, tolerance_ms,
    };
    use crate::game::judgment::Grade;

    #[test]
    fn tolerance_dial_spans_eighth_to_quarter_beat() {
        assert!((tolerance_ms(60, 0) - 125.0).abs() < 1e-9);
        assert!((tolerance_ms(60, 100) - 250.0).abs() < 1e-9);
        assert!((tolerance_ms(60, 50) - 187.5).abs() < 1e-9);
        assert!((tolerance_ms(120, 50) - 93.75).abs() < 1e-9);
    }

    #[test]
    fn hit_window_is_at_least_one_subdivision() {
        // 40 BPM: subdivision is 375 ms, which also lifts the upper bound.
        assert_eq!(effective_hit_window_ms(100, 40), 375);
        assert_eq!(effective_hit_window_ms(250, 120), 250);
        assert_eq!(effective_hit_window_ms(50, 120), 125);
        assert_eq!(effective_hit_window_ms(900, 60), 250);
    }

    #[test]
    fn classification_tiers() {
        let profile = TimingProfile::for_tempo(60, &Tolerances::default());
        assert_eq!(classify_error_s(0.0, &profile), Grade::Perfect);
        assert_eq!(classify_error_s(-0.030, &profile), Grade::Perfect);
        assert_eq!(classify_error_s(0.1, &profile), Grade::Good);
        assert_eq!(classify_error_s(0.2, &profile), Grade::WrongTiming);
    }

    #[test]
    fn sanitize_clamps_knobs() {
        let t = Tolerances {
            latency_offset_ms: 9000,
            hit_tolerance: 200,
            hit_window_ms: 10,
            perfect_window_ms: 1,
        }
        .sanitized();
        assert_eq!(t.latency_offset_ms, 400);
        assert_eq!(t.hit_tolerance, 100);
        assert_eq!(t.perfect_window_ms, 10);
    }

    #[test]
    fn measure_and_slot_helpers() {
        assert!((measure_seconds(120) - 2.0).abs() < 1e-12);
        assert_eq!(closest_subdivision(10.0 + 0.26, 10.0, 60), 1);
        assert_eq!(closest_subdivision(9.0, 10.0, 60), 0);
        assert_eq!(closest_subdivision(30.0, 10.0, 60), 15);
    }

    #[test]
    fn error_formatting() {
        assert_eq!(format_error_ms(0.4), "0 ms");
        assert_eq!(format_error_ms(12.2), "12 ms late");
        assert_eq!(format_error_ms(-7.6), "8 ms early");
    }
}
