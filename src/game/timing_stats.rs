use crate::game::judgment::{Grade, Judgment};
use rustc_hash::FxHashMap;
use serde::Serialize;

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimingStats {
    pub mean_abs_ms: f64,
    pub mean_ms: f64,
    pub stddev_ms: f64,
    pub max_abs_ms: f64,
    pub count: usize,
}

// Judgments that carry a meaningful tap error. Misses and late taps only
// measure how far past the note the clock was, not the player.
#[inline(always)]
fn timed_error_ms(j: &Judgment) -> Option<f64> {
    match j.grade {
        Grade::Missed | Grade::Late | Grade::FalseNote => None,
        Grade::Perfect | Grade::Good | Grade::WrongTiming => j.error_ms,
    }
}

pub fn compute_timing_stats(judgments: &[Judgment]) -> TimingStats {
    // First pass: sums and maxima
    let mut sum_abs = 0.0_f64;
    let mut sum_signed = 0.0_f64;
    let mut max_abs = 0.0_f64;
    let mut count: usize = 0;

    for e in judgments.iter().filter_map(timed_error_ms) {
        let a = e.abs();
        sum_abs += a;
        sum_signed += e;
        max_abs = max_abs.max(a);
        count += 1;
    }

    if count == 0 {
        return TimingStats::default();
    }

    let mean_ms = sum_signed / count as f64;
    let mean_abs_ms = sum_abs / count as f64;

    // Second pass: sample standard deviation of signed offsets
    let stddev_ms = if count > 1 {
        let sum_diff_sq: f64 = judgments
            .iter()
            .filter_map(timed_error_ms)
            .map(|e| (e - mean_ms) * (e - mean_ms))
            .sum();
        (sum_diff_sq / (count as f64 - 1.0)).sqrt()
    } else {
        0.0
    };

    TimingStats { mean_abs_ms, mean_ms, stddev_ms, max_abs_ms: max_abs, count }
}

#[derive(Clone, Debug, Default)]
pub struct GradeCounts {
    counts: FxHashMap<Grade, u32>,
}

impl GradeCounts {
    pub fn from_judgments(judgments: &[Judgment]) -> Self {
        let mut counts = FxHashMap::default();
        for j in judgments {
            *counts.entry(j.grade).or_insert(0) += 1;
        }
        Self { counts }
    }

    #[inline(always)]
    pub fn get(&self, grade: Grade) -> u32 {
        self.counts.get(&grade).copied().unwrap_or(0)
    }

    pub fn correct(&self) -> u32 {
        self.get(Grade::Perfect) + self.get(Grade::Good)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Share of correct judgments, 0..=1. Zero when nothing was judged.
    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => f64::from(self.correct()) / f64::from(total),
        }
    }

    /// Counts in `Grade::ALL` order, keyed by display name.
    pub fn as_rows(&self) -> Vec<(&'static str, u32)> {
        Grade::ALL.iter().map(|g| (g.as_str(), self.get(*g))).collect()
    }
}

/// Signed-error histogram in `bin_ms` buckets, sorted by bucket.
pub fn build_histogram_ms(judgments: &[Judgment], bin_ms: f64) -> Vec<(i32, u32)> {
    if bin_ms.is_nan() || bin_ms <= 0.0 {
        return Vec::new();
    }
    let mut counts: FxHashMap<i32, u32> = FxHashMap::default();
    for e in judgments.iter().filter_map(timed_error_ms) {
        let bin = (e / bin_ms).floor() as i32;
        let c = counts.entry(bin).or_insert(0);
        *c = c.saturating_add(1);
    }
    let mut bins: Vec<(i32, u32)> = counts.into_iter().collect();
    bins.sort_unstable_by_key(|(b, _)| *b);
    bins
}
