// Level-driven parameter blending. Every tunable that changes with difficulty
// is stored as a pair of endpoints (level 1, level 10) and blended linearly.

pub const LEVEL_MIN: u8 = 1;
pub const LEVEL_MAX: u8 = 10;

pub const BPM_MIN: u32 = 40;
pub const BPM_MAX: u32 = 120;
pub const WEIGHT_MAX: f64 = 10.0;

/// Position of `level` between level 1 (0.0) and level 10 (1.0).
///
/// Out-of-range levels are the caller's problem; they extrapolate.
#[inline(always)]
pub fn level_factor(level: u8) -> f64 {
    (f64::from(level) - f64::from(LEVEL_MIN)) / f64::from(LEVEL_MAX - LEVEL_MIN)
}

/// Blends `from` toward `to`. Written as a weighted sum so both endpoints are
/// reproduced bit-for-bit at `t == 0.0` and `t == 1.0`.
#[inline(always)]
pub fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from * (1.0 - t) + to * t
}

#[inline(always)]
pub fn lerp_rounded(from: f64, to: f64, t: f64) -> i64 {
    lerp(from, to, t).round() as i64
}

pub fn lerp_table<const N: usize>(from: &[f64; N], to: &[f64; N], level: u8) -> [f64; N] {
    let t = level_factor(level);
    std::array::from_fn(|i| lerp(from[i], to[i], t))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Endpoints<const N: usize> {
    pub level1: [f64; N],
    pub level10: [f64; N],
}

impl<const N: usize> Endpoints<N> {
    pub const fn new(level1: [f64; N], level10: [f64; N]) -> Self {
        Self { level1, level10 }
    }

    #[inline(always)]
    pub fn at(&self, level: u8) -> [f64; N] {
        lerp_table(&self.level1, &self.level10, level)
    }

    fn clamped(mut self, max: f64) -> Self {
        for v in self.level1.iter_mut().chain(self.level10.iter_mut()) {
            *v = if v.is_finite() { v.clamp(0.0, max) } else { 0.0 };
        }
        self
    }
}

/// The after-triplet weights for the third beat may never pick the last
/// offset: that slot is the measure-end reservation.
#[inline(always)]
pub fn reserve_measure_end(mut weights: [f64; 4]) -> [f64; 4] {
    weights[3] = 0.0;
    weights
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelTables {
    pub bpm_level1: u32,
    pub bpm_level10: u32,
    pub first_hit: Endpoints<3>,
    pub jump: Endpoints<5>,
    pub triplet_chance: Endpoints<3>,
    pub after_triplet2: Endpoints<4>,
    pub after_triplet3: Endpoints<4>,
}

impl Default for LevelTables {
    fn default() -> Self {
        Self {
            bpm_level1: 60,
            bpm_level10: 120,
            first_hit: Endpoints::new([0.0, 10.0, 0.0], [10.0, 5.0, 10.0]),
            jump: Endpoints::new([0.0, 10.0, 0.0, 10.0, 0.0], [1.0, 5.0, 10.0, 2.0, 4.0]),
            triplet_chance: Endpoints::new([0.0, 0.0, 0.0], [0.3, 0.3, 0.3]),
            after_triplet2: Endpoints::new([10.0, 0.0, 0.0, 0.0], [10.0, 0.0, 0.0, 0.0]),
            after_triplet3: Endpoints::new([10.0, 0.0, 0.0, 0.0], [10.0, 0.0, 0.0, 0.0]),
        }
    }
}

impl LevelTables {
    pub fn sanitized(self) -> Self {
        let mut after_triplet3 = self.after_triplet3.clamped(WEIGHT_MAX);
        after_triplet3.level1 = reserve_measure_end(after_triplet3.level1);
        after_triplet3.level10 = reserve_measure_end(after_triplet3.level10);
        Self {
            bpm_level1: self.bpm_level1.clamp(BPM_MIN, BPM_MAX),
            bpm_level10: self.bpm_level10.clamp(BPM_MIN, BPM_MAX),
            first_hit: self.first_hit.clamped(WEIGHT_MAX),
            jump: self.jump.clamped(WEIGHT_MAX),
            triplet_chance: self.triplet_chance.clamped(1.0),
            after_triplet2: self.after_triplet2.clamped(WEIGHT_MAX),
            after_triplet3,
        }
    }

    /// Resolves every table for `level`. Callers cache the result and must
    /// call this again whenever the level changes.
    pub fn params_at(&self, level: u8) -> LevelParams {
        let t = level_factor(level);
        let bpm = lerp_rounded(f64::from(self.bpm_level1), f64::from(self.bpm_level10), t);
        LevelParams {
            level,
            bpm: bpm.max(1) as u32,
            first_hit_weights: self.first_hit.at(level),
            jump_weights: self.jump.at(level),
            triplet_chance: self.triplet_chance.at(level),
            after_triplet2_weights: self.after_triplet2.at(level),
            after_triplet3_weights: reserve_measure_end(self.after_triplet3.at(level)),
        }
    }
}

/// Generation parameters resolved for one level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelParams {
    pub level: u8,
    pub bpm: u32,
    pub first_hit_weights: [f64; 3],
    pub jump_weights: [f64; 5],
    pub triplet_chance: [f64; 3],
    pub after_triplet2_weights: [f64; 4],
    pub after_triplet3_weights: [f64; 4],
}

impl LevelParams {
    /// Same weights, different tempo (music mode pins the tempo).
    pub const fn with_bpm(mut self, bpm: u32) -> Self {
        self.bpm = bpm;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Endpoints, LevelTables, lerp, lerp_table, level_factor};

    #[test]
    fn endpoints_round_trip_exactly() {
        let tables = LevelTables::default();
        let l1 = tables.params_at(1);
        let l10 = tables.params_at(10);
        assert_eq!(l1.first_hit_weights, tables.first_hit.level1);
        assert_eq!(l10.first_hit_weights, tables.first_hit.level10);
        assert_eq!(l1.jump_weights, tables.jump.level1);
        assert_eq!(l10.jump_weights, tables.jump.level10);
        assert_eq!(l10.triplet_chance, tables.triplet_chance.level10);
        assert_eq!(l1.bpm, 60);
        assert_eq!(l10.bpm, 120);
    }

    #[test]
    fn awkward_fractions_still_round_trip() {
        let from = [0.1, 7.3, 0.0];
        let to = [0.3, 1.1, 9.9];
        assert_eq!(lerp_table(&from, &to, 1), from);
        assert_eq!(lerp_table(&from, &to, 10), to);
    }

    #[test]
    fn midpoint_levels_blend_linearly() {
        assert!((level_factor(4) - 1.0 / 3.0).abs() < 1e-12);
        let e = Endpoints::new([0.0, 9.0], [9.0, 0.0]);
        let v = e.at(4);
        assert!((v[0] - 3.0).abs() < 1e-9, "got {:?}", v);
        assert!((v[1] - 6.0).abs() < 1e-9, "got {:?}", v);
    }

    #[test]
    fn tempo_rounds_and_weights_stay_fractional() {
        let tables = LevelTables::default();
        // 60 + 60 * 1/9 = 66.67
        let p = tables.params_at(2);
        assert_eq!(p.bpm, 67);
        assert!((p.triplet_chance[0] - 0.3 / 9.0).abs() < 1e-12);
        assert!((lerp(0.0, 10.0, 0.5) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn third_beat_never_targets_measure_end() {
        let mut tables = LevelTables::default();
        tables.after_triplet3 = Endpoints::new([1.0, 1.0, 1.0, 7.0], [2.0, 2.0, 2.0, 9.0]);
        let tables = tables.sanitized();
        assert_eq!(tables.after_triplet3.level1[3], 0.0);
        for level in 1..=10 {
            assert_eq!(tables.params_at(level).after_triplet3_weights[3], 0.0);
        }
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut tables = LevelTables::default();
        tables.bpm_level1 = 5;
        tables.bpm_level10 = 500;
        tables.triplet_chance = Endpoints::new([-1.0, 2.0, f64::NAN], [0.5, 0.5, 0.5]);
        tables.jump.level10[0] = 99.0;
        let s = tables.sanitized();
        assert_eq!(s.bpm_level1, 40);
        assert_eq!(s.bpm_level10, 120);
        assert_eq!(s.triplet_chance.level1, [0.0, 1.0, 0.0]);
        assert_eq!(s.jump.level10[0], 10.0);
    }
}
