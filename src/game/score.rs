use crate::game::interp::LEVEL_MAX;
use crate::game::timing::SCORE_REGEN_INTERVAL_S;
use log::info;

pub const MAX_SCORE_MIN: u32 = 1;
pub const MAX_SCORE_MAX: u32 = 10;
pub const RECOVERY_MAX_PER_S: f64 = 1.0;

pub const SCORE_MISS: f64 = -1.0;
// Below this share of the max score at the end of a level, the level repeats.
pub const LEVEL_UP_RATIO: f64 = 0.5;
// Displayed score chase speed, units per second.
pub const DISPLAY_CHASE_PER_S: f64 = 4.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Standard,
    /// Fixed tempo over a backing track: no level changes, no victory.
    Music,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LevelDecision {
    Victory,
    LevelUp,
    Repeat,
    /// Music mode: same level, fresh pool.
    Continue,
}

/// What to do once a level's pattern quota is complete.
pub fn decide(score: f64, max_score: f64, level: u8, mode: Mode) -> LevelDecision {
    if mode == Mode::Music {
        return LevelDecision::Continue;
    }
    let repeat = score < max_score * LEVEL_UP_RATIO;
    match (repeat, level >= LEVEL_MAX) {
        (true, _) => LevelDecision::Repeat,
        (false, true) => LevelDecision::Victory,
        (false, false) => LevelDecision::LevelUp,
    }
}

/// Continuous score in `[0, max]` plus the smoothed value shown to players.
#[derive(Clone, Debug)]
pub struct ScoreMeter {
    score: f64,
    max: f64,
    recovery_per_s: f64,
    displayed: f64,
    regen_carry_s: f64,
}

impl ScoreMeter {
    pub fn new(max_score: u32, recovery_per_s: f64) -> Self {
        let max = f64::from(max_score.clamp(MAX_SCORE_MIN, MAX_SCORE_MAX));
        let recovery_per_s = if recovery_per_s.is_finite() {
            recovery_per_s.clamp(0.0, RECOVERY_MAX_PER_S)
        } else {
            0.0
        };
        Self { score: max, max, recovery_per_s, displayed: max, regen_carry_s: 0.0 }
    }

    #[inline(always)]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[inline(always)]
    pub fn max(&self) -> f64 {
        self.max
    }

    #[inline(always)]
    pub fn displayed(&self) -> f64 {
        self.displayed
    }

    #[inline(always)]
    pub fn is_depleted(&self) -> bool {
        self.score <= 0.0
    }

    pub fn reset(&mut self) {
        self.score = self.max;
        self.displayed = self.max;
        self.regen_carry_s = 0.0;
    }

    /// Forces a score, clamped.
    #[cfg(test)]
    pub fn set(&mut self, score: f64) {
        self.score = if score.is_finite() { score.clamp(0.0, self.max) } else { 0.0 };
    }

    /// Applies one lost point. Returns `true` if the score just hit zero.
    pub fn penalize(&mut self) -> bool {
        if self.is_depleted() {
            self.score = 0.0;
            return false;
        }
        self.score = (self.score + SCORE_MISS).clamp(0.0, self.max);
        if self.is_depleted() {
            info!("Score depleted.");
            return true;
        }
        false
    }

    /// Feeds elapsed running time into the fixed-rate regeneration tick.
    /// Returns `true` if the score changed.
    pub fn regen(&mut self, elapsed_s: f64) -> bool {
        if !(elapsed_s > 0.0) {
            return false;
        }
        self.regen_carry_s += elapsed_s;
        let mut changed = false;
        while self.regen_carry_s >= SCORE_REGEN_INTERVAL_S {
            self.regen_carry_s -= SCORE_REGEN_INTERVAL_S;
            if self.score < self.max && self.recovery_per_s > 0.0 {
                self.score = self
                    .recovery_per_s
                    .mul_add(SCORE_REGEN_INTERVAL_S, self.score)
                    .min(self.max);
                changed = true;
            }
        }
        changed
    }

    /// Moves the displayed score toward the true score by at most
    /// `DISPLAY_CHASE_PER_S * dt_s`.
    pub fn animate(&mut self, dt_s: f64) -> f64 {
        if dt_s > 0.0 {
            let step = DISPLAY_CHASE_PER_S * dt_s;
            let diff = self.score - self.displayed;
            self.displayed = if diff.abs() <= step {
                self.score
            } else {
                self.displayed + step.copysign(diff)
            };
        }
        self.displayed
    }
}
