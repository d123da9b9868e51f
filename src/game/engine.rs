use crate::config::Config;
use crate::core::audio::{Voice, VoiceSink};
use crate::core::clock::AudioClock;
use crate::game::calibration::{Calibration, CalibrationResult};
use crate::game::interp::{LEVEL_MAX, LevelParams};
use crate::game::judgment::{Judgment, TapSheet};
use crate::game::pattern::{Pattern, PatternPool};
use crate::game::scheduler::{
    Advance, Deferred, DeferredQueue, MeasureCursor, MeasurePlan, Phase, REPETITIONS_PER_PATTERN,
};
use crate::game::score::{LevelDecision, Mode, ScoreMeter, decide};
use crate::game::timing::{
    COUNT_IN_BEATS, COUNT_IN_LEAD_S, TimingProfile, Tolerances, VOICE_STOP_GRACE_S, beat_seconds,
    measure_seconds,
};
use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use thiserror::Error;

pub const MUSIC_MODE_BPM: u32 = 70;
// The backing track's downbeat sits this far into the file.
pub const MUSIC_BACKING_LEAD_S: f64 = 0.925;
// Off-beat count-in hi-hats, in beats after the count-in start.
const COUNT_IN_OFFBEATS: [f64; 2] = [2.5, 3.5];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("audio clock is not initialized")]
    ClockUnavailable,
    #[error("engine is already running or calibrating")]
    Busy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Idle,
    Running,
    Calibrating,
}

/// What the engine reports to its host. Drained with [`Engine::drain_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    PhaseChanged { phase: Phase, level: u8, bpm: u32, repetition: u32 },
    PatternReady { pattern: Pattern },
    HitJudged(Judgment),
    ScoreChanged { score: f64, max: f64 },
    LevelChanged { level: u8 },
    /// A snare of the current measure just sounded (latency-compensated).
    PatternHit { label: String },
    GameOver { level: u8, mode: Mode },
    Victory,
    CalibrationFinished(Option<CalibrationResult>),
}

/// The measure currently sounding, as opposed to the one being scheduled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LiveState {
    pub phase: Phase,
    pub level: u8,
    pub bpm: u32,
    pub repetition: u32,
}

pub struct Engine<C: AudioClock, V: VoiceSink> {
    clock: C,
    voices: V,
    config: Config,
    tolerances: Tolerances,
    rng: StdRng,
    status: Status,
    mode: Mode,
    start_level: u8,
    // Progression level: the level measures are being scheduled at.
    level: u8,
    params: LevelParams,
    pool: Option<PatternPool>,
    cursor: MeasureCursor,
    // Set once the final measure is queued; nothing more gets scheduled.
    finishing: bool,
    queue: DeferredQueue<Deferred>,
    live: LiveState,
    sheet: TapSheet,
    sheet_live: bool,
    score: ScoreMeter,
    last_tick: Option<f64>,
    last_animate_ms: Option<f64>,
    calibration: Option<Calibration>,
    events: VecDeque<EngineEvent>,
}

impl<C: AudioClock, V: VoiceSink> Engine<C, V> {
    pub fn new(clock: C, voices: V, config: &Config) -> Self {
        let config = config.sanitized();
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let params = config.levels.params_at(config.start_level);
        Self {
            clock,
            voices,
            tolerances: config.tolerances(),
            rng,
            status: Status::Idle,
            mode: Mode::Standard,
            start_level: config.start_level,
            level: config.start_level,
            params,
            pool: None,
            cursor: MeasureCursor::starting_at(0.0),
            finishing: false,
            queue: DeferredQueue::default(),
            live: LiveState {
                phase: Phase::Listen,
                level: config.start_level,
                bpm: params.bpm,
                repetition: 1,
            },
            sheet: TapSheet::default(),
            sheet_live: false,
            score: ScoreMeter::new(config.max_score, config.score_recovery_per_s),
            last_tick: None,
            last_animate_ms: None,
            calibration: None,
            events: VecDeque::new(),
            config,
        }
    }

    // --- accessors ---

    #[inline(always)]
    pub fn status(&self) -> Status {
        self.status
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    #[inline(always)]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline(always)]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline(always)]
    pub fn live(&self) -> LiveState {
        self.live
    }

    #[inline(always)]
    pub fn score(&self) -> f64 {
        self.score.score()
    }

    #[inline(always)]
    pub fn max_score(&self) -> f64 {
        self.score.max()
    }

    #[inline(always)]
    pub fn displayed_score(&self) -> f64 {
        self.score.displayed()
    }

    #[inline(always)]
    pub fn tolerances(&self) -> Tolerances {
        self.tolerances
    }

    /// Pattern the scheduler will hand out next.
    pub fn current_pattern(&self) -> Option<&Pattern> {
        self.pool.as_ref().map(PatternPool::current)
    }

    /// Raw clock times at which still-pending hits of the live TAP measure
    /// should be tapped (latency included).
    pub fn pending_tap_times(&self) -> Vec<f64> {
        if !self.sheet_live {
            return Vec::new();
        }
        let latency = self.tolerances.latency_offset_s();
        self.sheet.pending().map(|h| h.target_time() + latency).collect()
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    // --- settings ---

    pub fn set_latency_offset_ms(&mut self, ms: u32) {
        self.tolerances = Tolerances { latency_offset_ms: ms, ..self.tolerances }.sanitized();
    }

    // --- lifecycle ---

    pub fn start(&mut self, mode: Mode) -> Result<(), EngineError> {
        if self.status != Status::Idle {
            return Err(EngineError::Busy);
        }
        let now = self.clock.now().ok_or(EngineError::ClockUnavailable)?;

        self.mode = mode;
        self.level = self.start_level;
        self.params = self.params_for(self.level);
        self.pool = Some(PatternPool::generate(&self.params, &mut self.rng));
        self.reset_run_state();

        let beat = beat_seconds(self.params.bpm);
        let count_in_start = now + COUNT_IN_LEAD_S;
        for b in 0..COUNT_IN_BEATS {
            self.voices.play(Voice::HiHat, (b as f64).mul_add(beat, count_in_start));
        }
        for off in COUNT_IN_OFFBEATS {
            self.voices.play(Voice::HiHat, off.mul_add(beat, count_in_start));
        }
        let first_measure = (COUNT_IN_BEATS as f64).mul_add(beat, count_in_start);
        self.cursor = MeasureCursor::starting_at(first_measure);
        if mode == Mode::Music {
            self.voices.play(Voice::Backing, (first_measure - MUSIC_BACKING_LEAD_S).max(now));
        }

        self.live = LiveState { phase: Phase::Listen, level: self.level, bpm: self.params.bpm, repetition: 1 };
        self.status = Status::Running;
        self.last_tick = Some(now);

        info!(
            "[GAME start] mode={} lvl={} bpm={} latency={}ms hitWindow={}ms tolerance={}ms",
            if mode == Mode::Music { "music" } else { "classic" },
            self.level,
            self.params.bpm,
            self.tolerances.latency_offset_ms,
            self.tolerances.hit_window_ms,
            (self.profile_for(self.params.bpm).tolerance_s * 1000.0).round()
        );
        if let Some(pool) = &self.pool {
            info!("[NEW pattern] lvl={} pattern={}", self.level, pool.current());
        }
        self.emit_score();
        Ok(())
    }

    /// Stops whatever is running: cancels deferred work, hard-stops voices and
    /// resets phase and score state. Safe to call when idle.
    pub fn stop(&mut self) {
        if self.status == Status::Idle {
            return;
        }
        if self.status == Status::Calibrating {
            info!("Calibration stopped.");
        }
        self.halt();
    }

    fn halt(&mut self) {
        let now = self.clock.now().or(self.last_tick).unwrap_or(0.0);
        self.voices.stop_all(now + VOICE_STOP_GRACE_S);
        self.status = Status::Idle;
        self.calibration = None;
        self.reset_run_state();
        self.live = LiveState {
            phase: Phase::Listen,
            level: self.level,
            bpm: self.params.bpm,
            repetition: 1,
        };
    }

    fn reset_run_state(&mut self) {
        self.queue.clear();
        self.sheet = TapSheet::default();
        self.sheet_live = false;
        self.finishing = false;
        self.score.reset();
    }

    pub fn start_calibration(&mut self) -> Result<(), EngineError> {
        if self.status != Status::Idle {
            return Err(EngineError::Busy);
        }
        let now = self.clock.now().ok_or(EngineError::ClockUnavailable)?;
        let cal = Calibration::starting_at(now);
        for (i, &t) in cal.targets().iter().enumerate() {
            self.voices.play(Voice::Snare, t);
            if i % 4 == 0 {
                self.voices.play(Voice::Kick, t);
            }
        }
        info!("Calibration started: {} beats.", cal.targets().len());
        self.calibration = Some(cal);
        self.status = Status::Calibrating;
        self.last_tick = Some(now);
        Ok(())
    }

    // --- periodic work ---

    /// One scheduler tick. Inert while the clock is unavailable.
    pub fn tick(&mut self) {
        let Some(now) = self.clock.now() else {
            return;
        };
        match self.status {
            Status::Idle => {}
            Status::Calibrating => self.tick_calibration(now),
            Status::Running => self.tick_running(now),
        }
    }

    fn tick_calibration(&mut self, now: f64) {
        self.last_tick = Some(now);
        let Some(cal) = &self.calibration else {
            return;
        };
        if !cal.is_over(now) {
            return;
        }
        let result = cal.finish();
        if let Some(r) = &result {
            self.set_latency_offset_ms(r.suggested_latency_ms);
        }
        self.halt();
        self.events.push_back(EngineEvent::CalibrationFinished(result));
    }

    fn tick_running(&mut self, now: f64) {
        let elapsed = self.last_tick.map_or(0.0, |t| (now - t).max(0.0));
        self.last_tick = Some(now);
        if self.score.regen(elapsed) {
            self.emit_score();
        }

        self.run_due(now);
        self.sweep_live_misses(now);

        while self.status == Status::Running && !self.finishing && self.cursor.is_due(now) {
            self.schedule_next_measure();
        }
    }

    /// Moves the displayed score toward the real one. `wall_ms` is any
    /// monotonic millisecond reading (a frame timestamp, typically).
    pub fn animate(&mut self, wall_ms: f64) -> f64 {
        let dt_s = self.last_animate_ms.map_or(0.0, |last| (wall_ms - last).max(0.0) / 1000.0);
        self.last_animate_ms = Some(wall_ms);
        self.score.animate(dt_s)
    }

    fn run_due(&mut self, now: f64) {
        while self.status == Status::Running {
            let Some((_, action)) = self.queue.pop_due(now) else {
                break;
            };
            self.apply(action, now);
        }
    }

    fn apply(&mut self, action: Deferred, now: f64) {
        match action {
            Deferred::EnterPhase(plan) => self.enter_phase(plan),
            Deferred::PatternHit { label } => {
                self.events.push_back(EngineEvent::PatternHit { label });
            }
            Deferred::FinalizeTap { measure_start } => {
                if !self.sheet_live || self.sheet.measure_start() != measure_start {
                    return;
                }
                self.sheet_live = false;
                for j in self.sheet.finalize() {
                    if self.status != Status::Running {
                        break;
                    }
                    self.record(j);
                }
            }
            Deferred::Victory => self.finish_or_retry(now),
        }
    }

    fn enter_phase(&mut self, plan: MeasurePlan) {
        let level_changed = plan.level != self.live.level;
        self.live = LiveState {
            phase: plan.phase,
            level: plan.level,
            bpm: plan.bpm,
            repetition: plan.repetition,
        };
        self.events.push_back(EngineEvent::PhaseChanged {
            phase: plan.phase,
            level: plan.level,
            bpm: plan.bpm,
            repetition: plan.repetition,
        });
        if level_changed {
            self.events.push_back(EngineEvent::LevelChanged { level: plan.level });
        }

        match plan.phase {
            Phase::Listen => {
                debug!(
                    "[LISTEN start] lvl={} rep={}/{REPETITIONS_PER_PATTERN} bpm={} start={:.3}s pattern={}",
                    plan.level, plan.repetition, plan.bpm, plan.start, plan.pattern
                );
                if plan.repetition == 1 {
                    self.events.push_back(EngineEvent::PatternReady { pattern: plan.pattern });
                }
            }
            Phase::Tap => {
                info!(
                    "[TAP start] lvl={} rep={}/{REPETITIONS_PER_PATTERN} bpm={} start={:.3}s pattern={}",
                    plan.level, plan.repetition, plan.bpm, plan.start, plan.pattern
                );
                self.sheet = TapSheet::prepare(&plan.pattern, plan.bpm, plan.start);
                self.sheet_live = true;
            }
        }
    }

    fn sweep_live_misses(&mut self, now: f64) {
        if self.status != Status::Running || !self.sheet_live || self.live.phase != Phase::Tap {
            return;
        }
        let adjusted_now = now - self.tolerances.latency_offset_s();
        let window = self.profile_for(self.sheet.bpm()).hit_window_s;
        for j in self.sheet.sweep_misses(adjusted_now, window) {
            if self.status != Status::Running {
                break;
            }
            self.record(j);
        }
    }

    fn schedule_next_measure(&mut self) {
        let Some(pool) = &self.pool else {
            return;
        };
        let plan = MeasurePlan {
            phase: self.cursor.phase(),
            start: self.cursor.next_measure_time(),
            bpm: self.params.bpm,
            level: self.level,
            repetition: self.cursor.repetition(),
            pattern: pool.live_copy(),
        };
        let measure_s = measure_seconds(plan.bpm);
        let end = plan.end();
        self.queue_measure(plan);

        match self.cursor.advance(measure_s) {
            Advance::ToTap | Advance::Repeat => {}
            Advance::NextPattern => {
                let advanced = self.pool.as_mut().is_some_and(PatternPool::advance);
                if !advanced {
                    self.pool = Some(PatternPool::generate(&self.params, &mut self.rng));
                }
                if let Some(pool) = &self.pool {
                    info!("[NEW pattern] lvl={} pattern={}", self.level, pool.current());
                }
            }
            Advance::LevelComplete => self.complete_level(end),
        }
    }

    fn queue_measure(&mut self, plan: MeasurePlan) {
        let latency = self.tolerances.latency_offset_s();
        let (phase, start, end) = (plan.phase, plan.start, plan.end());
        let swell_start = plan.swell_start();
        for t in plan.kick_times() {
            self.voices.play(Voice::Kick, t);
        }
        let events = plan.pattern.events(plan.bpm, plan.start);
        self.queue.push(start, Deferred::EnterPhase(plan));
        for e in events {
            self.voices.play(Voice::Snare, e.target_time);
            self.queue.push(e.target_time + latency, Deferred::PatternHit { label: e.label() });
        }
        match phase {
            Phase::Listen => self.voices.play(Voice::CymbalSwell { until: end }, swell_start),
            Phase::Tap => self.queue.push(end, Deferred::FinalizeTap { measure_start: start }),
        }
    }

    // The decision is taken when the level's last measure is queued, with the
    // score as it stands at that moment. Victory is only confirmed once that
    // measure has been judged.
    fn complete_level(&mut self, last_measure_end: f64) {
        let (score, max) = (self.score.score(), self.score.max());
        match decide(score, max, self.level, self.mode) {
            LevelDecision::Victory => {
                self.finishing = true;
                self.queue.push(last_measure_end, Deferred::Victory);
                return;
            }
            LevelDecision::LevelUp => {
                let previous = self.level;
                self.level = (self.level + 1).min(LEVEL_MAX);
                self.params = self.params_for(self.level);
                info!("[LEVEL UP] {previous} -> {} | nextBpm={}", self.level, self.params.bpm);
            }
            LevelDecision::Repeat => {
                info!("[LEVEL retry] {} | score={score:.2}/{max}", self.level);
            }
            LevelDecision::Continue => {}
        }
        self.regenerate_pool();
    }

    // Runs once the final TAP measure has been judged. Victory needs the
    // level-up ratio to still hold; otherwise the last level is played again.
    fn finish_or_retry(&mut self, now: f64) {
        let (score, max) = (self.score.score(), self.score.max());
        if decide(score, max, self.level, self.mode) == LevelDecision::Victory {
            info!("Victory! Finished level {}.", self.level);
            self.events.push_back(EngineEvent::Victory);
            self.halt();
            return;
        }
        info!("[LEVEL retry] {} | score={score:.2}/{max} after the final measure", self.level);
        self.finishing = false;
        self.cursor = MeasureCursor::starting_at(now + COUNT_IN_LEAD_S);
        self.regenerate_pool();
    }

    fn regenerate_pool(&mut self) {
        let pool = PatternPool::generate(&self.params, &mut self.rng);
        info!("[NEW pattern] lvl={} pattern={}", self.level, pool.current());
        self.pool = Some(pool);
    }

    // --- input ---

    /// Judges a tap at the clock's current reading. `None` when the tap is not
    /// judged (idle, LISTEN phase, calibration, clock unavailable).
    pub fn tap(&mut self) -> Option<Judgment> {
        let now = self.clock.now()?;
        self.tap_at(now)
    }

    /// Judges a tap captured at raw clock time `raw`.
    pub fn tap_at(&mut self, raw: f64) -> Option<Judgment> {
        match self.status {
            Status::Idle => None,
            Status::Calibrating => {
                if let Some(cal) = &mut self.calibration {
                    cal.record_tap(raw);
                }
                None
            }
            Status::Running => {
                // A TAP measure that is already due opens before this tap is judged.
                if self.live.phase == Phase::Listen {
                    self.run_due(raw);
                }
                if self.status != Status::Running || !self.sheet_live || self.live.phase != Phase::Tap {
                    return None;
                }
                let adjusted = raw - self.tolerances.latency_offset_s();
                let profile = self.profile_for(self.sheet.bpm());
                let judgment = self.sheet.judge(adjusted, &profile);
                self.record(judgment.clone());
                Some(judgment)
            }
        }
    }

    // --- score ---

    fn record(&mut self, judgment: Judgment) {
        let costs = judgment.grade.costs_point();
        self.events.push_back(EngineEvent::HitJudged(judgment));
        if !costs {
            return;
        }
        if self.score.penalize() {
            self.emit_score();
            self.game_over();
        } else {
            self.emit_score();
        }
    }

    fn game_over(&mut self) {
        let level = self.live.level;
        info!("Game over at level {level}.");
        self.events.push_back(EngineEvent::GameOver { level, mode: self.mode });
        self.halt();
    }

    fn emit_score(&mut self) {
        self.events.push_back(EngineEvent::ScoreChanged { score: self.score.score(), max: self.score.max() });
    }

    fn params_for(&self, level: u8) -> LevelParams {
        let params = self.config.levels.params_at(level);
        match self.mode {
            Mode::Music => params.with_bpm(MUSIC_MODE_BPM),
            Mode::Standard => params,
        }
    }

    fn profile_for(&self, bpm: u32) -> TimingProfile {
        TimingProfile::for_tempo(bpm, &self.tolerances)
    }
}
