use crate::game::engine::EngineEvent;
use crate::game::judgment::Judgment;
use crate::game::score::Mode;
use crate::game::timing_stats::{GradeCounts, TimingStats, build_histogram_ms, compute_timing_stats};
use chrono::{DateTime, Local};
use serde::Serialize;

const SUMMARY_HIST_BIN_MS: f64 = 10.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Victory,
    GameOver,
    Stopped,
}

/// Collects what a session produced from the engine's event stream.
#[derive(Clone, Debug)]
pub struct SessionRecorder {
    mode: Mode,
    start_level: u8,
    level: u8,
    patterns: u32,
    score: f64,
    max_score: f64,
    outcome: Option<Outcome>,
    judgments: Vec<Judgment>,
    started_at: DateTime<Local>,
}

impl SessionRecorder {
    pub fn new(mode: Mode, start_level: u8, max_score: f64) -> Self {
        Self {
            mode,
            start_level,
            level: start_level,
            patterns: 0,
            score: max_score,
            max_score,
            outcome: None,
            judgments: Vec::new(),
            started_at: Local::now(),
        }
    }

    pub fn observe(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::HitJudged(j) => self.judgments.push(j.clone()),
            EngineEvent::ScoreChanged { score, max } => {
                self.score = *score;
                self.max_score = *max;
            }
            EngineEvent::PhaseChanged { level, .. } | EngineEvent::LevelChanged { level } => {
                self.level = *level;
            }
            EngineEvent::PatternReady { .. } => self.patterns += 1,
            EngineEvent::GameOver { level, .. } => {
                self.level = *level;
                self.outcome = Some(Outcome::GameOver);
            }
            EngineEvent::Victory => self.outcome = Some(Outcome::Victory),
            EngineEvent::PatternHit { .. } | EngineEvent::CalibrationFinished(_) => {}
        }
    }

    pub fn finish(&self) -> SessionSummary {
        let counts = GradeCounts::from_judgments(&self.judgments);
        SessionSummary {
            mode: match self.mode {
                Mode::Standard => "classic",
                Mode::Music => "music",
            },
            start_level: self.start_level,
            level_reached: self.level,
            patterns_heard: self.patterns,
            outcome: self.outcome.unwrap_or(Outcome::Stopped),
            final_score: self.score,
            max_score: self.max_score,
            grade_counts: counts.as_rows(),
            accuracy: counts.accuracy(),
            timing: compute_timing_stats(&self.judgments),
            histogram_10ms: build_histogram_ms(&self.judgments, SUMMARY_HIST_BIN_MS),
            started_at: self.started_at.to_rfc3339(),
            finished_at: Local::now().to_rfc3339(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub mode: &'static str,
    pub start_level: u8,
    pub level_reached: u8,
    pub patterns_heard: u32,
    pub outcome: Outcome,
    pub final_score: f64,
    pub max_score: f64,
    pub grade_counts: Vec<(&'static str, u32)>,
    pub accuracy: f64,
    pub timing: TimingStats,
    pub histogram_10ms: Vec<(i32, u32)>,
    pub started_at: String,
    pub finished_at: String,
}

impl SessionSummary {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{Outcome, SessionRecorder};
    use crate::game::engine::EngineEvent;
    use crate::game::judgment::{Grade, Judgment};
    use crate::game::score::Mode;

    #[test]
    fn recorder_follows_the_event_stream() {
        let mut rec = SessionRecorder::new(Mode::Standard, 3, 10.0);
        let hit = Judgment { grade: Grade::Perfect, error_ms: Some(4.0), label: "note[2]".into() };
        let miss = Judgment { grade: Grade::Missed, error_ms: Some(300.0), label: "note[6]".into() };
        for e in [
            EngineEvent::LevelChanged { level: 4 },
            EngineEvent::HitJudged(hit),
            EngineEvent::HitJudged(miss),
            EngineEvent::ScoreChanged { score: 0.0, max: 10.0 },
            EngineEvent::GameOver { level: 4, mode: Mode::Standard },
        ] {
            rec.observe(&e);
        }
        let summary = rec.finish();
        assert_eq!(summary.outcome, Outcome::GameOver);
        assert_eq!(summary.level_reached, 4);
        assert_eq!(summary.final_score, 0.0);
        assert_eq!(summary.timing.count, 1);
        assert!((summary.accuracy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn summary_serializes_to_json() {
        let rec = SessionRecorder::new(Mode::Music, 1, 10.0);
        let json = rec.finish().to_json().unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(value["outcome"], "stopped");
        assert_eq!(value["mode"], "music");
        assert_eq!(value["grade_counts"][0][0], "perfect");
        assert!(value["started_at"].as_str().is_some_and(|s| !s.is_empty()));
    }
}
