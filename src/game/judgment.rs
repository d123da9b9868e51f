use crate::game::pattern::{NoteEvent, Pattern};
use crate::game::timing::{self, TimingProfile, classify_error_s, format_error_ms};
use log::debug;
use serde::Serialize;

// How many neighbours on each side of the first-unjudged hit are searched.
const SEARCH_RADIUS: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Grade {
    Perfect,     // inside the perfect window
    Good,        // inside the tolerance
    WrongTiming, // matched (or near a note) but outside the tolerance
    FalseNote,   // nothing to match
    Late,        // tap after the TAP phase ended
    Missed,      // expected hit never tapped
}

impl Grade {
    pub const ALL: [Grade; 6] = [
        Grade::Perfect,
        Grade::Good,
        Grade::WrongTiming,
        Grade::FalseNote,
        Grade::Late,
        Grade::Missed,
    ];

    #[inline(always)]
    pub const fn is_correct(self) -> bool {
        matches!(self, Grade::Perfect | Grade::Good)
    }

    /// Every non-correct outcome costs exactly one score point.
    #[inline(always)]
    pub const fn costs_point(self) -> bool {
        !self.is_correct()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Grade::Perfect => "perfect",
            Grade::Good => "good",
            Grade::WrongTiming => "wrong timing",
            Grade::FalseNote => "false note",
            Grade::Late => "late",
            Grade::Missed => "missed",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HitStatus {
    Pending,
    Correct,
    Incorrect,
    Missed,
}

#[derive(Clone, Debug)]
pub struct ExpectedHit {
    pub event: NoteEvent,
    pub label: String,
    pub status: HitStatus,
}

impl ExpectedHit {
    #[inline(always)]
    pub fn target_time(&self) -> f64 {
        self.event.target_time
    }

    #[inline(always)]
    pub fn is_judged(&self) -> bool {
        self.status != HitStatus::Pending
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Judgment {
    pub grade: Grade,
    /// Signed tap error (positive = late); `None` when there was nothing to
    /// measure against.
    pub error_ms: Option<f64>,
    pub label: String,
}

impl Judgment {
    fn new(grade: Grade, error_ms: Option<f64>, label: impl Into<String>) -> Self {
        Self { grade, error_ms, label: label.into() }
    }
}

/// The expected hits of the current TAP measure plus the cursor that keeps
/// lookups local. Rebuilt wholesale every time a TAP phase begins.
#[derive(Clone, Debug, Default)]
pub struct TapSheet {
    hits: Vec<ExpectedHit>,
    cursor: usize,
    measure_start: f64,
    phase_end: f64,
    bpm: u32,
}

impl TapSheet {
    pub fn prepare(pattern: &Pattern, bpm: u32, measure_start: f64) -> Self {
        let hits = pattern
            .events(bpm, measure_start)
            .into_iter()
            .map(|event| ExpectedHit { label: event.label(), event, status: HitStatus::Pending })
            .collect();
        Self {
            hits,
            cursor: 0,
            measure_start,
            phase_end: measure_start + timing::measure_seconds(bpm),
            bpm,
        }
    }

    #[inline(always)]
    pub fn hits(&self) -> &[ExpectedHit] {
        &self.hits
    }

    #[inline(always)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline(always)]
    pub fn measure_start(&self) -> f64 {
        self.measure_start
    }

    #[inline(always)]
    pub fn phase_end(&self) -> f64 {
        self.phase_end
    }

    #[inline(always)]
    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn pending(&self) -> impl Iterator<Item = &ExpectedHit> {
        self.hits[self.cursor..].iter().filter(|h| !h.is_judged())
    }

    fn advance_cursor(&mut self) {
        while self.cursor < self.hits.len() && self.hits[self.cursor].is_judged() {
            self.cursor += 1;
        }
    }

    fn closest_candidate(&mut self, adjusted: f64) -> Option<(usize, f64)> {
        if self.hits.is_empty() {
            return None;
        }
        self.advance_cursor();
        let from = self.cursor.saturating_sub(SEARCH_RADIUS);
        let to = (self.cursor + SEARCH_RADIUS).min(self.hits.len() - 1);
        let mut best: Option<(usize, f64)> = None;
        for i in from..=to {
            let hit = &self.hits[i];
            if hit.is_judged() {
                continue;
            }
            let distance = (adjusted - hit.target_time()).abs();
            match best {
                Some((b, d))
                    if distance > d
                        || (distance == d && hit.target_time() >= self.hits[b].target_time()) => {}
                _ => best = Some((i, distance)),
            }
        }
        best
    }

    fn oldest_pending_within(&self, adjusted: f64, radius_s: f64) -> Option<&ExpectedHit> {
        self.hits
            .iter()
            .filter(|h| !h.is_judged())
            .find(|h| (adjusted - h.target_time()).abs() <= radius_s)
    }

    /// Judges one tap. `adjusted` is the tap's clock reading with the latency
    /// offset already removed. Marks at most one expected hit.
    pub fn judge(&mut self, adjusted: f64, profile: &TimingProfile) -> Judgment {
        if adjusted >= self.phase_end {
            debug!("[ERR late] tap={adjusted:.3}s phaseEnd={:.3}s", self.phase_end);
            return Judgment::new(
                Grade::Late,
                Some((adjusted - self.phase_end) * 1000.0),
                "after phase end",
            );
        }

        if let Some((idx, distance)) = self.closest_candidate(adjusted)
            && distance <= profile.hit_window_s
        {
            let hit = &mut self.hits[idx];
            let error_s = adjusted - hit.target_time();
            let grade = classify_error_s(error_s, profile);
            hit.status = if grade.is_correct() { HitStatus::Correct } else { HitStatus::Incorrect };
            let judgment = Judgment::new(grade, Some(error_s * 1000.0), hit.label.clone());
            debug!(
                "{} {} tap={adjusted:.3}s target={:.3}s delta={}",
                match grade {
                    Grade::Perfect => "[PERFECT]",
                    Grade::Good => "[OK]",
                    _ => "[ERR timing]",
                },
                hit.label,
                hit.target_time(),
                format_error_ms(error_s * 1000.0)
            );
            self.advance_cursor();
            return judgment;
        }

        if let Some(near) = self.oldest_pending_within(adjusted, profile.subdivision_s) {
            let error_ms = (adjusted - near.target_time()) * 1000.0;
            debug!(
                "[ERR timing] {} tap={adjusted:.3}s target={:.3}s delta={}",
                near.label,
                near.target_time(),
                format_error_ms(error_ms)
            );
            return Judgment::new(Grade::WrongTiming, Some(error_ms), near.label.clone());
        }

        let slot = timing::closest_subdivision(adjusted, self.measure_start, self.bpm);
        debug!("[ERR false] tap={adjusted:.3}s closestSubdiv={}", slot + 1);
        Judgment::new(Grade::FalseNote, None, format!("false note[{}]", slot + 1))
    }

    /// Marks every pending hit whose window has fully elapsed as missed.
    /// Calling it again with no new time elapsed yields nothing.
    pub fn sweep_misses(&mut self, adjusted_now: f64, hit_window_s: f64) -> Vec<Judgment> {
        let mut out = Vec::new();
        for hit in self.hits.iter_mut().filter(|h| !h.is_judged()) {
            if adjusted_now > hit.target_time() + hit_window_s {
                hit.status = HitStatus::Missed;
                let error_ms = (adjusted_now - hit.target_time()) * 1000.0;
                debug!(
                    "[MISS] {} target={:.3}s now={adjusted_now:.3}s delta={}",
                    hit.label,
                    hit.target_time(),
                    format_error_ms(error_ms)
                );
                out.push(Judgment::new(Grade::Missed, Some(error_ms), hit.label.clone()));
            }
        }
        self.advance_cursor();
        out
    }

    /// Closes the TAP phase: whatever is still pending is missed, regardless
    /// of elapsed time.
    pub fn finalize(&mut self) -> Vec<Judgment> {
        let phase_end = self.phase_end;
        let mut out = Vec::new();
        for hit in self.hits.iter_mut().filter(|h| !h.is_judged()) {
            hit.status = HitStatus::Missed;
            let error_ms = (phase_end - hit.target_time()) * 1000.0;
            debug!(
                "[MISS] {} target={:.3}s phaseEnd={phase_end:.3}s delta={}",
                hit.label,
                hit.target_time(),
                format_error_ms(error_ms)
            );
            out.push(Judgment::new(Grade::Missed, Some(error_ms), hit.label.clone()));
        }
        self.advance_cursor();
        out
    }
}
