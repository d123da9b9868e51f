use log::{debug, trace};
use std::cell::RefCell;
use std::rc::Rc;

/// Percussion voices the engine triggers. Times are audio-clock seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Voice {
    Kick,
    Snare,
    HiHat,
    /// Swell that rises until `until` (end of a LISTEN measure).
    CymbalSwell { until: f64 },
    /// Backing track for music mode, started once.
    Backing,
}

impl Voice {
    pub const fn name(self) -> &'static str {
        match self {
            Voice::Kick => "kick",
            Voice::Snare => "snare",
            Voice::HiHat => "hihat",
            Voice::CymbalSwell { .. } => "cymbal swell",
            Voice::Backing => "backing",
        }
    }
}

/// Fire-and-forget percussion synthesis. Nothing the sink does feeds back into
/// judgment.
pub trait VoiceSink {
    fn play(&mut self, voice: Voice, at: f64);
    /// Hard-stops every voice still sounding (or scheduled) at `at`.
    fn stop_all(&mut self, at: f64);
}

/// Headless sink: voices are only logged.
#[derive(Debug, Default)]
pub struct LogVoices;

impl VoiceSink for LogVoices {
    fn play(&mut self, voice: Voice, at: f64) {
        trace!("voice {} at {at:.3}s", voice.name());
    }

    fn stop_all(&mut self, at: f64) {
        debug!("voices hard-stopped at {at:.3}s");
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VoiceCall {
    Play(Voice, f64),
    StopAll(f64),
}

/// Records every call. Clones share the log.
#[derive(Clone, Debug, Default)]
pub struct RecordingVoices {
    calls: Rc<RefCell<Vec<VoiceCall>>>,
}

impl RecordingVoices {
    pub fn calls(&self) -> Vec<VoiceCall> {
        self.calls.borrow().clone()
    }

    pub fn played(&self, voice: Voice) -> Vec<f64> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                VoiceCall::Play(v, at) if *v == voice => Some(*at),
                _ => None,
            })
            .collect()
    }
}

impl VoiceSink for RecordingVoices {
    fn play(&mut self, voice: Voice, at: f64) {
        self.calls.borrow_mut().push(VoiceCall::Play(voice, at));
    }

    fn stop_all(&mut self, at: f64) {
        self.calls.borrow_mut().push(VoiceCall::StopAll(at));
    }
}
