mod cli;

use beatdrill::config;
use beatdrill::core::audio::LogVoices;
use beatdrill::core::clock::{AudioClock, MonotonicClock};
use beatdrill::game::engine::{Engine, EngineEvent, Status};
use beatdrill::game::score::Mode;
use beatdrill::game::stage_stats::SessionRecorder;
use beatdrill::game::timing::{SCHED_INTERVAL_S, format_error_ms};
use clap::Parser;
use cli::{Args, Command};
use log::{info, warn};
use std::io::BufRead;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

enum Input {
    Tap,
    Quit,
}

fn spawn_stdin_reader() -> Receiver<Input> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let msg = if line.trim().eq_ignore_ascii_case("q") { Input::Quit } else { Input::Tap };
            if tx.send(msg).is_err() {
                break;
            }
        }
    });
    rx
}

fn report(event: &EngineEvent) {
    match event {
        EngineEvent::PhaseChanged { phase, level, bpm, repetition } => {
            println!("{} | level {level} | {bpm} BPM | rep {repetition}", phase.as_str());
        }
        EngineEvent::PatternReady { pattern } => println!("pattern {pattern}"),
        EngineEvent::HitJudged(j) => match j.error_ms {
            Some(ms) => println!("  {} {} ({})", j.grade.as_str(), j.label, format_error_ms(ms)),
            None => println!("  {} {}", j.grade.as_str(), j.label),
        },
        EngineEvent::ScoreChanged { score, max } => println!("  score {score:.2}/{max}"),
        EngineEvent::LevelChanged { level } => println!("== level {level} =="),
        EngineEvent::GameOver { level, mode: Mode::Music } => {
            println!("Game over: music level lost before the end (level {level}).");
        }
        EngineEvent::GameOver { level, .. } => println!("Game over: you reached level {level}."),
        EngineEvent::Victory => println!("Victory! You finished level 10."),
        EngineEvent::CalibrationFinished(Some(r)) => println!(
            "Calibration: mean delay {:.1} ms ({}/{} beats), latency set to {} ms",
            r.mean_delay_ms, r.matched, r.beats, r.suggested_latency_ms
        ),
        EngineEvent::CalibrationFinished(None) => println!("Calibration: no usable tap."),
        EngineEvent::PatternHit { .. } => {}
    }
}

fn write_summary(path: &Path, recorder: &SessionRecorder) {
    match recorder.finish().to_json() {
        Ok(json) => match std::fs::write(path, json) {
            Ok(()) => info!("Session summary written to '{}'.", path.display()),
            Err(e) => warn!("Failed to write session summary '{}': {e}", path.display()),
        },
        Err(e) => warn!("Failed to serialize session summary: {e}"),
    }
}

fn play(
    level: Option<u8>,
    music: bool,
    autoplay: bool,
    summary: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = level {
        config::update_start_level(level);
    }
    let cfg = config::get();
    let clock = MonotonicClock::new();
    let mut engine = Engine::new(clock, LogVoices, &cfg);
    let mode = if music { Mode::Music } else { Mode::Standard };
    let mut recorder = SessionRecorder::new(mode, cfg.start_level, engine.max_score());
    let inputs = spawn_stdin_reader();
    let wall = Instant::now();

    engine.start(mode)?;
    println!("Listen, then tap each line back (Enter = tap, q = quit).");

    let tick = Duration::from_secs_f64(SCHED_INTERVAL_S);
    let mut next_tick = Instant::now();
    let mut stdin_open = true;
    while engine.is_running() {
        let wait = next_tick.saturating_duration_since(Instant::now());
        let input = if stdin_open {
            inputs.recv_timeout(wait)
        } else {
            thread::sleep(wait);
            Err(RecvTimeoutError::Timeout)
        };
        match input {
            Ok(Input::Tap) => {
                engine.tap();
            }
            Ok(Input::Quit) => engine.stop(),
            Err(RecvTimeoutError::Disconnected) => stdin_open = false,
            Err(RecvTimeoutError::Timeout) => {
                next_tick += tick;
                engine.tick();
                if autoplay && let Some(now) = clock.now() {
                    for t in engine.pending_tap_times().into_iter().filter(|t| *t <= now) {
                        engine.tap_at(t);
                    }
                }
                engine.animate(wall.elapsed().as_secs_f64() * 1000.0);
            }
        }
        for event in engine.drain_events() {
            recorder.observe(&event);
            report(&event);
        }
    }

    if let Some(path) = summary {
        write_summary(path, &recorder);
    }
    Ok(())
}

fn calibrate() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::get();
    let mut engine = Engine::new(MonotonicClock::new(), LogVoices, &cfg);
    let inputs = spawn_stdin_reader();
    engine.start_calibration()?;
    println!("Tap on every click (Enter = tap, q = quit).");

    let tick = Duration::from_secs_f64(SCHED_INTERVAL_S);
    loop {
        match inputs.recv_timeout(tick) {
            Ok(Input::Tap) => {
                engine.tap();
            }
            Ok(Input::Quit) => engine.stop(),
            Err(RecvTimeoutError::Timeout) => engine.tick(),
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(tick);
                engine.tick();
            }
        }
        for event in engine.drain_events() {
            if let EngineEvent::CalibrationFinished(Some(r)) = &event {
                config::update_latency_offset_ms(r.suggested_latency_ms);
            }
            report(&event);
        }
        if engine.status() != Status::Calibrating {
            break;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    let args = Args::parse();
    config::load_from(&args.config);
    log::set_max_level(config::get().log_level.as_level_filter());

    match args.command {
        Command::Play { level, music, autoplay, summary } => {
            play(level, music, autoplay, summary.as_deref())
        }
        Command::Calibrate => calibrate(),
    }
}
