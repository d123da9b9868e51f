use crate::game::interp::{BPM_MAX, BPM_MIN, Endpoints, LEVEL_MAX, LEVEL_MIN, LevelTables};
use crate::game::score::{MAX_SCORE_MAX, MAX_SCORE_MIN, RECOVERY_MAX_PER_S};
use crate::game::timing::{
    HIT_TOLERANCE_MAX, HIT_WINDOW_MAX_MS, LATENCY_MAX_MS, LATENCY_MIN_MS, PERFECT_WINDOW_MAX_MS,
    PERFECT_WINDOW_MIN_MS, Tolerances,
};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

const CONFIG_PATH: &str = "beatdrill.ini";

// --- Minimal INI reader ---
#[derive(Debug, Default)]
pub struct SimpleIni {
    sections: HashMap<String, HashMap<String, String>>,
}

impl SimpleIni {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        self.parse(&content);
        Ok(())
    }

    pub fn parse(&mut self, content: &str) {
        self.sections.clear();
        let mut current_section = String::new();

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
                current_section = line[1..line.len() - 1].trim().to_string();
                self.sections.entry(current_section.clone()).or_default();
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                self.sections
                    .entry(current_section.clone())
                    .or_default()
                    .insert(key.to_string(), value.trim().to_string());
            }
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.sections.get(section).and_then(|s| s.get(key)).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "Off",
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("'{other}' is not a valid LogLevel setting")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub start_level: u8,
    pub latency_offset_ms: u32,
    /// 0..100 dial: 0 is an eighth of a beat, 100 a quarter.
    pub hit_tolerance: u8,
    /// Upper bound only; the per-tempo floor is one subdivision.
    pub hit_window_ms: u32,
    pub perfect_window_ms: u32,
    pub score_recovery_per_s: f64,
    pub max_score: u32,
    pub levels: LevelTables,
    pub log_level: LogLevel,
    // None = seed from the OS
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let tol = Tolerances::default();
        Self {
            start_level: LEVEL_MIN,
            latency_offset_ms: tol.latency_offset_ms,
            hit_tolerance: tol.hit_tolerance,
            hit_window_ms: tol.hit_window_ms,
            perfect_window_ms: tol.perfect_window_ms,
            score_recovery_per_s: 0.1,
            max_score: 10,
            levels: LevelTables::default(),
            log_level: LogLevel::Warn,
            rng_seed: None,
        }
    }
}

impl Config {
    pub fn tolerances(&self) -> Tolerances {
        Tolerances {
            latency_offset_ms: self.latency_offset_ms,
            hit_tolerance: self.hit_tolerance,
            hit_window_ms: self.hit_window_ms,
            perfect_window_ms: self.perfect_window_ms,
        }
        .sanitized()
    }

    /// Every value forced into its documented range.
    pub fn sanitized(self) -> Self {
        let tol = self.tolerances();
        Self {
            start_level: self.start_level.clamp(LEVEL_MIN, LEVEL_MAX),
            latency_offset_ms: tol.latency_offset_ms,
            hit_tolerance: tol.hit_tolerance,
            hit_window_ms: tol.hit_window_ms.min(HIT_WINDOW_MAX_MS),
            perfect_window_ms: tol.perfect_window_ms,
            score_recovery_per_s: round_recovery(self.score_recovery_per_s),
            max_score: self.max_score.clamp(MAX_SCORE_MIN, MAX_SCORE_MAX),
            levels: self.levels.sanitized(),
            log_level: self.log_level,
            rng_seed: self.rng_seed,
        }
    }

    pub fn from_ini(conf: &SimpleIni) -> Self {
        let default = Self::default();
        let d = default.levels;

        let levels = LevelTables {
            bpm_level1: parse_clamped(conf, "BpmLevel1", d.bpm_level1, BPM_MIN, BPM_MAX),
            bpm_level10: parse_clamped(conf, "BpmLevel10", d.bpm_level10, BPM_MIN, BPM_MAX),
            first_hit: parse_endpoints(conf, "FirstHitWeights", d.first_hit),
            jump: parse_endpoints(conf, "JumpWeights", d.jump),
            triplet_chance: parse_endpoints(conf, "TripletChance", d.triplet_chance),
            after_triplet2: parse_endpoints(conf, "AfterTriplet2Weights", d.after_triplet2),
            after_triplet3: parse_endpoints(conf, "AfterTriplet3Weights", d.after_triplet3),
        };

        Self {
            start_level: parse_clamped(conf, "StartLevel", default.start_level, LEVEL_MIN, LEVEL_MAX),
            latency_offset_ms: parse_clamped(
                conf,
                "LatencyOffsetMs",
                default.latency_offset_ms,
                LATENCY_MIN_MS,
                LATENCY_MAX_MS,
            ),
            hit_tolerance: parse_clamped(conf, "HitTolerance", default.hit_tolerance, 0, HIT_TOLERANCE_MAX),
            hit_window_ms: parse_clamped(conf, "HitWindowMs", default.hit_window_ms, 0, HIT_WINDOW_MAX_MS),
            perfect_window_ms: parse_clamped(
                conf,
                "PerfectWindowMs",
                default.perfect_window_ms,
                PERFECT_WINDOW_MIN_MS,
                PERFECT_WINDOW_MAX_MS,
            ),
            score_recovery_per_s: parse_or(
                conf,
                "Options",
                "ScoreRecoveryPerSecond",
                default.score_recovery_per_s,
            ),
            max_score: parse_clamped(conf, "MaxScore", default.max_score, MAX_SCORE_MIN, MAX_SCORE_MAX),
            levels,
            log_level: parse_or(conf, "Options", "LogLevel", default.log_level),
            rng_seed: conf
                .get("Options", "RngSeed")
                .and_then(|v| v.parse::<u64>().ok())
                .or(default.rng_seed),
        }
        .sanitized()
    }

    /// Stable INI rendering: `[Options]` then `[Levels]`, keys sorted.
    pub fn to_ini_string(&self) -> String {
        let l = &self.levels;
        let mut content = String::new();

        content.push_str("[Options]\n");
        content.push_str(&format!("BpmLevel1={}\n", l.bpm_level1));
        content.push_str(&format!("BpmLevel10={}\n", l.bpm_level10));
        content.push_str(&format!("HitTolerance={}\n", self.hit_tolerance));
        content.push_str(&format!("HitWindowMs={}\n", self.hit_window_ms));
        content.push_str(&format!("LatencyOffsetMs={}\n", self.latency_offset_ms));
        content.push_str(&format!("LogLevel={}\n", self.log_level.as_str()));
        content.push_str(&format!("MaxScore={}\n", self.max_score));
        content.push_str(&format!("PerfectWindowMs={}\n", self.perfect_window_ms));
        let seed = self.rng_seed.map_or_else(|| "Auto".to_string(), |s| s.to_string());
        content.push_str(&format!("RngSeed={seed}\n"));
        content.push_str(&format!("ScoreRecoveryPerSecond={:.1}\n", self.score_recovery_per_s));
        content.push_str(&format!("StartLevel={}\n", self.start_level));
        content.push('\n');

        content.push_str("[Levels]\n");
        push_endpoints(&mut content, "AfterTriplet2Weights", &l.after_triplet2);
        push_endpoints(&mut content, "AfterTriplet3Weights", &l.after_triplet3);
        push_endpoints(&mut content, "FirstHitWeights", &l.first_hit);
        push_endpoints(&mut content, "JumpWeights", &l.jump);
        push_endpoints(&mut content, "TripletChance", &l.triplet_chance);
        content.push('\n');
        content
    }
}

// Global, mutable configuration instance.
static CONFIG: std::sync::LazyLock<Mutex<Config>> =
    std::sync::LazyLock::new(|| Mutex::new(Config::default()));
static CONFIG_FILE: std::sync::LazyLock<Mutex<PathBuf>> =
    std::sync::LazyLock::new(|| Mutex::new(PathBuf::from(CONFIG_PATH)));

#[inline(always)]
fn round_recovery(v: f64) -> f64 {
    if !v.is_finite() {
        return 0.0;
    }
    ((v * 10.0).round() / 10.0).clamp(0.0, RECOVERY_MAX_PER_S)
}

fn parse_or<T: FromStr>(conf: &SimpleIni, section: &str, key: &str, default: T) -> T {
    conf.get(section, key)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// Integer option: any finite number is rounded and clamped into `lo..=hi`,
// so out-of-range values never fall back to the default.
fn parse_clamped<T>(conf: &SimpleIni, key: &str, default: T, lo: T, hi: T) -> T
where
    T: Copy + Into<i64> + TryFrom<i64>,
{
    let Some(v) = conf
        .get("Options", key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
    else {
        return default;
    };
    // `as` saturates, which is what the clamp below wants.
    let wide = (v.round() as i64).clamp(lo.into(), hi.into());
    T::try_from(wide).unwrap_or(default)
}

fn parse_array<const N: usize>(raw: &str) -> Option<[f64; N]> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|t| t.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    values.try_into().ok()
}

fn parse_endpoints<const N: usize>(conf: &SimpleIni, stem: &str, default: Endpoints<N>) -> Endpoints<N> {
    let read = |suffix: &str, fallback: [f64; N]| {
        conf.get("Levels", &format!("{stem}{suffix}"))
            .and_then(|v| parse_array::<N>(&v))
            .unwrap_or(fallback)
    };
    Endpoints::new(read("Level1", default.level1), read("Level10", default.level10))
}

fn join_array(values: &[f64]) -> String {
    values.iter().map(f64::to_string).collect::<Vec<_>>().join(",")
}

fn push_endpoints<const N: usize>(content: &mut String, stem: &str, e: &Endpoints<N>) {
    content.push_str(&format!("{stem}Level1={}\n", join_array(&e.level1)));
    content.push_str(&format!("{stem}Level10={}\n", join_array(&e.level10)));
}

// --- File I/O ---

fn config_path() -> PathBuf {
    CONFIG_FILE.lock().unwrap().clone()
}

fn create_default_config_file(path: &Path) -> Result<(), std::io::Error> {
    info!("'{}' not found, creating with default values.", path.display());
    std::fs::write(path, Config::default().to_ini_string())
}

pub fn load() {
    load_from(CONFIG_PATH);
}

pub fn load_from<P: AsRef<Path>>(path: P) {
    let path = path.as_ref();
    *CONFIG_FILE.lock().unwrap() = path.to_path_buf();

    if !path.exists()
        && let Err(e) = create_default_config_file(path)
    {
        warn!("Failed to create default config file: {e}");
    }

    let mut conf = SimpleIni::new();
    match conf.load(path) {
        Ok(()) => {
            let cfg = Config::from_ini(&conf);
            *CONFIG.lock().unwrap() = cfg;
            info!("Configuration loaded from '{}'.", path.display());
        }
        Err(e) => {
            warn!("Failed to load '{}': {e}. Using default values.", path.display());
            *CONFIG.lock().unwrap() = Config::default();
        }
    }
}

fn save() {
    let content = CONFIG.lock().unwrap().to_ini_string();
    let path = config_path();
    if let Err(e) = std::fs::write(&path, content) {
        warn!("Failed to save config file '{}': {e}", path.display());
    }
}

pub fn get() -> Config {
    *CONFIG.lock().unwrap()
}

pub fn update_latency_offset_ms(ms: u32) {
    let clamped = Tolerances { latency_offset_ms: ms, ..Tolerances::default() }
        .sanitized()
        .latency_offset_ms;
    {
        let mut cfg = CONFIG.lock().unwrap();
        if cfg.latency_offset_ms == clamped {
            return;
        }
        cfg.latency_offset_ms = clamped;
    }
    info!("Latency offset set to {clamped} ms.");
    save();
}

pub fn update_start_level(level: u8) {
    let clamped = level.clamp(LEVEL_MIN, LEVEL_MAX);
    {
        let mut cfg = CONFIG.lock().unwrap();
        if cfg.start_level == clamped {
            return;
        }
        cfg.start_level = clamped;
    }
    save();
}

#[cfg(test)]
mod tests {
    use super::{Config, LogLevel, SimpleIni};

    fn ini(text: &str) -> SimpleIni {
        let mut conf = SimpleIni::new();
        conf.parse(text);
        conf
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = Config::from_ini(&ini("[Options]\n; nothing here\n"));
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn scalars_are_clamped_on_load() {
        let cfg = Config::from_ini(&ini(
            "[Options]\nStartLevel=42\nLatencyOffsetMs=999\nHitTolerance=250\n\
             PerfectWindowMs=2\nMaxScore=0\nScoreRecoveryPerSecond=0.46\nBpmLevel1=10\n\
             LogLevel=debug\nRngSeed=7\n",
        ));
        assert_eq!(cfg.start_level, 10);
        assert_eq!(cfg.latency_offset_ms, 400);
        assert_eq!(cfg.hit_tolerance, 100);
        assert_eq!(cfg.perfect_window_ms, 10);
        assert_eq!(cfg.max_score, 1);
        assert!((cfg.score_recovery_per_s - 0.5).abs() < 1e-12);
        assert_eq!(cfg.levels.bpm_level1, 40);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.rng_seed, Some(7));
    }

    #[test]
    fn values_outside_the_integer_type_are_clamped_too() {
        let cfg = Config::from_ini(&ini(
            "[Options]\nLatencyOffsetMs=-20\nHitTolerance=300\nStartLevel=300\nMaxScore=-1\n\
             PerfectWindowMs=45.6\nHitWindowMs=1e9\nBpmLevel10=-5\n",
        ));
        assert_eq!(cfg.latency_offset_ms, 0);
        assert_eq!(cfg.hit_tolerance, 100);
        assert_eq!(cfg.start_level, 10);
        assert_eq!(cfg.max_score, 1);
        assert_eq!(cfg.perfect_window_ms, 46);
        assert_eq!(cfg.hit_window_ms, 250);
        assert_eq!(cfg.levels.bpm_level10, 40);

        let unreadable = Config::from_ini(&ini("[Options]\nLatencyOffsetMs=soon\nMaxScore=NaN\n"));
        assert_eq!(unreadable.latency_offset_ms, Config::default().latency_offset_ms);
        assert_eq!(unreadable.max_score, Config::default().max_score);
    }

    #[test]
    fn level_arrays_parse_and_bad_lengths_are_ignored() {
        let cfg = Config::from_ini(&ini(
            "[Levels]\nJumpWeightsLevel10 = 1, 2, 3, 4, 50\nFirstHitWeightsLevel1=1,2\n\
             AfterTriplet3WeightsLevel1=1,1,1,9\n",
        ));
        assert_eq!(cfg.levels.jump.level10, [1.0, 2.0, 3.0, 4.0, 10.0]);
        assert_eq!(cfg.levels.first_hit.level1, Config::default().levels.first_hit.level1);
        assert_eq!(cfg.levels.after_triplet3.level1, [1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn rendered_file_reads_back_the_same() {
        let mut cfg = Config::default();
        cfg.latency_offset_ms = 35;
        cfg.levels.triplet_chance.level10 = [0.25, 0.5, 0.75];
        cfg.rng_seed = Some(1234);
        let text = cfg.to_ini_string();
        assert!(text.starts_with("[Options]\n"));
        assert!(text.contains("TripletChanceLevel10=0.25,0.5,0.75\n"));
        assert_eq!(Config::from_ini(&ini(&text)), cfg);
    }

    #[test]
    fn auto_seed_reads_as_none() {
        let cfg = Config::from_ini(&ini("[Options]\nRngSeed=Auto\n"));
        assert_eq!(cfg.rng_seed, None);
    }
}
