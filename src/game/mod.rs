pub mod calibration;
pub mod engine;
pub mod interp;
pub mod judgment;
pub mod pattern;
pub mod scheduler;
pub mod score;
pub mod stage_stats;
pub mod timing;
pub mod timing_stats;
