pub mod analysis;
pub mod calibration;
pub mod config;
pub mod error;
pub mod fetch;
pub mod output;
pub mod schedule;
pub mod telemetry;
