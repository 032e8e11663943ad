pub mod common;
pub mod error;
mod logger;
pub mod recorder;
pub mod telemetry;
