pub mod config;
pub mod error;
pub mod swap;
pub mod telemetry;
