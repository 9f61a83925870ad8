//! Runtime glue: configuration, tracing and telemetry, and the monitor that
//! owns both workers.

pub mod config;
pub mod monitor;
pub mod telemetry;
