//! Core infrastructure: configuration, runtime orchestration, time.

pub mod config;
pub mod runtime;
pub mod time;

pub use config::Config;
pub use runtime::Runtime;
