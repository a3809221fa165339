// openssl-exec Infrastructure - System Adapters
// Implements: ProcessRunner

pub mod config;
pub mod subprocess_runner;

pub use config::RunnerConfig;
pub use subprocess_runner::SubprocessRunner;
