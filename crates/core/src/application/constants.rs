// Invoker constants (no magic values)
use std::time::Duration;

/// The external tool every invocation runs
pub const OPENSSL_PROGRAM: &str = "openssl";

/// Default read size for stdout/stderr chunks (64 KiB)
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Grace period between SIGTERM and SIGKILL when terminating (5 seconds)
pub const GRACEFUL_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);
