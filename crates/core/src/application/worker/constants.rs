// Engine constants (no magic values)
use std::time::Duration;

/// Terminal jobs older than this are pruned and not reloaded (24 hours)
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Maintenance sweep period (1 hour)
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Failure text recorded when the processor panics
pub const PANIC_ERROR_PREFIX: &str = "Processor panicked";

/// Minimum spacing between download progress writes (500ms)
pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Memory kept free for the OS when admitting heavy jobs (percent of total RAM)
pub const DEFAULT_MIN_FREE_MEMORY_PERCENT: f64 = 5.0;

/// Working memory a generation needs on top of the model (GB)
pub const DEFAULT_GENERATION_OVERHEAD_GB: f64 = 5.0;

/// GPU utilization above which heavy jobs are rejected (percent)
pub const DEFAULT_GPU_BUSY_THRESHOLD: f64 = 80.0;

/// CPU usage above which heavy jobs are rejected (percent)
pub const DEFAULT_CPU_BUSY_THRESHOLD: f64 = 90.0;
