use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Socket address the HTTP server binds to.
    #[arg(long, env = "TJS_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Number of concurrent workers in the job pool.
    #[arg(long, env = "TJS_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Pending jobs the queue holds before submissions are rejected.
    #[arg(long, env = "TJS_QUEUE_SIZE", default_value_t = 64)]
    pub queue_size: usize,

    /// Token bucket capacity (maximum request burst).
    #[arg(long, env = "TJS_BURST", default_value_t = 10)]
    pub burst: u32,

    /// Tokens added to the bucket per second.
    #[arg(long, env = "TJS_FILL_RATE", default_value_t = 5.0)]
    pub fill_rate: f64,

    /// Delay a submitted work item waits before writing its result.
    #[arg(long, env = "TJS_JOB_DELAY_MS", default_value_t = 500)]
    pub job_delay_ms: u64,

    /// Upper bound on how long shutdown waits for in-flight jobs.
    #[arg(long, env = "TJS_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn job_delay(&self) -> Duration {
        Duration::from_millis(self.job_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
