use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::DispatcherError;

/// CLI surface for the dispatcher binary. Each flag maps 1:1 onto a
/// `DataTracker` configuration option (spec.md §4.1.1).
#[derive(Parser, Debug)]
#[command(
    name = "dispatcher",
    version,
    about = "Durable work dispatcher for long-running batch pipelines"
)]
pub struct DispatcherArgs {
    /// Path to the input JSONL file (read in binary mode).
    #[arg(long)]
    pub input: PathBuf,

    /// Path to the output JSONL file (opened for append).
    #[arg(long)]
    pub output: PathBuf,

    /// Path to the checkpoint file.
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Seconds after which an issued-but-not-completed item becomes eligible
    /// for reissue.
    #[arg(long, default_value_t = 900)]
    pub work_timeout_secs: u64,

    /// Minimum seconds between consecutive checkpoint writes.
    #[arg(long, default_value_t = 60)]
    pub checkpoint_interval_secs: u64,

    /// Reissues allowed before an item is tombstoned. -1 means unbounded.
    #[arg(long, default_value_t = 3, allow_negative_numbers = true)]
    pub max_retries: i64,

    /// Address the HTTP dispatch endpoint binds to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind_addr: String,
}

/// Validated, immutable configuration. Carries the same fields as
/// `DispatcherArgs` but in the types the core actually wants (`Duration`,
/// bounds already checked).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub work_timeout: Duration,
    pub checkpoint_interval: Duration,
    pub max_retries: i64,
    pub bind_addr: String,
}

impl DispatcherConfig {
    pub fn from_args(args: DispatcherArgs) -> Result<Self, DispatcherError> {
        if args.work_timeout_secs == 0 {
            return Err(DispatcherError::InvalidConfig(
                "work-timeout-secs must be > 0".into(),
            ));
        }
        if args.checkpoint_interval_secs == 0 {
            return Err(DispatcherError::InvalidConfig(
                "checkpoint-interval-secs must be > 0".into(),
            ));
        }
        if args.max_retries < -1 {
            return Err(DispatcherError::InvalidConfig(
                "max-retries must be -1 (unbounded) or >= 0".into(),
            ));
        }
        if args.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(DispatcherError::InvalidConfig(format!(
                "bind-addr '{}' is not a valid socket address",
                args.bind_addr
            )));
        }

        Ok(Self {
            input_path: args.input,
            output_path: args.output,
            checkpoint_path: args.checkpoint,
            work_timeout: Duration::from_secs(args.work_timeout_secs),
            checkpoint_interval: Duration::from_secs(args.checkpoint_interval_secs),
            max_retries: args.max_retries,
            bind_addr: args.bind_addr,
        })
    }
}
