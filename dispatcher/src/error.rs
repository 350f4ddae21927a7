use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type. I/O and recovery failures are fatal to the
/// process (spec.md §7): callers propagate these with `?` rather than
/// attempting to continue with a possibly-inconsistent on-disk state.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("failed to open input file {path}: {source}")]
    OpenInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open output file {path}: {source}")]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint file {path} is corrupt: {source}")]
    CorruptCheckpoint {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "recovery invariant violated: output file records {output_lines} completed lines but \
         input file only accounts for {input_lines}; refusing to start with inconsistent state"
    )]
    Recovery {
        output_lines: u64,
        input_lines: u64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
