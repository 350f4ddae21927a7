//! Library surface for the dispatcher binary. Split out so integration
//! tests (`tests/`) can drive the real HTTP router over a real socket,
//! the same way `main.rs` does, instead of re-implementing it.

pub mod checkpoint;
pub mod config;
pub mod data_tracker;
pub mod error;
pub mod http;
pub mod input_reader;
pub mod output_writer;
