//! dlpool Core - Download Engine
//!
//! This crate provides the core download functionality for dlpool: a fixed
//! pool of worker threads pulling [`DownloadTask`]s off a shared queue and
//! streaming each one into its sink while reporting progress to listeners.
//!
//! ```no_run
//! use dlpool_core::{DownloadEngine, DownloadTask, EngineConfig};
//!
//! # fn main() -> Result<(), dlpool_core::DlpoolError> {
//! let engine = DownloadEngine::new(EngineConfig::default());
//! let handle = engine.submit(DownloadTask::to_file(
//!     "https://example.com/archive.zip",
//!     "archive.zip",
//! )?)?;
//! engine.start()?;
//! handle.wait();
//! engine.shutdown();
//! engine.join();
//! # Ok(())
//! # }
//! ```

mod auth;
pub mod config;
mod connector;
mod engine;
mod error;

pub use auth::*;
pub use connector::*;
pub use engine::*;
pub use error::*;

pub use dlpool_types::{Credential, EngineConfig, EngineState, ProgressEvent, TaskStatus};
