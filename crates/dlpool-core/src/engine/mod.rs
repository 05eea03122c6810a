//! Download Engine - the heart of dlpool
//!
//! This module implements a classic producer/consumer download pool:
//! - One unbounded FIFO queue shared by every worker
//! - A fixed number of worker threads, each running one transfer at a time
//! - Cooperative pause/resume/cancel checked between chunks
//! - Synchronous progress callbacks on the worker thread

mod listener;
mod manager;
mod queue;
mod task;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use listener::*;
pub use manager::*;
pub use task::{DownloadTask, ListenerId, TaskHandle};
