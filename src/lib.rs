//! Client-side synchronization of one chat conversation: history baseline,
//! live channel and optimistic sends merged into a single timeline.

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod storage;

pub use error::{ChatError, Result};
