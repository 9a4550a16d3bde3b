//! Ratedispatch - Rate-Limited Request Dispatcher
//!
//! This crate admits a fixed batch of requests for concurrent processing no
//! faster than a configured rate, with an initial burst allowance, and waits
//! for every dispatched task to finish before reporting.

pub mod config;
pub mod dispatch;
pub mod error;

pub use config::DispatcherConfig;
pub use dispatch::{DispatchReport, Dispatcher, PacingPolicy, Processor, Request};
pub use error::{DispatchError, Result};
