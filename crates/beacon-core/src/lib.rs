//! Core domain types and traits for the beacon job scheduler.
//!
//! This crate contains:
//! - Job definitions, statuses and cron schedule evaluation
//! - The `Executor` trait implemented by runnable job backends
//! - Lease and shared-cache storage abstractions
//! - Article and interactive-count collaborator contracts used by ranking

pub mod article;
pub mod cache;
pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod lease;

pub use error::{Error, Result};
pub use id::HolderId;
