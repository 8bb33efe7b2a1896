//! Repository traits and implementations.

pub mod article;
pub mod cache;
pub mod job;
pub mod lease;

pub use article::{PgArticleReader, PgInteractiveReader};
pub use cache::PgSharedCache;
pub use job::{JobRecord, JobStore, NewJob, PgJobStore};
pub use lease::PgLeaseStore;
