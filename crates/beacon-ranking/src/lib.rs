//! Hot article ranking for beacon.
//!
//! [`RankingJob`] runs on the scheduler under a distributed lock, computes
//! the top-N articles with [`RankingComputer`] and publishes the result to
//! a two-tier [`RankingCache`].

pub mod cache;
pub mod computer;
pub mod error;
pub mod job;
pub mod service;
pub mod topn;

#[cfg(test)]
mod testing;

pub use cache::{RankingCache, RankingLocalCache, RankingSharedCache};
pub use computer::{RankingComputer, ScoreFn, hot_score};
pub use error::{RankingError, RankingResult};
pub use job::{LOCAL_RANKING, RankingJob, register_local};
pub use service::RankingService;
pub use topn::TopN;
