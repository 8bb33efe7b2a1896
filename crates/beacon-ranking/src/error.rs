//! Ranking errors.

use beacon_scheduler::LockError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("no ranking snapshot is cached")]
    CacheMiss,

    #[error("ranking snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("ranking did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Core(#[from] beacon_core::Error),
}

pub type RankingResult<T> = std::result::Result<T, RankingError>;

impl From<RankingError> for beacon_core::Error {
    fn from(err: RankingError) -> Self {
        match err {
            RankingError::Core(e) => e,
            RankingError::Timeout(limit) => {
                beacon_core::Error::Timeout(format!("ranking after {:?}", limit))
            }
            RankingError::CacheMiss => beacon_core::Error::NotFound("ranking snapshot".to_string()),
            other => beacon_core::Error::ExecutionFailed(other.to_string()),
        }
    }
}
