//! KDL configuration parsing for beacon.
//!
//! A single `beacon.kdl` file configures the database connection, the
//! scheduler loop, the ranking job and the jobs seeded at startup.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, RankingSettings, SchedulerSettings, SeedJob, SystemConfig,
    load_system_config, parse_system_config,
};
