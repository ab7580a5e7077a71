//! Exposure history for an exposure-notification app: the `ExposureRecord`
//! shown in the exposures list and the SQLite store that assigns its id.

pub mod config;
pub mod db;
mod utils;

pub use config::StoreConfig;
pub use db::{
    helpers::round_to_day, models::ExposureRecord, repositories::EXPOSURE_COLUMNS, Database,
};

/// Installs `env_logger` with `info` as the default level. `RUST_LOG`
/// overrides it.
pub fn init_logging() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
}
