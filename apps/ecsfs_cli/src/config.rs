use log::LevelFilter;

pub const LOG_ENV: &str = "ECSFS_LOG";

#[cfg(feature = "verbose-logging")]
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Trace;

#[cfg(not(feature = "verbose-logging"))]
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Warn;

pub struct Config {
    pub log_level: LevelFilter,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_value(std::env::var(LOG_ENV).ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        let log_level = value
            .and_then(|level| level.trim().parse().ok())
            .unwrap_or(DEFAULT_LOG_LEVEL);
        Self { log_level }
    }
}
