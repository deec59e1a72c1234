use std::{
    env,
    ffi::OsString,
    fs,
    path::PathBuf,
    str::FromStr,
};

use anyhow::{anyhow, Context as _, Result};
use log::LevelFilter;
use log4rs::{
    append::file::FileAppender,
    config::{Appender, Config, Root},
    encode::json::JsonEncoder,
};
use once_cell::sync::OnceCell;

use crate::config::Settings;

const LOG_FILE: &str = "monokle.log";

pub struct Logger;

pub static LOGGER_ENABLED: OnceCell<bool> = OnceCell::new();

#[macro_export]
macro_rules! logger {
    ($level:ident, $($arg:tt)+) => {
        if let Some(true) = $crate::logging::LOGGER_ENABLED.get() {
            ::log::$level!($($arg)+);
        }
    };
}

/// `RUST_LOG` wins over `log_level` from the settings. Defaults to info.
pub fn level_filter(env_level: Option<String>, settings: &Settings) -> Result<LevelFilter> {
    let level = env_level
        .or_else(|| settings.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    LevelFilter::from_str(&level).map_err(|_| anyhow!("invalid log level {:?}", level))
}

/// `LOG_PATH`, else `monokle/monokle.log` under the local data directory.
pub fn log_path(env_path: Option<OsString>) -> PathBuf {
    match env_path {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => dirs::data_local_dir()
            .map(|dir| dir.join("monokle").join(LOG_FILE))
            .unwrap_or_else(|| PathBuf::from(LOG_FILE)),
    }
}

impl Logger {
    pub fn init(settings: &Settings) -> Result<()> {
        let level_filter = level_filter(env::var("RUST_LOG").ok(), settings)?;

        let log_path = log_path(env::var_os("LOG_PATH"));

        if let Some(dir) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let logfile = FileAppender::builder()
            .append(false)
            .encoder(Box::new(JsonEncoder::new()))
            .build(&log_path)?;

        let config = Config::builder()
            .appender(Appender::builder().build("logfile", Box::new(logfile)))
            .build(Root::builder().appender("logfile").build(level_filter))?;

        log4rs::init_config(config)?;

        LOGGER_ENABLED
            .set(true)
            .map_err(|_| anyhow!("logger already initialized"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn env_level_wins_over_settings() {
        let settings = Settings {
            log_level: Some("warn".into()),
            ..Default::default()
        };

        assert_eq!(
            level_filter(Some("trace".into()), &settings).unwrap(),
            LevelFilter::Trace
        );
        assert_eq!(level_filter(None, &settings).unwrap(), LevelFilter::Warn);
        assert_eq!(
            level_filter(None, &Settings::default()).unwrap(),
            LevelFilter::Info
        );
    }

    #[test]
    fn unknown_level_is_an_error() {
        assert!(level_filter(Some("loud".into()), &Settings::default()).is_err());
    }

    #[test]
    fn log_path_defaults_to_data_dir() {
        assert_eq!(
            log_path(Some("/tmp/custom.log".into())),
            PathBuf::from("/tmp/custom.log")
        );

        if let Some(dir) = dirs::data_local_dir() {
            assert_eq!(log_path(None), dir.join("monokle").join("monokle.log"));
            assert_eq!(
                log_path(Some(OsString::new())),
                dir.join("monokle").join("monokle.log")
            );
        }
    }
}
