use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::validate_valid_file_name;
use chrono::{DateTime, Local};
use std::fmt::{Debug, Formatter, Write};
use std::sync::Arc;

/// Default chrono format, renders as `2016_01_02-15_04_05`
pub static DEFAULT_FILENAME_FORMAT: &str = "%Y_%m_%d-%H_%M_%S";

pub type NamingFn = dyn Fn(&DateTime<Local>) -> String + Send + Sync;

/// How a backup run names its working directory and result archive.
#[derive(Clone)]
pub enum FilenameStrategy {
    /// chrono format string applied to the run start time
    Format(Arc<str>),
    /// caller supplied naming function
    Custom(Arc<NamingFn>),
}

impl Default for FilenameStrategy {
    fn default() -> Self {
        Self::Format(DEFAULT_FILENAME_FORMAT.into())
    }
}

impl Debug for FilenameStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(format) => f.debug_tuple("Format").field(format).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FilenameStrategy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&DateTime<Local>) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Renders the base name (no extension) for a run started at `now`.
    pub fn file_name(&self, now: &DateTime<Local>) -> Result<String> {
        let name = match self {
            Self::Format(format) => {
                let mut name = String::new();
                write!(name, "{}", now.format(format)).map_err(|_| {
                    Error::configuration(format!("invalid backup file name format {format:?}"))
                })?;
                name
            }
            Self::Custom(f) => f(now),
        };

        validate_valid_file_name(&name).map_err(|e| {
            Error::configuration(format!("backup file name {name:?} is not path safe: {e}"))
        })?;

        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2016, 1, 2, 15, 4, 5).unwrap()
    }

    #[test]
    fn test_default_format() {
        let name = FilenameStrategy::default().file_name(&fixed_time()).unwrap();
        assert_eq!(name, "2016_01_02-15_04_05");
    }

    #[test]
    fn test_same_instant_same_name() {
        let strategy = FilenameStrategy::default();
        let now = Local::now();
        assert_eq!(
            strategy.file_name(&now).unwrap(),
            strategy.file_name(&now).unwrap()
        );
    }

    #[test]
    fn test_custom_strategy() {
        let strategy = FilenameStrategy::custom(|dt| format!("site-{}", dt.format("%Y%m%d")));
        assert_eq!(strategy.file_name(&fixed_time()).unwrap(), "site-20160102");
    }

    #[test]
    fn test_unsafe_custom_name_rejected() {
        let strategy = FilenameStrategy::custom(|_| "../escape".to_string());
        match strategy.file_name(&fixed_time()) {
            Err(Error::Configuration(_)) => (),
            other => panic!("Expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_format_is_error() {
        let strategy = FilenameStrategy::Format("%Q".into());
        match strategy.file_name(&fixed_time()) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("%Q")),
            other => panic!("Expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_hides_closure() {
        let strategy = FilenameStrategy::custom(|_| "x".to_string());
        assert_eq!(format!("{strategy:?}"), "Custom(..)");
    }
}
