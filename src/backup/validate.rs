//! Validation functions for configuration values.
//!
//! Used through `#[validate(custom(function = ...))]` on the config structs.

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, TimeZone, Utc};
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

pub fn validate_valid_file_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || name == "." || name == ".." || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidFileName").with_message(
            format!(
                "Invalid file name {:?}, try sanitizing like {:?}",
                name,
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} does not exist", dir).into()));
    }

    Ok(())
}

/// The directory must already exist and accept new files.
///
/// Writability is probed by creating (and dropping) an anonymous temp file,
/// which also catches read-only mounts that permission bits miss.
pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist(dir)?;
    tempfile::tempfile_in(dir).map(|_| ()).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not writable: {}", dir, e).into())
    })
}

pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> Result<(), ValidationError> {
    let cron = cron.as_ref();
    if cron_parser::parse(cron, &Utc::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

/// Checks a chrono format string parses and renders to a usable file name.
pub fn validate_time_format<S: AsRef<str>>(format: S) -> Result<(), ValidationError> {
    let format = format.as_ref();
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ValidationError::new("InvalidTimeFormat")
            .with_message(format!("Invalid time format: {format:?}").into()));
    }

    let sample = Local
        .with_ymd_and_hms(2016, 1, 2, 15, 4, 5)
        .earliest()
        .unwrap_or_else(Local::now)
        .format(format)
        .to_string();
    validate_valid_file_name(sample)
}
