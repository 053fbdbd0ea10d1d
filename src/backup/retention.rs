use crate::backup::result_error::error::Error;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::result;
use std::time::{Duration, SystemTime};

/// Extension of result archives, also the marker of sweep candidates
pub static ARCHIVE_EXT: &str = "tar";

/// Age after which an archive is deleted.
///
/// In the config file: integer seconds, a humantime string (`7days`), or
/// `0` / `false` / `~` to disable expiration.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpireTime(Option<Duration>);

impl ExpireTime {
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn window(&self) -> Option<Duration> {
        self.0
    }
}

impl From<Duration> for ExpireTime {
    fn from(value: Duration) -> Self {
        Self(Some(value).filter(|d| !d.is_zero()))
    }
}

impl Debug for ExpireTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            None => f.write_str("disabled"),
            Some(d) => write!(f, "{}", humantime::format_duration(d)),
        }
    }
}

impl Serialize for ExpireTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        match self.0 {
            None => serializer.serialize_bool(false),
            Some(d) => serializer.serialize_str(&humantime::format_duration(d).to_string()),
        }
    }
}

struct ExpireTimeVisitor;

impl Visitor<'_> for ExpireTimeVisitor {
    type Value = ExpireTime;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("seconds, a duration like \"7days\", or false")
    }

    fn visit_u64<E>(self, v: u64) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Duration::from_secs(v).into())
    }

    fn visit_i64<E>(self, v: i64) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        u64::try_from(v)
            .map(|v| Duration::from_secs(v).into())
            .map_err(|_| E::custom(format!("expire time must not be negative, got {v}")))
    }

    fn visit_bool<E>(self, v: bool) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if v {
            Err(E::custom("expire time `true` has no duration, use seconds or e.g. \"7days\""))
        } else {
            Ok(ExpireTime::disabled())
        }
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        humantime::parse_duration(v)
            .map(ExpireTime::from)
            .map_err(E::custom)
    }

    fn visit_unit<E>(self) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(ExpireTime::disabled())
    }
}

impl<'de> Deserialize<'de> for ExpireTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_any(ExpireTimeVisitor)
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ItemWithDateTime<R> {
    pub item: R,
    pub modified: SystemTime,
}

impl<R> From<(R, SystemTime)> for ItemWithDateTime<R> {
    fn from(value: (R, SystemTime)) -> Self {
        Self {
            item: value.0,
            modified: value.1,
        }
    }
}

/// Outcome of one sweep. Failures never abort the sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<Error>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

fn is_archive_name(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ARCHIVE_EXT)
}

/// Archives directly inside `dir` last modified at or before `cutoff`.
///
/// Not recursive: subdirectories and anything in them are never returned.
pub fn expired_archives<P: AsRef<Path>>(
    dir: P,
    cutoff: SystemTime,
) -> std::io::Result<(Vec<ItemWithDateTime<PathBuf>>, Vec<Error>)> {
    let mut expired = Vec::new();
    let mut errors = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let checked = entry.and_then(|entry| {
            let file_type = entry.file_type()?;
            let path = entry.path();
            if !file_type.is_file() || !is_archive_name(&path) {
                return Ok(None);
            }
            let modified = entry.metadata()?.modified()?;
            Ok(Some(ItemWithDateTime::from((path, modified))))
        });

        match checked {
            Ok(Some(item)) if item.modified <= cutoff => expired.push(item),
            Ok(_) => {}
            Err(e) => errors.push(e.into()),
        }
    }

    Ok((expired, errors))
}

/// Deletes archives in `dir` older than `expire_time` at `now`.
///
/// Best effort: every deletion is attempted and logged on its own, and
/// failures end up in the report instead of stopping the sweep.
pub fn delete_expired<P: AsRef<Path>>(dir: P, expire_time: ExpireTime, now: SystemTime) -> SweepReport {
    delete_expired_with(dir, expire_time, now, |path| std::fs::remove_file(path))
}

/// [`delete_expired`] with `remove` doing the actual deletion of each archive.
pub fn delete_expired_with<P, F>(
    dir: P,
    expire_time: ExpireTime,
    now: SystemTime,
    mut remove: F,
) -> SweepReport
where
    P: AsRef<Path>,
    F: FnMut(&Path) -> std::io::Result<()>,
{
    let dir = dir.as_ref();
    let mut report = SweepReport::default();

    let Some(window) = expire_time.window() else {
        tracing::debug!("Expiration disabled, not sweeping {:?}", dir);
        return report;
    };
    let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);

    let (expired, errors) = match expired_archives(dir, cutoff) {
        Ok(found) => found,
        Err(e) => {
            tracing::error!("Cannot list backups folder {:?}: {e}", dir);
            report.failed.push(e.into());
            return report;
        }
    };
    for e in errors {
        tracing::warn!("Skipping unreadable entry in {:?}: {e}", dir);
        report.failed.push(e);
    }

    for item in expired {
        match remove(&item.item) {
            Ok(()) => {
                tracing::info!("Removed expired backup {:?}", item.item);
                report.deleted.push(item.item);
            }
            Err(error) => {
                let e = Error::Deletion {
                    path: item.item,
                    error,
                };
                tracing::error!("{e}");
                report.failed.push(e);
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn touch(path: &Path, modified: SystemTime) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn test_expire_time_deserialization() {
        let secs: ExpireTime = serde_yml::from_str("3600").unwrap();
        assert_eq!(secs.window(), Some(Duration::from_secs(3600)));

        let human: ExpireTime = serde_yml::from_str("7days").unwrap();
        assert_eq!(human.window(), Some(7 * DAY));

        for disabled in ["0", "false", "~"] {
            let parsed: ExpireTime = serde_yml::from_str(disabled).unwrap();
            assert_eq!(parsed, ExpireTime::disabled(), "{disabled}");
        }

        assert!(serde_yml::from_str::<ExpireTime>("true").is_err());
        assert!(serde_yml::from_str::<ExpireTime>("-5").is_err());
        assert!(serde_yml::from_str::<ExpireTime>("soon").is_err());
    }

    #[test]
    fn test_expiration_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let window = Duration::from_secs(3600);
        let old = temp_dir.path().join("old.tar");
        let young = temp_dir.path().join("young.tar");
        touch(&old, now - window - Duration::from_secs(1));
        touch(&young, now - window + Duration::from_secs(1));

        let report = delete_expired(temp_dir.path(), window.into(), now);

        assert!(report.is_clean());
        assert_eq!(report.deleted, vec![old.clone()]);
        assert!(!old.exists());
        assert!(young.exists());
    }

    #[test]
    fn test_only_top_level_tar_files_are_candidates() {
        let temp_dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let ancient = now - 30 * DAY;
        let log = temp_dir.path().join("notes.log");
        let nested = temp_dir.path().join("2016_01_02-15_04_05/files.tar");
        let staging = temp_dir.path().join("2016_01_03-15_04_05.tar.tmp");
        let tar_dir = temp_dir.path().join("dir.tar");
        touch(&log, ancient);
        touch(&nested, ancient);
        touch(&staging, ancient);
        std::fs::create_dir_all(&tar_dir).unwrap();

        let report = delete_expired(temp_dir.path(), DAY.into(), now);

        assert!(report.deleted.is_empty());
        assert!(log.exists());
        assert!(nested.exists());
        assert!(staging.exists());
        assert!(tar_dir.exists());
    }

    #[test]
    fn test_failed_deletion_is_reported_and_sweep_continues() {
        let temp_dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let locked = temp_dir.path().join("locked.tar");
        let free = temp_dir.path().join("free.tar");
        touch(&locked, now - 2 * DAY);
        touch(&free, now - 2 * DAY);

        let report = delete_expired_with(temp_dir.path(), DAY.into(), now, |path| {
            if path == locked {
                Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "permission denied",
                ))
            } else {
                std::fs::remove_file(path)
            }
        });

        assert_eq!(report.failed.len(), 1);
        match &report.failed[0] {
            Error::Deletion { path, .. } => assert_eq!(path, &locked),
            other => panic!("Expected deletion error, got {other:?}"),
        }
        assert_eq!(report.deleted, vec![free.clone()]);
        assert!(!free.exists());
        assert!(locked.exists());
    }

    #[test]
    fn test_disabled_expiration_deletes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let ancient = temp_dir.path().join("ancient.tar");
        touch(&ancient, SystemTime::UNIX_EPOCH + DAY);

        let report = delete_expired(temp_dir.path(), ExpireTime::disabled(), SystemTime::now());

        assert!(report.deleted.is_empty());
        assert!(report.is_clean());
        assert!(ancient.exists());
    }

    #[test]
    fn test_missing_folder_is_reported_not_raised() {
        let temp_dir = TempDir::new().unwrap();
        let report = delete_expired(
            temp_dir.path().join("missing"),
            DAY.into(),
            SystemTime::now(),
        );

        assert!(report.deleted.is_empty());
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn test_zero_duration_is_disabled() {
        assert_eq!(ExpireTime::from(Duration::ZERO), ExpireTime::disabled());
        assert_eq!(format!("{:?}", ExpireTime::disabled()), "disabled");
    }
}
