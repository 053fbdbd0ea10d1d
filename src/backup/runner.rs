use crate::backup::archive::directory::{backup_files, DirectoryEntry};
use crate::backup::dump::{DatabaseDumper, DatabaseEntry};
use crate::backup::filename::FilenameStrategy;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use crate::backup::retention::{delete_expired, ExpireTime, SweepReport, ARCHIVE_EXT};
use bon::Builder;
use chrono::{DateTime, Local, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, warn};

/// What to do when a run finds its working directory already present
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleWorkingDirPolicy {
    /// Fail the run, leaving the directory untouched
    #[default]
    Reject,
    /// Reuse the directory and its content
    Reuse,
}

/// Creates full backups into a backups folder and sweeps expired ones.
///
/// Runs are sequential and blocking. Nothing stops two runs, or a run and a
/// sweep, from touching the backups folder at the same time.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct BackupRunner {
    /// Absolute, checked writable when built from a config
    #[builder(into)]
    backups_folder: PathBuf,
    #[builder(default)]
    filename: FilenameStrategy,
    #[builder(default)]
    expire_time: ExpireTime,
    cron: Option<String>,
    #[builder(default)]
    directories: BTreeMap<String, DirectoryEntry>,
    #[builder(default)]
    databases: BTreeMap<String, DatabaseEntry>,
    #[builder(default = DatabaseDumper::builder().build())]
    dumper: DatabaseDumper,
    #[builder(default)]
    stale_working_dir: StaleWorkingDirPolicy,
}

impl BackupRunner {
    /// Runs one full backup now.
    ///
    /// See [`BackupRunner::create_at`].
    pub fn create(&self) -> Result<(PathBuf, Option<Error>)> {
        self.create_at(Local::now())
    }

    /// Runs one full backup named after `now`.
    ///
    /// Returns the path of `<backups_folder>/<name>.tar` and, when some
    /// database dumps failed without aborting the run, those failures. On a
    /// fatal error the working directory is left in place.
    pub fn create_at(&self, now: DateTime<Local>) -> Result<(PathBuf, Option<Error>)> {
        let file_name = self.filename.file_name(&now)?;
        let working_dir = self.backups_folder.join(&file_name);
        let archive_path = self
            .backups_folder
            .join(format!("{file_name}.{ARCHIVE_EXT}"));

        info!("Starting backup run {:?}", file_name);
        self.allocate_working_dir(&working_dir)?;

        let non_fatal = self
            .fill_working_dir(&working_dir)
            .and_then(|non_fatal| {
                let members = DirectoryEntry::builder()
                    .name(&file_name)
                    .path(&working_dir)
                    .build()
                    .archive_to(&archive_path)?;
                info!("Bundled {} files into {:?}", members, archive_path);
                Ok(non_fatal)
            })
            .map_err(|e| {
                error!("Backup run {:?} failed, keeping {:?}", file_name, working_dir);
                e.with_msg(format!("Backup run {file_name:?} failed"))
            })?;

        std::fs::remove_dir_all(&working_dir)?;
        info!("Created backup {:?}", archive_path);

        Ok((archive_path, non_fatal))
    }

    /// Archives directories, then dumps databases, into `working_dir`.
    fn fill_working_dir(&self, working_dir: &Path) -> Result<Option<Error>> {
        backup_files(working_dir, &self.directories)?;

        let failures = self
            .dumper
            .backup_database(working_dir, &self.databases)?
            .into_iter()
            .filter_map(|outcome| outcome.result.err())
            .collect();

        Ok(convert_error_vec(failures).err())
    }

    fn allocate_working_dir(&self, working_dir: &Path) -> Result<()> {
        if working_dir.is_dir() {
            return match self.stale_working_dir {
                StaleWorkingDirPolicy::Reject => Err(Error::resource_creation(
                    working_dir,
                    "a directory with this name already exists",
                )),
                StaleWorkingDirPolicy::Reuse => {
                    warn!("Reusing existing working directory {:?}", working_dir);
                    Ok(())
                }
            };
        }

        if working_dir.exists() {
            return Err(Error::resource_creation(
                working_dir,
                "a non-directory with this name already exists",
            ));
        }

        std::fs::create_dir(working_dir)
            .map_err(|e| Error::resource_creation(working_dir, e.to_string()))
    }

    /// Deletes expired archives from the backups folder.
    ///
    /// Never fails; see [`SweepReport`] and the logs for what happened.
    pub fn delete_junk(&self) -> SweepReport {
        self.delete_junk_at(SystemTime::now())
    }

    pub fn delete_junk_at(&self, now: SystemTime) -> SweepReport {
        let report = delete_expired(&self.backups_folder, self.expire_time, now);
        if !report.deleted.is_empty() || !report.is_clean() {
            info!(
                "Retention sweep removed {} archives, {} failures",
                report.deleted.len(),
                report.failed.len()
            );
        }
        report
    }

    /// Sweeps and creates a backup on every cron tick, forever.
    ///
    /// A failed run is logged and the loop waits for the next tick.
    pub fn start_loop(&self) -> Result<()> {
        let cron = self
            .cron
            .as_deref()
            .ok_or_else(|| Error::configuration("no cron expression configured"))?;

        let mut next = next_tick(cron, &Utc::now())?;
        loop {
            let now = Utc::now();
            if now < next {
                info!("Sleeping until {next}");
                std::thread::sleep((next - now).to_std().unwrap_or_default());
                continue;
            }

            self.delete_junk();
            info!("Trying to create backup...");
            match self.create_at(now.with_timezone(&Local)) {
                Ok((file_path, non_fatal_error)) => {
                    info!("Created backup file: {:?}", &file_path);
                    if let Some(non_fatal_error) = non_fatal_error {
                        warn!("Received non fatal error: {non_fatal_error}")
                    }
                }
                Err(e) => error!("{e}"),
            }
            next = next_tick(cron, &now)?;
        }
    }
}

fn next_tick(cron: &str, after: &DateTime<Utc>) -> Result<DateTime<Utc>> {
    cron_parser::parse(cron, after)
        .map_err(|e| Error::configuration(format!("invalid cron string {cron:?}: {e}")))
}
