use crate::backup::alias::resolve_path;
use crate::backup::archive::directory::{DirectoryConfig, DirectoryEntry};
use crate::backup::dump::template::DumpCommandTemplate;
use crate::backup::dump::{DatabaseConfig, DatabaseDumper, DumpFailurePolicy, DEFAULT_COMPRESSION_LEVEL};
use crate::backup::filename::{FilenameStrategy, DEFAULT_FILENAME_FORMAT};
use crate::backup::resolver::{resolve_databases, resolve_primary, ConnectionRegistry, PrimaryConnectionProvider};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use crate::backup::retention::ExpireTime;
use crate::backup::runner::{BackupRunner, StaleWorkingDirPolicy};
use crate::backup::validate::{
    validate_cron_str, validate_time_format, validate_valid_file_name, validate_writable_dir,
};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

fn default_backup_filename() -> String {
    DEFAULT_FILENAME_FORMAT.to_string()
}

fn default_primary_db() -> Option<String> {
    Some("db".to_string())
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

/// Backup configuration as read from YAML.
///
/// Validation checks everything that can be checked without running a
/// backup. [`BackupConfig::build_runner`] then resolves aliases and the
/// database set and makes the backups folder absolute.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Must exist and be writable; may start with an alias
    pub backups_folder: PathBuf,
    /// chrono format of the run name
    #[serde(default = "default_backup_filename")]
    #[validate(custom(function = validate_time_format))]
    pub backup_filename: String,
    #[serde(default)]
    pub expire_time: ExpireTime,
    #[validate(custom(function = validate_cron_str))]
    pub cron: Option<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, PathBuf>,
    #[serde(default)]
    #[validate(custom(function = validate_entry_names))]
    pub directories: BTreeMap<String, DirectoryConfig>,
    /// Name of the primary connection, `~` disables it
    #[serde(default = "default_primary_db")]
    pub db: Option<String>,
    #[serde(default)]
    pub connections: ConnectionRegistry,
    #[serde(default)]
    #[validate(custom(function = validate_entry_names))]
    pub databases: BTreeMap<String, DatabaseConfig>,
    #[serde(default)]
    #[validate(custom(function = validate_dump_command))]
    pub dump_command: DumpCommandTemplate,
    #[serde(default = "default_compression_level")]
    #[validate(range(min = 0, max = 9))]
    pub compression_level: u32,
    #[serde(default)]
    pub on_dump_failure: DumpFailurePolicy,
    #[serde(default)]
    pub stale_working_dir: StaleWorkingDirPolicy,
}

fn validate_entry_names<V>(entries: &BTreeMap<String, V>) -> std::result::Result<(), ValidationError> {
    entries.keys().try_for_each(validate_valid_file_name)
}

fn validate_dump_command(command: &DumpCommandTemplate) -> std::result::Result<(), ValidationError> {
    if command.is_empty() {
        return Err(ValidationError::new("EmptyDumpCommand")
            .with_message("dump_command must name a program".into()));
    }
    Ok(())
}

impl BackupConfig {
    /// Reads and validates a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: BackupConfig = serde_yml::from_reader(File::open(path)?)?;
        config
            .validate()
            .map_err(Error::from)
            .map(|_| config)
            .with_debug_object_and_fn_name(path.to_path_buf(), "BackupConfig::load")
    }

    /// Builds a runner using the `connections` section as primary provider.
    pub fn into_runner(self) -> Result<BackupRunner> {
        let connections = self.connections.clone();
        self.build_runner(&connections)
    }

    /// Builds a runner, asking `provider` for the primary connection.
    ///
    /// Fails fast if the backups folder is not a writable directory or a
    /// path uses an unknown alias.
    pub fn build_runner<P: PrimaryConnectionProvider + ?Sized>(
        self,
        provider: &P,
    ) -> Result<BackupRunner> {
        validate_time_format(&self.backup_filename).map_err(|e| {
            Error::configuration(format!("backup_filename {:?}: {e}", self.backup_filename))
        })?;
        let backups_folder = resolve_path(&self.backups_folder, &self.aliases)?;
        validate_writable_dir(&backups_folder).map_err(|e| {
            Error::configuration(format!("backups folder {:?}: {e}", backups_folder))
        })?;

        let directories = self
            .directories
            .iter()
            .map(|(name, config)| {
                let entry = DirectoryEntry::builder()
                    .name(name)
                    .path(resolve_path(config.path(), &self.aliases)?)
                    .maybe_filter(config.filter().cloned())
                    .build();
                Ok::<_, Error>((name.clone(), entry))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let primary = resolve_primary(provider, self.db.as_deref());
        let databases = resolve_databases(&self.databases, primary);

        let dumper = DatabaseDumper::builder()
            .default_command(self.dump_command)
            .compression_level(self.compression_level)
            .on_failure(self.on_dump_failure)
            .build();

        Ok(BackupRunner::builder()
            .backups_folder(backups_folder)
            .filename(FilenameStrategy::Format(self.backup_filename.into()))
            .expire_time(self.expire_time)
            .maybe_cron(self.cron)
            .directories(directories)
            .databases(databases)
            .dumper(dumper)
            .stale_working_dir(self.stale_working_dir)
            .build())
    }
}
