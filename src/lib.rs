//! # tar_backup
//!
//! Scheduled backups of directories and MySQL databases into a single
//! timestamped `.tar` archive, with expiration of old archives.
//!
//! ## Features
//!
//! - **Directories**: each configured directory becomes `<name>.tar`, optionally glob filtered
//! - **Databases**: dumped through a configurable command template, gzipped to `sql/<name>.sql.gz`
//! - **Retention**: archives older than `expire_time` are swept from the backups folder
//! - **Scheduling**: optional cron loop running sweep then backup on every tick
//!
//! ## Quick Start
//!
//! ```no_run
//! use tar_backup::backup::backup_config::BackupConfig;
//!
//! let runner = BackupConfig::load("config.yml")?.into_runner()?;
//!
//! runner.delete_junk();
//! let (archive, non_fatal) = runner.create()?;
//! println!("{}", archive.display());
//! if let Some(e) = non_fatal {
//!     eprintln!("{e}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
