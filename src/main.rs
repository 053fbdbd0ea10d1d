use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;
use tar_backup::backup::backup_config::BackupConfig;
use tar_backup::backup::result_error::result::Result;
use tar_backup::backup::result_error::WithMsg;
use tar_backup::backup::runner::BackupRunner;
use tracing::{error, info, warn};

/// Create tar backups of directories and databases, and delete old ones
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create one backup and print the archive path
    Create,
    /// Delete archives older than the configured expire time
    DeleteJunk,
    /// Sweep and back up on every tick of the configured cron
    Run,
}

fn dispatch(runner: &BackupRunner, command: &Command) -> Result<()> {
    match command {
        Command::Create => {
            let (archive, non_fatal_error) = runner.create()?;
            if let Some(non_fatal_error) = non_fatal_error {
                warn!("Received non fatal error: {non_fatal_error}")
            }
            println!("{}", archive.display());
            Ok(())
        }
        Command::DeleteJunk => {
            let report = runner.delete_junk();
            info!(
                "Deleted {} expired backups, {} failures",
                report.deleted.len(),
                report.failed.len()
            );
            Ok(())
        }
        Command::Run => runner.start_loop(),
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let res = BackupConfig::load(&args.config)
        .with_msg(format!("Loading config failed: {:?}", &args.config))
        .and_then(BackupConfig::into_runner)
        .and_then(|runner| dispatch(&runner, &args.command));

    if let Err(e) = res {
        error!("{e}");
        exit(1);
    }
}
