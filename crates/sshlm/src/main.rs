mod config;
mod output;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio::sync::watch;

use sshlm_core::{
    collect_keys, correlate, events_to_sessions, follow_journal, read_journal, read_log_file,
    CorrelationState, FingerprintRegistry, KeyFollower, MemoryRegistry, SessionEvent, Tailer,
};
use sshlm_db::Database;
use sshlm_logging::{init_tracing, LogFormat};

use config::{FileConfig, LogSource, Overrides, Settings};
use output::OutputFormat;

type Registry = Arc<dyn FingerprintRegistry + Send + Sync>;

#[derive(Parser, Debug)]
#[command(
    name = "sshlm",
    about = "Reconstruct SSH login sessions from sshd logs",
    version,
    author
)]
struct Cli {
    /// Config file (default: ~/.config/sshlm/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// authorized_keys file to collect fingerprints from (repeatable)
    #[arg(short, long = "authkeys")]
    authkeys: Vec<PathBuf>,

    /// CSV of `user,fingerprint` lines to use instead of the database
    #[arg(short, long)]
    users: Option<PathBuf>,

    /// Log file to read, or "journal" for the systemd journal
    #[arg(short, long)]
    log: Option<String>,

    /// Fingerprint database (default: ~/.local/share/sshlm/fingerprints.db)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Print the existing log, then keep running and print events as they are logged
    #[arg(short, long)]
    follow: bool,

    /// In follow mode, also pick up keys appended to the authorized_keys files
    #[arg(long)]
    follow_authkeys: bool,

    /// Overwrite the key user of fingerprints already in the registry
    #[arg(long)]
    update_keys: bool,

    /// In follow mode, continue from the last position read in the log file
    #[arg(long)]
    resume: bool,

    /// Print the fingerprints stored in the database and exit
    #[arg(long)]
    list_keys: bool,

    /// Colorize output using the configured theme
    #[arg(long)]
    color: bool,

    /// Diagnostic log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Diagnostic log format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormatChoice,

    /// Also write diagnostics as JSON to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            authkeys: self.authkeys.clone(),
            users: self.users.clone(),
            log: self.log.clone(),
            database: self.database.clone(),
            output: self.output,
            color: self.color,
            follow: self.follow,
            follow_authkeys: self.follow_authkeys,
            update_keys: self.update_keys,
            resume: self.resume,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_tracing(&cli.log_level, cli.log_format.into(), cli.log_file.as_deref());

    let settings = Settings::resolve(cli.overrides(), load_config(cli.config.as_deref())?);
    colored::control::set_override(settings.theme.is_some());

    let (registry, db): (Registry, Option<Arc<Database>>) = match &settings.users {
        Some(users) => {
            // Positions still live in the database when resuming.
            let db = if settings.resume {
                Some(open_database(&settings.database)?)
            } else {
                None
            };
            let registry: Registry = Arc::new(load_users(users)?);
            (registry, db)
        }
        None => {
            let db = open_database(&settings.database)?;
            let registry: Registry = db.clone();
            (registry, Some(db))
        }
    };

    if !settings.authkeys.is_empty() {
        let written = collect_keys(&settings.authkeys, &registry, settings.update_keys)
            .context("Failed to collect authorized keys")?;
        tracing::info!("{} fingerprint(s) written to the registry", written);
    }

    if cli.list_keys {
        let db = match db {
            Some(db) => db,
            None => open_database(&settings.database)?,
        };
        let records = db
            .fingerprints()
            .list()
            .context("Failed to list fingerprints")?;
        output::print_fingerprints(&records);
        return Ok(());
    }

    if settings.follow {
        follow(&settings, registry, db).await
    } else {
        report(&settings, &registry).await
    }
}

fn load_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file {} not found", path.display());
            }
            path.to_path_buf()
        }
        None => match FileConfig::default_path() {
            Some(path) => path,
            None => return Ok(FileConfig::default()),
        },
    };

    Ok(FileConfig::load(&path)?.unwrap_or_default())
}

fn open_database(path: &Path) -> Result<Arc<Database>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let db = Database::open_at(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(db))
}

fn load_users(path: &Path) -> Result<MemoryRegistry> {
    let file =
        File::open(path).with_context(|| format!("Failed to open users file {}", path.display()))?;
    MemoryRegistry::from_csv(BufReader::new(file))
        .with_context(|| format!("Failed to load users from {}", path.display()))
}

/// Read the whole log once and print the report.
async fn report(settings: &Settings, registry: &Registry) -> Result<()> {
    let mut events = match &settings.log {
        LogSource::File(path) => read_log_file(path, registry)
            .with_context(|| format!("Failed to read log file {}", path.display()))?,
        LogSource::Journal => read_journal(registry)
            .await
            .context("Failed to read the sshd journal")?,
        LogSource::None => {
            println!("No log file specified, fingerprints collected.");
            return Ok(());
        }
    };

    let sessions = events_to_sessions(&mut events);
    output::print_report(settings.output, &events, &sessions, settings.theme.as_ref())
}

/// Print the existing log, then new events until interrupted.
async fn follow(settings: &Settings, registry: Registry, db: Option<Arc<Database>>) -> Result<()> {
    let follow_keys = settings.follow_authkeys && !settings.authkeys.is_empty();
    if settings.log == LogSource::None && !follow_keys {
        println!("No log file specified, nothing to follow.");
        return Ok(());
    }

    let stop = shutdown_signal()?;
    let theme = settings.theme;
    let print = |event: &SessionEvent| output::print_event(event, theme.as_ref());
    let mut sessions = Vec::new();

    let logs = async {
        match &settings.log {
            LogSource::File(path) => {
                let mut tailer = Tailer::attach(path, registry.clone())
                    .with_context(|| format!("Failed to open log file {}", path.display()))?;
                if let (true, Some(db)) = (settings.resume, &db) {
                    tailer = tailer.with_positions(db.clone())?;
                }

                let history = tailer
                    .replay_history(&mut sessions)
                    .with_context(|| format!("Failed to read log file {}", path.display()))?;
                output::print_report(settings.output, &history, &sessions, theme.as_ref())?;

                tailer.run(&mut sessions, cancelled(stop.clone()), print).await?;
            }
            LogSource::Journal => {
                let mut state = CorrelationState::new();
                let mut history = read_journal(&registry)
                    .await
                    .context("Failed to read the sshd journal")?;
                sessions = correlate(&mut history, &mut state);
                output::print_report(settings.output, &history, &sessions, theme.as_ref())?;

                follow_journal(&registry, &mut state, &mut sessions, cancelled(stop.clone()), print)
                    .await?;
            }
            LogSource::None => cancelled(stop.clone()).await,
        }
        Ok::<_, anyhow::Error>(())
    };

    let keys = async {
        if follow_keys {
            let mut follower =
                KeyFollower::attach(&settings.authkeys, registry.clone(), settings.update_keys)?;
            follower.run(cancelled(stop.clone())).await?;
        }
        Ok::<_, anyhow::Error>(())
    };

    tokio::try_join!(logs, keys)?;

    let open = sessions.iter().filter(|s| s.is_open()).count();
    tracing::info!("{} session(s) seen, {} still open", sessions.len(), open);
    Ok(())
}

fn shutdown_signal() -> Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, exiting");
        let _ = tx.send(true);
    })
    .context("Failed to install interrupt handler")?;
    Ok(rx)
}

async fn cancelled(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
