use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use socialpulse::api::{HttpProfileRemote, RemoteError};
use socialpulse::config::{ConfigError, PulseConfig};
use socialpulse::live::{LiveReconciler, WsConnector};
use socialpulse::profile::{Notice, ProfileRecord, ProfileStore, ProfileView, WriteReport};
use socialpulse::session::{clear_token, store_token};
use socialpulse::stats::StatsSnapshot;
use socialpulse::storage::{FileStore, StoreError};
use tracing_subscriber::EnvFilter;


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("local store failed: {0}")]
    Store(#[from] StoreError),
    #[error("remote client failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("invalid field `{0}`; expected KEY=VALUE")]
    InvalidAssignment(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "pulse-cli", about = "SocialPulse live stats and profile sync CLI")]
struct Cli {
    #[arg(long, env = "PULSE_API_BASE_URL")]
    api_base_url: Option<String>,

    #[arg(long, env = "PULSE_WS_BASE_URL")]
    ws_base_url: Option<String>,

    #[arg(long, env = "PULSE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream live dashboard state as JSON lines until Ctrl-C.
    Watch {
        /// Nudge the snapshot with simulated deltas while offline.
        #[arg(long, default_value_t = false)]
        simulate: bool,

        #[arg(long, env = "PULSE_SESSION_ID")]
        session: Option<String>,
    },
    Profile(ProfileCommand),
    /// Store a bearer token for remote profile calls.
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored token and return to guest mode.
    Logout,
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Show,
    /// Update fields, e.g. `twitter_handle=@ana`.
    Set {
        #[arg(required = true)]
        fields: Vec<String>,
    },
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    if let Err(error) = dotenv {
        tracing::debug!(%error, "no .env file loaded");
    }

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Watch { simulate, session } => run_watch(config, simulate, session).await,
        Command::Profile(profile) => run_profile(&config, profile).await,
        Command::Login { token } => {
            let local = FileStore::open(&config.data_dir)?;
            store_token(&local, &token)?;
            println!("logged in; token stored in {}", local.path().display());
            Ok(())
        }
        Command::Logout => {
            let local = FileStore::open(&config.data_dir)?;
            clear_token(&local)?;
            println!("logged out");
            Ok(())
        }
    }
}

/// Flags win over the environment; everything else falls back to `PULSE_*`.
fn load_config(cli: &Cli) -> Result<PulseConfig, CliError> {
    let mut overrides = HashMap::new();
    if let Some(url) = &cli.api_base_url {
        overrides.insert("PULSE_API_BASE_URL", url.clone());
    }
    if let Some(url) = &cli.ws_base_url {
        overrides.insert("PULSE_WS_BASE_URL", url.clone());
    }
    if let Some(dir) = &cli.data_dir {
        overrides.insert("PULSE_DATA_DIR", dir.to_string_lossy().into_owned());
    }
    let config = PulseConfig::from_lookup(|key| overrides.get(key).cloned().or_else(|| std::env::var(key).ok()))?;
    Ok(config)
}

async fn run_watch(config: PulseConfig, simulate: bool, session: Option<String>) -> Result<(), CliError> {
    let mut live_config = config.live;
    live_config.simulate |= simulate;
    if let Some(session) = session {
        live_config.session_id = session;
    }
    tracing::info!(endpoint = %live_config.endpoint(), simulate = live_config.simulate, "watching live stats");

    let connector = Arc::new(WsConnector::new(Duration::from_secs(config.timeouts.connect_secs)));
    let live = LiveReconciler::spawn(live_config, connector, StatsSnapshot::demo());
    let mut rx = live.subscribe();

    let first = serde_json::to_string(&*rx.borrow_and_update())?;
    println!("{first}");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(CliError::Signal)?;
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = serde_json::to_string(&*rx.borrow_and_update())?;
                println!("{line}");
            }
        }
    }

    live.shutdown().await;
    Ok(())
}

async fn run_profile(config: &PulseConfig, profile: ProfileCommand) -> Result<(), CliError> {
    let local = Arc::new(FileStore::open(&config.data_dir)?);
    let remote = Arc::new(HttpProfileRemote::new(&config.api_base_url, config.timeouts)?);
    let store = ProfileStore::new(local, remote);

    match profile.command {
        ProfileSubcommand::Show => {
            let view = store.load().await;
            print_notices(&view.notices);
            let mut json = serde_json::to_value(&view)?;
            if let Value::Object(fields) = &mut json {
                fields.insert("connected_platforms".to_owned(), view.record.connected_platforms().into());
            }
            print_json(&json)
        }
        ProfileSubcommand::Set { fields } => {
            let (record, notices) = edit_record(store.load().await, &fields)?;
            print_notices(&notices);
            let report = store.save(&record).await;
            print_report(&report)
        }
        ProfileSubcommand::Clear => {
            let report = store.clear().await;
            print_report(&report)
        }
    }
}

/// Apply `fields` over the loaded record. The load notices are handed back so
/// the caller can show why the base record may be local or empty.
fn edit_record(view: ProfileView, fields: &[String]) -> Result<(ProfileRecord, Vec<Notice>), CliError> {
    let mut record = view.record.with_known_platforms();
    for field in fields {
        let (key, value) = parse_assignment(field)?;
        record.set(key, value);
    }
    Ok((record, view.notices))
}

/// Split `KEY=VALUE`, trimming both sides. An empty value clears the field.
fn parse_assignment(field: &str) -> Result<(&str, &str), CliError> {
    match field.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => Err(CliError::InvalidAssignment(field.to_owned())),
    }
}

fn print_report(report: &WriteReport) -> Result<(), CliError> {
    print_notices(&report.notices());
    print_json(&serde_json::to_value(report)?)
}

fn print_notices(notices: &[Notice]) {
    for notice in notices {
        eprintln!("{}", render_notice(notice));
    }
}

fn render_notice(notice: &Notice) -> String {
    format!("{:?}: {}", notice.level, notice.message)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
