use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use grade_watch::config::{Config, ConfigOverrides};
use grade_watch::monitor::{
    build_orchestrator, schedule_interval, CycleResult, EventBus, MonitorEvent, Scheduler,
    StopReason,
};
use grade_watch::notify::Dispatcher;
use grade_watch::output::csv::{changes_to_csv, snapshot_to_csv};
use grade_watch::output::json::render_json;
use grade_watch::output::table::{
    render_changes_table, render_cycle_table, render_snapshot_table,
};
use grade_watch::server::{run_server, ApiState, StatusBoard};
use grade_watch::session::{FixtureDriver, SessionDriver, WebDriverSessionDriver};
use grade_watch::snapshot::SnapshotStore;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "grade-watch",
    about = "Watches a university grade portal and notifies on changes"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long = "student-id")]
    student_id: Option<String>,
    #[arg(short, long)]
    term: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check now, then on every interval until Ctrl-C.
    Watch {
        #[arg(long = "interval-minutes")]
        interval_minutes: Option<u64>,
        /// Serve a JSON table instead of driving a browser.
        #[arg(long)]
        fixture: Option<PathBuf>,
        /// Address for the status API, e.g. 127.0.0.1:3001.
        #[arg(long)]
        serve: Option<SocketAddr>,
    },
    /// Run exactly one check.
    Check {
        #[arg(long)]
        fixture: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Send a test message through every configured channel.
    TestNotify,
    /// Print the stored snapshot.
    Show {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    let interval_minutes = match &cli.command {
        Commands::Watch {
            interval_minutes, ..
        } => *interval_minutes,
        _ => None,
    };
    config.apply_overrides(ConfigOverrides {
        student_id: cli.student_id.clone(),
        term: cli.term.clone(),
        interval_minutes,
    });

    match cli.command {
        Commands::Config {
            init,
            show,
            validate,
        } => handle_config_command(config, &config_path, init, show, validate),
        Commands::Show { output } => show_snapshot(&config, output),
        Commands::TestNotify => {
            let bus = EventBus::new();
            let dispatcher = Dispatcher::from_config(&config.alerts, &bus);
            if dispatcher.is_empty() {
                bail!("no notification channels are enabled");
            }
            let report = dispatcher.send_test().await;
            println!(
                "Test notification: {} delivered, {} failed ({})",
                report.delivered,
                report.failed,
                dispatcher.channel_names().join(", ")
            );
            if report.failed > 0 {
                bail!("{} channel(s) failed", report.failed);
            }
            Ok(())
        }
        Commands::Check { fixture, output } => {
            let config = config.validate()?;
            let bus = EventBus::new();
            let driver = select_driver(&config, fixture.as_deref())?;
            let orchestrator = build_orchestrator(&config, driver, &bus);
            let result = orchestrator.run_cycle().await;
            print_cycle(&result, output)?;
            if !result.outcome.is_success() {
                bail!(
                    "check failed: {}",
                    result.detail.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Commands::Watch { fixture, serve, .. } => {
            let config = config.validate()?;
            run_watch(config, fixture.as_deref(), serve).await
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn handle_config_command(
    config: Config,
    config_path: &Path,
    init: bool,
    show: bool,
    validate: bool,
) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if validate {
        let config = config.clone().validate()?;
        println!(
            "Configuration is valid (login {}, term {:?})",
            config.login_name(),
            config.portal.term
        );
    }
    if show || !(init || validate) {
        println!("{}", render_json(&config.redacted())?);
    }
    Ok(())
}

fn select_driver(config: &Config, fixture: Option<&Path>) -> Result<Arc<dyn SessionDriver>> {
    match fixture {
        Some(path) => {
            info!(path = %path.display(), "using fixture grade table");
            Ok(Arc::new(FixtureDriver::from_table_file(path)?))
        }
        None => Ok(Arc::new(WebDriverSessionDriver::new(
            config.portal.clone(),
            config.account.login_suffix.clone(),
        ))),
    }
}

async fn run_watch(config: Config, fixture: Option<&Path>, serve: Option<SocketAddr>) -> Result<()> {
    let bus = EventBus::new();
    let driver = select_driver(&config, fixture)?;
    let orchestrator = Arc::new(build_orchestrator(&config, driver, &bus));
    let dispatcher = orchestrator.dispatcher().clone();
    if dispatcher.is_empty() {
        warn!("no notification channels are enabled, changes will only be logged");
    }
    let scheduler = Scheduler::new(Arc::clone(&orchestrator), schedule_interval(&config));

    let console = print_status_lines(&bus);

    let server = match serve {
        Some(addr) => {
            let board = StatusBoard::new();
            board.follow(&bus);
            let state = ApiState::new(scheduler.clone(), dispatcher, board);
            let shutdown = scheduler.cancellation_token();
            Some(tokio::spawn(async move {
                if let Err(err) = run_server(state, addr, shutdown).await {
                    warn!("status API stopped: {err}");
                }
            }))
        }
        None => None,
    };

    let ctrl_c = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing current check");
                scheduler.stop();
            }
        })
    };

    let reason = scheduler.run().await;
    ctrl_c.abort();
    if let Some(server) = server {
        if let Err(err) = server.await {
            warn!("status API task failed: {err}");
        }
    }
    console.abort();

    match reason {
        StopReason::Requested => Ok(()),
        StopReason::BreakerTripped => Err(anyhow!(
            "monitoring halted after {} consecutive login failures",
            orchestrator.policy().consecutive_failures()
        )),
    }
}

fn print_status_lines(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(MonitorEvent::Status { line }) => println!("{line}"),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn show_snapshot(config: &Config, format: OutputFormat) -> Result<()> {
    let store = SnapshotStore::new(config.resolved_snapshot_path());
    let Some(snapshot) = store.load()? else {
        println!("No snapshot stored yet at {}", store.path().display());
        return Ok(());
    };
    match format {
        OutputFormat::Table => {
            println!("Snapshot taken {}", snapshot.timestamp.to_rfc3339());
            println!("{}", render_snapshot_table(&snapshot));
        }
        OutputFormat::Json => println!("{}", render_json(&snapshot)?),
        OutputFormat::Csv => print!("{}", snapshot_to_csv(&snapshot)?),
    }
    Ok(())
}

fn print_cycle(result: &CycleResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_cycle_table(result));
            if !result.changes.is_empty() {
                println!("{}", render_changes_table(&result.changes));
            }
        }
        OutputFormat::Json => println!("{}", render_json(result)?),
        OutputFormat::Csv => print!("{}", changes_to_csv(&result.changes)?),
    }
    Ok(())
}
