use std::{sync::Arc, time::Duration};

use analytics_integration::{
    analyses::AnalysisExpectations,
    harness::{Environment, LifecycleController, LifecycleError, ProcessRunner},
    settings::{HarnessConfig, HarnessSettings, load_settings, parse_override},
};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "analytics-integration",
    version,
    about = "Bring the analytics stack up, wait for it, and tear it down for behavioural tests"
)]
struct Cli {
    /// Path to the configuration file (defaults to config/integration.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<Utf8PathBuf>,
    /// Override a setting, e.g. `-D dump_errors=yes` (repeatable)
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE", global = true)]
    define: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the system and wait until it reports ready
    Up(WaitArgs),
    /// Stop and remove the system; safe when it is already down
    Down,
    /// Tear down, start and wait again
    Restart(WaitArgs),
    /// Wait until the running system reports ready
    Wait(WaitArgs),
    /// Probe readiness once
    Status,
    /// Print aggregated backend logs
    Logs(LogsArgs),
    /// Run a shell command inside a running container
    Exec(ExecArgs),
    /// Print the analyses expected for an ecosystem
    Analyses(AnalysesArgs),
    /// Print the effective settings as TOML
    Config,
}

#[derive(Args, Debug)]
struct WaitArgs {
    /// Seconds to wait for readiness (defaults to wait_for_server)
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct LogsArgs {
    /// Only the last N lines per service; full history when omitted
    #[arg(long, value_name = "N")]
    tail: Option<u32>,
}

#[derive(Args, Debug)]
struct ExecArgs {
    container: String,
    command: String,
}

#[derive(Args, Debug)]
struct AnalysesArgs {
    ecosystem: String,
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let overrides = cli
        .define
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>>>()?;
    let settings = load_settings(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Command::Config => print_settings(&settings)?,
        Command::Analyses(args) => print_expected_analyses(&args.ecosystem)?,
        Command::Up(args) => {
            let (mut env, config) = environment(&settings)?;
            env.start().context("failed to start system")?;
            let elapsed = env.wait(timeout(&args, &config))?;
            info!(elapsed_ms = elapsed.as_millis() as u64, "system is up");
        }
        Command::Down => {
            let (mut env, _) = environment(&settings)?;
            env.teardown().map_err(LifecycleError::into_teardown_failure)?;
        }
        Command::Restart(args) => {
            let (mut env, config) = environment(&settings)?;
            env.restart(timeout(&args, &config))?;
        }
        Command::Wait(args) => {
            let (mut env, config) = environment(&settings)?;
            env.wait(timeout(&args, &config))?;
        }
        Command::Status => {
            let (env, _) = environment(&settings)?;
            let ready = env.is_running()?;
            println!("{}", if ready { "ready" } else { "not ready" });
        }
        Command::Logs(args) => {
            let (env, _) = environment(&settings)?;
            print!("{}", env.dump_logs(args.tail)?);
        }
        Command::Exec(args) => {
            let (env, _) = environment(&settings)?;
            print!("{}", env.exec_in_container(&args.container, &args.command)?);
        }
    }

    Ok(())
}

fn environment(settings: &HarnessSettings) -> Result<(Environment, HarnessConfig)> {
    let config = settings.resolve().context("invalid harness settings")?;
    info!(backend = config.backend.kind(), api = %config.api_url, "environment configured");
    let env = Environment::new(&config, Arc::new(ProcessRunner));
    Ok((env, config))
}

fn timeout(args: &WaitArgs, config: &HarnessConfig) -> Duration {
    args.timeout
        .map(Duration::from_secs)
        .unwrap_or(config.wait_timeout)
}

fn print_settings(settings: &HarnessSettings) -> Result<()> {
    let rendered = toml::to_string_pretty(settings).context("failed to render settings")?;
    print!("{rendered}");
    Ok(())
}

fn print_expected_analyses(ecosystem: &str) -> Result<()> {
    let expectations = AnalysisExpectations::default();
    let report = serde_json::json!({
        "ecosystem": ecosystem,
        "expected": expectations.expected_for(ecosystem),
        "unreliable": expectations.unreliable(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to render analyses")?
    );
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
