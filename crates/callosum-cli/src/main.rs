#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// crates/callosum-cli/src/main.rs
// ============================================================================
// Module: Callosum CLI Entry Point
// Description: Command dispatcher for serve/status/journal/sweep/lint.
// Purpose: Operate a Callosum gate from the command line without a client.
// Dependencies: callosum-config, callosum-core, callosum-server,
// callosum-store, clap, tokio, tracing
// ============================================================================

//! ## Overview
//! Every subcommand is backed by a plain dispatch function taking already-
//! parsed arguments and returning a [`CliResult`], so tests exercise the
//! dispatch directly rather than spawning a subprocess.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use callosum_config::CallosumConfig;
use callosum_config::Mode;
use callosum_config::load_rule_specs;
use callosum_core::classifier::TierClassifier;
use callosum_core::core::Clock;
use callosum_core::core::SystemClock;
use callosum_core::store::CoordinationStore;
use callosum_server::AppState;
use callosum_store::FileCoordinationStore;
use callosum_store::FileStoreConfig;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "callosum", disable_help_subcommand = true, arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Callosum coordination server.
    Serve(ServeCommand),
    /// Print active locks and, with `--context-key`, recent context records.
    Status(StatusCommand),
    /// Print recent journal entries.
    Journal(JournalCommand),
    /// Sweep expired locks from the coordination store.
    Sweep(ConfigOnlyCommand),
    /// Validate a rule file without starting a server.
    Lint(LintCommand),
}

/// Config-file flag shared by every subcommand that touches the store.
#[derive(Args, Debug)]
struct ConfigOnlyCommand {
    /// Optional config file path (defaults to `./callosum.toml` or
    /// `$CALLOSUM_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Address to bind the HTTP listener to.
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:4575")]
    bind: String,
}

/// Arguments for the `status` command.
#[derive(Args, Debug)]
struct StatusCommand {
    /// Optional config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Restrict recent-context output to this context key.
    #[arg(long, value_name = "KEY")]
    context_key: Option<String>,
}

/// Arguments for the `journal` command.
#[derive(Args, Debug)]
struct JournalCommand {
    /// Optional config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Maximum number of entries to print, newest last.
    #[arg(long, value_name = "N", default_value_t = 50)]
    limit: usize,
}

/// Arguments for the `lint` command.
#[derive(Args, Debug)]
struct LintCommand {
    /// Path to the rule file to validate.
    #[arg(long, value_name = "PATH")]
    rules: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{0}")]
struct CliError(String);

impl CliError {
    /// Builds a [`CliError`] from any displayable error.
    fn new(error: impl std::fmt::Display) -> Self {
        Self(error.to_string())
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(error) => {
            write_stderr_line(&error.to_string()).ok();
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the parsed CLI to its subcommand.
async fn run(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Status(command) => command_status(command),
        Commands::Journal(command) => command_journal(command),
        Commands::Sweep(command) => command_sweep(command),
        Commands::Lint(command) => command_lint(command),
    }
}

// ============================================================================
// SECTION: Shared Helpers
// ============================================================================

/// Loads configuration and, in local mode, opens the file-backed store it
/// points at. Remote-mode deployments have no local store to inspect.
fn open_local_store(config_path: Option<&std::path::Path>) -> CliResult<(CallosumConfig, Arc<dyn CoordinationStore>)> {
    let config = CallosumConfig::load(config_path).map_err(CliError::new)?;
    if config.mode != Mode::Local {
        return Err(CliError::new("this command requires mode = \"local\"; point a remote deployment at its callosum-server instead"));
    }
    let store = FileCoordinationStore::open(&FileStoreConfig::new(config.state_dir.clone())).map_err(CliError::new)?;
    Ok((config, Arc::new(store)))
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = CallosumConfig::load(command.config.as_deref()).map_err(CliError::new)?;
    if config.mode != Mode::Local {
        return Err(CliError::new("serve requires mode = \"local\"; remote mode has no local store to serve"));
    }

    let rule_specs = load_rule_specs(config.rules_path.as_deref()).map_err(CliError::new)?;
    let classifier = Arc::new(TierClassifier::compile(rule_specs).map_err(CliError::new)?);
    let store: Arc<dyn CoordinationStore> =
        Arc::new(FileCoordinationStore::open(&FileStoreConfig::new(config.state_dir.clone())).map_err(CliError::new)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lock_expiry_millis = i64::try_from(config.lock_expiry_ms).map_err(CliError::new)?;

    let state = AppState::new(classifier, store, clock, lock_expiry_millis, config.duplicate_policy());
    let router = callosum_server::router(state);

    tracing::info!(bind = %command.bind, "callosum server starting");
    let listener = tokio::net::TcpListener::bind(&command.bind).await.map_err(CliError::new)?;
    axum::serve(listener, router).await.map_err(CliError::new)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Status / Journal / Sweep Commands
// ============================================================================

/// Executes the `status` command.
fn command_status(command: StatusCommand) -> CliResult<ExitCode> {
    let (_config, store) = open_local_store(command.config.as_deref())?;
    let now = SystemClock.now_millis();
    let locks = store.active_locks(now).map_err(CliError::new)?;

    let locks = match &command.context_key {
        Some(raw) => {
            let key = callosum_core::core::ContextKey::new(raw.clone()).map_err(CliError::new)?;
            locks.into_iter().filter(|lock| lock.context_key == key).collect()
        }
        None => locks,
    };
    let output = serde_json::to_string_pretty(&locks).map_err(CliError::new)?;
    write_stdout_line(&output).map_err(CliError::new)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `journal` command.
fn command_journal(command: JournalCommand) -> CliResult<ExitCode> {
    let (_config, store) = open_local_store(command.config.as_deref())?;
    let entries = store.recent_journal(command.limit).map_err(CliError::new)?;
    let output = serde_json::to_string_pretty(&entries).map_err(CliError::new)?;
    write_stdout_line(&output).map_err(CliError::new)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `sweep` command.
fn command_sweep(command: ConfigOnlyCommand) -> CliResult<ExitCode> {
    let (_config, store) = open_local_store(command.config.as_deref())?;
    let now = SystemClock.now_millis();
    let swept = store.sweep_expired_locks(now).map_err(CliError::new)?;
    write_stdout_line(&format!("swept {swept} expired lock(s)")).map_err(CliError::new)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Lint Command
// ============================================================================

/// Executes the `lint` command: loads and compiles the rule file without
/// touching a store or starting a server.
fn command_lint(command: LintCommand) -> CliResult<ExitCode> {
    let specs = load_rule_specs(command.rules.as_deref()).map_err(CliError::new)?;
    let rule_count = specs.len();
    TierClassifier::compile(specs).map_err(CliError::new)?;
    write_stdout_line(&format!("ok: {rule_count} rule(s) compiled")).map_err(CliError::new)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

// ============================================================================
// SECTION: Tests
// ============================================================================
