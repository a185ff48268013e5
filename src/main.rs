//! Binary entry point for the birdseye CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a recorded call and show what the editor would display
//! birdseye inspect --source app.py --function f \
//!     --calls calls.json --detail call.json \
//!     --step 2:+1 --select 4 --expand 4:a/b --collapse 4:a/b
//!
//! # Body hash the server files a function under
//! birdseye hash --source app.py --function f
//!
//! # API URL the settings resolve to
//! birdseye --config birdseye.json url call/abc
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use birdseye::cli::{
    load_json, parse_edit, parse_expand, parse_path_action, parse_step, run_hash, run_inspect,
    run_url, Action, InspectRequest,
};
use birdseye::config::SettingsOverrides;
use birdseye::error::{BirdseyeError, OutputErrorCode};
use birdseye::output::{emit_response, emit_response_compact, ErrorResponse};

// ============================================================================
// CLI Structure
// ============================================================================

/// Inspect recorded Python function calls.
///
/// All output is JSON.
#[derive(Parser, Debug)]
#[command(name = "birdseye", version, about = "Inspect recorded Python function calls")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Settings file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// URL of a remote trace server (disables the local server).
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Port of the local trace server.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Emit single-line JSON.
    #[arg(long, global = true)]
    compact: bool,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Write log lines to stderr as JSON objects.
    #[arg(long, global = true)]
    log_json: bool,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded call against a source file.
    Inspect {
        /// Python source file containing the function.
        #[arg(long)]
        source: PathBuf,

        /// Name of the traced function.
        #[arg(long)]
        function: String,

        /// Calls-by-body-hash JSON as returned by the server.
        #[arg(long)]
        calls: PathBuf,

        /// Call detail JSON as returned by the server.
        #[arg(long)]
        detail: PathBuf,

        /// Id of the call the detail belongs to (default: first listed).
        #[arg(long)]
        call: Option<String>,

        /// Step a loop: `LOOP:+N` or `LOOP:-N`. Repeatable.
        #[arg(long)]
        step: Vec<String>,

        /// Toggle inspection of a node by tree index. Repeatable.
        #[arg(long)]
        select: Vec<u32>,

        /// Expand a value path and its ancestors: `NODE:a/b`. Repeatable.
        #[arg(long)]
        expand: Vec<String>,

        /// Collapse a value path: `NODE:a/b`. Repeatable; applied after
        /// expansions.
        #[arg(long)]
        collapse: Vec<String>,

        /// Move the mouse to a byte offset.
        #[arg(long)]
        hover: Option<usize>,

        /// Edit the source: `START:END:TEXT`. Repeatable; applied last.
        #[arg(long)]
        edit: Vec<String>,
    },

    /// Print the body hash of a function.
    Hash {
        /// Python source file containing the function.
        #[arg(long)]
        source: PathBuf,

        /// Function name.
        #[arg(long)]
        function: String,
    },

    /// Print the API URL of a path under the resolved settings.
    Url {
        /// Path below `/api/`.
        #[arg(default_value = "")]
        path: String,
    },
}

// ============================================================================
// Main
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.log_level, cli.global.log_json);
    let compact = cli.global.compact;

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);
            // Errors go to stdout as JSON like every other response
            let _ = emit(&response, compact);
            let _ = io::stdout().flush();
            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel, json: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn emit<T: serde::Serialize>(response: &T, compact: bool) -> Result<(), BirdseyeError> {
    let mut stdout = io::stdout();
    if compact {
        emit_response_compact(response, &mut stdout)?;
    } else {
        emit_response(response, &mut stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Execute the CLI command.
fn execute(cli: Cli) -> Result<(), BirdseyeError> {
    let compact = cli.global.compact;
    match cli.command {
        Command::Inspect {
            source,
            function,
            calls,
            detail,
            call,
            step,
            select,
            expand,
            collapse,
            hover,
            edit,
        } => {
            let mut actions = Vec::new();
            for arg in &step {
                actions.push(parse_step(arg)?);
            }
            actions.extend(select.into_iter().map(|node| Action::Toggle { node }));
            for arg in &expand {
                actions.extend(parse_expand(arg)?);
            }
            for arg in &collapse {
                actions.push(parse_path_action(arg, true)?);
            }
            actions.extend(hover.map(|offset| Action::Hover { offset }));
            for arg in &edit {
                actions.push(parse_edit(arg)?);
            }
            let request = InspectRequest {
                source: fs::read_to_string(&source)?,
                function,
                listing: load_json(&calls)?,
                detail: load_json(&detail)?,
                call_id: call,
                actions,
            };
            emit(&run_inspect(request)?, compact)
        }
        Command::Hash { source, function } => {
            let text = fs::read_to_string(&source)?;
            emit(&run_hash(&text, &function)?, compact)
        }
        Command::Url { path } => {
            let overrides = SettingsOverrides {
                server_url: cli.global.server_url,
                port: cli.global.port,
            };
            emit(&run_url(cli.global.config.as_deref(), &overrides, &path)?, compact)
        }
    }
}
