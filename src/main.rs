//! Purpose: `cryptoshare` CLI entry point for operational checks of the facility.
//! Role: Binary crate root; parses args, runs a command, emits JSON on stdout.
//! Invariants: Command results are JSON on stdout; diagnostics and logs go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};

use cryptoshare::api::{Error, ErrorKind, FacilityConfig, to_exit_code};
use cryptoshare::logging::init_tracing;

mod selftest;
mod stress;

use selftest::run_selftest;
use stress::{StressArgs, StressFormat, run_stress};

#[derive(Parser)]
#[command(
    name = "cryptoshare",
    version,
    about = "Per-caller state and lock multiplexing for a shared crypto library",
    long_about = None,
    after_help = r#"EXAMPLES
  $ cryptoshare selftest
  $ cryptoshare stress --callers 16 --iterations 10000 --leak 2
  $ CRYPTOSHARE_LOCK_SLOTS=8 cryptoshare config

ENVIRONMENT
  CRYPTOSHARE_LOCK_SLOTS, CRYPTOSHARE_REGISTRY_CAPACITY, CRYPTOSHARE_VERSION_APP
  override the config file. CRYPTOSHARE_LOG (or RUST_LOG) sets the log filter."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "JSON facility config file (default: built-in defaults)",
        value_hint = ValueHint::FilePath
    )]
    config: Option<PathBuf>,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the load/attach/errno/detach/unload scenario and report it")]
    Selftest,
    #[command(about = "Hammer one facility from many concurrent callers")]
    Stress {
        #[arg(long, default_value_t = 8, help = "Concurrent callers (threads)")]
        callers: usize,
        #[arg(long, default_value_t = 1000, help = "Lock/errno rounds per caller")]
        iterations: u64,
        #[arg(long, default_value_t = 1, help = "Callers that exit without detaching")]
        leak: usize,
        #[arg(long, default_value = "json", help = "Output format: json|table|both")]
        format: String,
    },
    #[command(about = "Print the effective facility config")]
    Config,
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(exit_code);
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage).with_message(clap_error_summary(&err)),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing("warn");
    let color_mode = cli.color;
    dispatch(cli).map(|()| 0).map_err(|err| (err, color_mode))
}

fn dispatch(cli: Cli) -> Result<(), Error> {
    let config = load_config(cli.config)?;
    match cli.command {
        Command::Selftest => {
            let report = run_selftest(config)?;
            emit_json(&report);
            Ok(())
        }
        Command::Stress {
            callers,
            iterations,
            leak,
            format,
        } => {
            let args = StressArgs {
                callers,
                iterations,
                leak,
                format: StressFormat::parse(&format)?,
            };
            run_stress(config, args)
        }
        Command::Config => {
            let value = serde_json::to_value(&config).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode config")
                    .with_source(err)
            })?;
            emit_json(&value);
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<FacilityConfig, Error> {
    let base = match path {
        Some(path) => FacilityConfig::from_file(&path)?,
        None => FacilityConfig::default(),
    };
    let config = base.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn emit_json(value: &Value) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Clone, Copy)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Allocation => "allocation failed".to_string(),
        ErrorKind::AlreadyAttached => "caller already attached".to_string(),
        ErrorKind::NotAttached => "caller not attached".to_string(),
        ErrorKind::OutOfRange => "resource id out of range".to_string(),
        ErrorKind::NotHeld => "lock slot not held".to_string(),
        ErrorKind::Reentrant => "lock slot already held by caller".to_string(),
        ErrorKind::State => "invalid lifecycle state".to_string(),
        ErrorKind::Platform => "platform resources unavailable".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(caller) = err.caller() {
        inner.insert("caller".to_string(), json!(caller.as_raw()));
    }
    if let Some(resource) = err.resource() {
        inner.insert("resource".to_string(), json!(resource));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];
    if let Some(caller) = err.caller() {
        lines.push(format!(
            "{} {caller}",
            colorize_label("caller:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(resource) = err.resource() {
        lines.push(format!(
            "{} {resource}",
            colorize_label("resource:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
