// Envseal - Main Entry Point
//
// Command-line front end for the token pipeline:
// - keygen: print a fresh AES key
// - encode/decode: transform tokens in text from args or stdin
// - exec: run a command with secrets resolved into its environment

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use envseal::aes::{AesKey, KeyType};
use envseal::config::Config;
use envseal::exec::{self, CommandRunner, ExecConfig};
use envseal::{logging, DecodeOptions, ExecError, Tool};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Envseal: secrets in text, sealed and resolved
#[derive(Parser, Debug)]
#[command(name = "envseal")]
#[command(author = "Envseal Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Encrypt, store, and resolve secret tokens embedded in text", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new AES key
    #[command(visible_aliases = ["key", "k"])]
    Keygen {
        /// Key type
        #[arg(short = 't', long = "type", default_value = "32byte")]
        key_type: String,
    },
    /// Encode every token in the text
    #[command(visible_aliases = ["redact", "r"])]
    Encode {
        /// Text to encode; read from stdin when omitted
        text: Vec<String>,
    },
    /// Decode every token in the text
    #[command(visible_aliases = ["unredact", "u"])]
    Decode {
        /// Emit decoded tokens in their plaintext declaration form
        #[arg(short, long)]
        wrap_tokens: bool,

        /// Text to decode; read from stdin when omitted
        text: Vec<String>,
    },
    /// Run a command with tokens in its environment decoded
    Exec {
        /// Restart the command when its decoded environment changes,
        /// checking on this interval (e.g. 30s)
        #[arg(short, long, value_parser = parse_duration, conflicts_with = "stop_if_env_changes")]
        restart_if_env_changes: Option<Duration>,

        /// Stop the command when its decoded environment changes,
        /// checking on this interval
        #[arg(short, long, value_parser = parse_duration)]
        stop_if_env_changes: Option<Duration>,

        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    logging::init(&config.logging, args.verbose)?;
    debug!("envseal v{} starting", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Keygen { key_type } => keygen(&key_type),
        Commands::Encode { text } => {
            let tool = Tool::from_config(&config)?;
            let input = read_input(text)?;
            let output = tool
                .encode_tokens(&input)
                .await
                .context("Failed to encode tokens")?;
            print_output(&output);
            Ok(())
        }
        Commands::Decode { wrap_tokens, text } => {
            let tool = Tool::from_config(&config)?;
            let input = read_input(text)?;
            let output = tool
                .decode_tokens(&input, DecodeOptions { wrap_tokens })
                .await
                .context("Failed to decode tokens")?;
            print_output(&output);
            Ok(())
        }
        Commands::Exec {
            restart_if_env_changes,
            stop_if_env_changes,
            command,
        } => {
            let exec_config = match (restart_if_env_changes, stop_if_env_changes) {
                (Some(interval), _) => ExecConfig::restart_if_env_changes(interval),
                (None, Some(interval)) => ExecConfig::stop_if_env_changes(interval),
                (None, None) => config.exec_config()?,
            };
            run_command(&config, exec_config, command).await
        }
    }
}

/// Print a new key of `key_type`
fn keygen(key_type: &str) -> Result<()> {
    let key_type: KeyType = key_type.parse()?;
    println!("{}", AesKey::generate_typed(key_type).to_base64());
    Ok(())
}

/// Join positional args with spaces, or read all of stdin when there are none
fn read_input(text: Vec<String>) -> Result<String> {
    if !text.is_empty() {
        return Ok(text.join(" "));
    }

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read stdin")?;
    Ok(input)
}

fn print_output(output: &str) {
    if output.ends_with('\n') {
        print!("{}", output);
    } else {
        println!("{}", output);
    }
}

/// Run `command` under `exec_config` with this process's environment
async fn run_command(config: &Config, exec_config: ExecConfig, command: Vec<String>) -> Result<()> {
    let tool = Tool::from_config(config)?;
    let mut command = command.into_iter();
    let name = command.next().context("No command given")?;
    let env = std::env::vars()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    info!(command = %name, policy = ?exec_config.on_env_change, "executing");
    let runner = Arc::new(CommandRunner::new(env, tool, name, command.collect()));

    match exec::exec(runner, exec_config).await {
        Ok(()) => Ok(()),
        Err(ExecError::Exited { status }) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => Err(e).context("Failed to run command"),
    }
}

/// Parse a duration such as `500ms`, `30s`, `5m` or `1h`; bare numbers are seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (number, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {:?}", s))?;

    let secs = |multiplier: u64| {
        value
            .checked_mul(multiplier)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration too large: {:?}", s))
    };

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(format!("invalid duration unit in {:?}, use ms, s, m or h", s)),
    }
}
