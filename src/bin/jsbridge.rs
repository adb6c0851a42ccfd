//! CLI tool for running a script through jsbridge
//!
//! Usage: jsbridge [options] <script.js>
//!
//! Options:
//!   --config <file>    Engine configuration as JSON
//!   --timeout <ms>     Maximum execution time in milliseconds (default: unlimited)
//!
//! Runs the script in a fresh context and prints the resulting wire value as
//! JSON. Logging is controlled with `RUST_LOG`.

use std::env;
use std::fs;
use std::path::PathBuf;

use jsbridge::{Engine, EngineConfig, WireValue};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(value) if value.is_error() => std::process::exit(2),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// CLI configuration
struct Args {
    script: PathBuf,
    config: Option<PathBuf>,
    timeout_ms: Option<u64>,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map_or("jsbridge", |s| s.as_str());

    let mut config: Option<PathBuf> = None;
    let mut timeout_ms: Option<u64> = None;
    let mut script: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        let Some(arg) = args.get(i) else {
            break;
        };
        if arg == "--config" {
            i += 1;
            config = Some(PathBuf::from(
                args.get(i)
                    .ok_or_else(|| "--config requires a value".to_string())?,
            ));
        } else if arg == "--timeout" {
            i += 1;
            timeout_ms = Some(
                args.get(i)
                    .ok_or_else(|| "--timeout requires a value".to_string())?
                    .parse::<u64>()
                    .map_err(|_| "--timeout must be a positive integer".to_string())?,
            );
        } else if arg.starts_with('-') {
            return Err(format!("Unknown option: {}", arg));
        } else {
            script = Some(arg);
        }
        i += 1;
    }

    let script = script.ok_or_else(|| {
        format!(
            "Usage: {} [--config <file>] [--timeout <ms>] <script.js>",
            program_name
        )
    })?;

    Ok(Args {
        script: PathBuf::from(script),
        config,
        timeout_ms,
    })
}

fn run() -> Result<WireValue, Box<dyn std::error::Error>> {
    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
            EngineConfig::from_json(&json)?
        }
        None => EngineConfig::default(),
    };
    if args.timeout_ms.is_some() {
        config.timeout_ms = args.timeout_ms;
    }

    let source = fs::read_to_string(&args.script)
        .map_err(|e| format!("Cannot read {}: {}", args.script.display(), e))?;

    let engine = Engine::with_config(config)?;
    let context = engine.create_context()?;
    let name = args.script.display().to_string();
    let value = context.execute(&source, Some(&name));

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(value)
}
