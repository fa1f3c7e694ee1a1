//! faultline - CLI for checking and exercising a faultline setup
//!
//! This tool provides commands for:
//! - Showing the loaded configuration
//! - Sending a test occurrence and waiting for delivery
//! - Previewing the JSON an occurrence would be sent as
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/faultline/config.toml (~/.config/faultline/config.toml)
//! - Logs: $XDG_STATE_HOME/faultline/ (~/.local/state/faultline/)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faultline_core::logging::LoggingGuard;
use faultline_core::{telemetry, Config, ErrorReport, Level, Notifier, NotifierBuilder};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "faultline")]
#[command(about = "Check and exercise faultline error reporting")]
#[command(version)]
struct Args {
    /// Verbose output (writes a log file)
    #[arg(short, long)]
    verbose: bool,

    /// Config file (default: $XDG_CONFIG_HOME/faultline/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show notifier configuration and status
    Status,

    /// Report a test occurrence and wait for the endpoint's answer
    SendTest {
        /// Message text
        #[arg(short, long, default_value = "faultline test occurrence")]
        message: String,

        /// Level: critical, error, warning, info or debug
        #[arg(short, long, default_value = "info")]
        level: Level,

        /// Seconds to wait for delivery
        #[arg(short, long, default_value_t = 10)]
        wait: u64,
    },

    /// Print the scrubbed payload an occurrence would be sent as
    Preview {
        /// Message text
        #[arg(short, long, default_value = "faultline preview")]
        message: String,

        /// Report an error of this class instead of a plain message
        #[arg(short, long)]
        error: Option<String>,

        /// Level (default depends on error vs message)
        #[arg(short, long)]
        level: Option<Level>,

        /// Custom data as a JSON object
        #[arg(long)]
        custom: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };

    // Keep the guard alive for the whole run so buffered lines are written.
    let _log_guard: Option<LoggingGuard> = if args.verbose {
        Some(
            faultline_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::SendTest {
            message,
            level,
            wait,
        } => cmd_send_test(&config, &message, level, wait),
        Command::Preview {
            message,
            error,
            level,
            custom,
        } => cmd_preview(&config, &message, error.as_deref(), level, custom.as_deref()),
    }
}

fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{}****", visible)
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("faultline Configuration");
    println!("=======================");
    println!();

    let notifier = &config.notifier;
    let delivery = &config.delivery;

    println!("Config File:     {}", Config::config_path().display());
    println!("Enabled:         {}", notifier.enabled);
    println!(
        "Access Token:    {}",
        notifier
            .access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(mask)
            .unwrap_or_else(|| "<not set>".to_string())
    );
    println!(
        "Environment:     {}",
        notifier.environment.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Code Version:    {}",
        notifier.code_version.as_deref().unwrap_or("<not set>")
    );
    println!("Providers:       {}", notifier.providers.join(", "));
    println!(
        "Telemetry:       {} events",
        notifier.telemetry_capacity.min(telemetry::MAX_CAPACITY)
    );
    if !config.scrub.fields.is_empty() {
        println!("Scrub Fields:    {}", config.scrub.fields.join(", "));
    }
    if !notifier.fingerprint_fields.is_empty() {
        println!("Fingerprint:     {}", notifier.fingerprint_fields.join(", "));
    }

    println!();
    println!("Endpoint:        {}", delivery.endpoint);
    println!("Queue Capacity:  {}", delivery.queue_capacity);
    println!("Max Retries:     {}", delivery.max_retries);
    println!(
        "Backoff:         {}ms base, {}ms cap",
        delivery.backoff_base_ms, delivery.backoff_cap_ms
    );
    println!("Send Timeout:    {}s", delivery.send_timeout_secs);
    println!("Shutdown Grace:  {}s", delivery.shutdown_grace_secs);
    println!("Log Directory:   {}", Config::state_dir().display());

    println!();
    if !notifier.is_ready() {
        println!("Status: Not ready (missing access token)");
        println!();
        println!("Set it in config.toml:");
        println!();
        println!("  [notifier]");
        println!("  access_token = \"POST_SERVER_ITEM_TOKEN\"");
    } else if !notifier.enabled {
        println!("Status: Disabled");
    } else {
        println!("Status: Ready to report");
    }

    Ok(())
}

fn build_notifier(config: &Config) -> Result<Notifier> {
    if !config.notifier.is_ready() {
        bail!("Notifier is not configured. Run 'status' for details.");
    }
    NotifierBuilder::from_config(config)
        .and_then(NotifierBuilder::build)
        .context("failed to start notifier")
}

fn cmd_send_test(config: &Config, message: &str, level: Level, wait: u64) -> Result<()> {
    let notifier = build_notifier(config)?;
    if !notifier.settings().enabled {
        println!("Notifier is disabled; nothing sent.");
        return Ok(());
    }

    println!("Sending {} occurrence to {}...", level, config.delivery.endpoint);
    tracing::info!(endpoint = %config.delivery.endpoint, %level, "Sending test occurrence");
    notifier.log(Some(level), None, Some(message), None, false);

    let delivered = notifier.flush(Duration::from_secs(wait));
    let stats = notifier.shutdown(Duration::ZERO);

    println!();
    println!("Stats:");
    println!("  Attempts:   {}", stats.attempts);
    println!("  Delivered:  {}", stats.delivered);
    println!("  Retried:    {}", stats.retried);
    println!("  Dropped:    {}", stats.dropped);

    if !delivered {
        bail!("timed out after {}s waiting for delivery", wait);
    }
    if stats.delivered == 0 {
        bail!("occurrence was not accepted; run with --verbose and check the log");
    }
    println!();
    println!("Delivered.");
    Ok(())
}

fn cmd_preview(
    config: &Config,
    message: &str,
    error: Option<&str>,
    level: Option<Level>,
    custom: Option<&str>,
) -> Result<()> {
    let custom: Option<Map<String, Value>> = match custom {
        Some(raw) => match serde_json::from_str(raw).context("--custom is not valid JSON")? {
            Value::Object(map) => Some(map),
            _ => bail!("--custom must be a JSON object"),
        },
        None => None,
    };

    let notifier = build_notifier(config)?;
    let report = error.map(|class| ErrorReport::new(class, message).with_backtrace());
    let description = if report.is_some() { None } else { Some(message) };

    let Some(payload) = notifier.build_payload(level, report.as_ref(), description, custom) else {
        println!("Occurrence would not be sent (disabled or filtered).");
        return Ok(());
    };

    let mut value = payload.to_value()?;
    if let Some(token) = value.get_mut("access_token") {
        if let Some(raw) = token.as_str() {
            *token = Value::String(mask(raw));
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
