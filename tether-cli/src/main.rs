//! tether - command-line client and echo peer.
//!
//! ```text
//! tether request <action> [--params <json>]   Send a request, print the result
//! tether send <action> [--params <json>]      Fire-and-forget event
//! tether watch                                Log status changes and events
//! tether echo [--listen <addr>] [--websocket] Run an answering peer
//! tether --gen-config                         Dump default config and exit
//! tether --init-config                        Write default config to --config
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tether_cli::config::CliConfig;
use tether_cli::echo::{self, Binding};
use tether_cli::parse_params;
use tether_core::Client;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Resilient correlated messaging client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tether.toml")]
    config: PathBuf,

    /// Endpoint (overrides config). Example: tcp://127.0.0.1:7400 or ws://host:9001/
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a request and print its result.
    Request {
        action: String,
        /// Parameters as a JSON object.
        #[arg(short, long)]
        params: Option<String>,
        /// Seconds to wait for the response (default: request_timeout_ms).
        #[arg(short, long)]
        timeout: Option<f64>,
    },
    /// Send a fire-and-forget event.
    Send {
        action: String,
        #[arg(short, long)]
        params: Option<String>,
    },
    /// Stay connected and log status changes and events until Ctrl-C.
    Watch,
    /// Run a peer that answers requests.
    Echo {
        #[arg(short, long, default_value = "127.0.0.1:7400")]
        listen: String,
        /// Speak WebSocket instead of line-delimited JSON.
        #[arg(long)]
        websocket: bool,
    },
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", CliConfig::default_toml()?);
        return Ok(());
    }
    if cli.init_config {
        CliConfig::write_default(&cli.config)?;
        println!("wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = CliConfig::load(&cli.config);
    if let Some(endpoint) = cli.endpoint {
        config.client.endpoint = endpoint;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tether v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Command::Watch) {
        Command::Request {
            action,
            params,
            timeout,
        } => {
            let params = parse_params(params.as_deref())?;
            let timeout = match timeout {
                Some(secs) => Duration::try_from_secs_f64(secs)?,
                None => config.client.request_timeout(),
            };
            let client = connect(&config)?;
            let result = client.send_request(&action, params, timeout)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Send { action, params } => {
            let params = parse_params(params.as_deref())?;
            let client = connect(&config)?;
            if !client.send_message(&action, params) {
                return Err("message was not queued".into());
            }
            // Flushes the queue before closing the transport.
            client.disconnect();
        }
        Command::Watch => {
            let client = Client::new(config.client.clone())?;
            client.on_status_changed(|change| match &change.error {
                Some(e) => warn!(from = %change.previous, to = %change.current, "status: {e}"),
                None => info!(from = %change.previous, to = %change.current, "status"),
            });
            client.on_event(|event| {
                info!(action = %event.action(), params = %serde_json::Value::Object(event.payload.params.clone()), "event");
            });
            if !client.connect() {
                warn!("not connected yet; retrying in the background");
            }
            wait_for_ctrl_c()?;
            client.disconnect();
        }
        Command::Echo { listen, websocket } => {
            let binding = if websocket {
                Binding::WebSocket
            } else {
                Binding::Line
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                let listener = TcpListener::bind(&listen).await?;
                tokio::select! {
                    r = echo::serve(listener, binding) => r?,
                    r = tokio::signal::ctrl_c() => {
                        r?;
                        info!("shutting down");
                    }
                }
                Ok::<(), Box<dyn std::error::Error>>(())
            })?;
        }
    }

    Ok(())
}

/// Connect or fail; no background retrying for one-shot commands.
fn connect(config: &CliConfig) -> Result<Client, Box<dyn std::error::Error>> {
    let client = Client::new(config.client.clone())?;
    if client.connect() {
        Ok(client)
    } else {
        error!(endpoint = %config.client.endpoint, "could not connect");
        Err(format!("could not connect to {}", config.client.endpoint).into())
    }
}

fn wait_for_ctrl_c() -> std::io::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())
}
