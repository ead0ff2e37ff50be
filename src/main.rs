//! Binary entrypoint for the MeshGPT CLI.
//!
//! Commands:
//! - `start [--host <h>] [--port <p>]` - connect to the radio and answer mentions and DMs
//! - `init` - write a starter `config.toml`
//! - `smoke-test [--timeout <s>]` - probe the radio link and print a JSON summary
//! - `ask <text>` - send one prompt straight to the model (no radio needed)
//!
//! See the library crate docs for module-level details: `meshgpt::`.
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};

use meshgpt::bridge::pipeline::PipelineSettings;
use meshgpt::bridge::{
    BridgeServer, ChatMessage, ConversationId, InMemorySessionStore, OllamaBackend,
    ReplyPipeline,
};
use meshgpt::config::Config;
use meshgpt::meshtastic;

#[derive(Parser)]
#[command(name = "meshgpt")]
#[command(about = "An Ollama-backed assistant for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the radio and start answering
    Start {
        /// Meshtastic node host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Meshtastic stream API port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Write a default configuration file
    Init,
    /// Connect, wait for the radio's config download and report what was learned
    SmokeTest {
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// Send one prompt through the model and print the reply
    Ask {
        /// Prompt text
        text: String,
        /// Name the prompt is attributed to
        #[arg(long, default_value = "cli")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = Config::load(&cli.config).await?;
            if let Some(host) = host {
                config.meshtastic.host = host;
            }
            if let Some(port) = port {
                config.meshtastic.port = port;
            }
            config.validate()?;
            init_logging(Some(&config), cli.verbose);
            info!(
                "Starting {} (MeshGPT v{})",
                config.bot.name,
                env!("CARGO_PKG_VERSION")
            );
            info!(
                "Model {} via {}",
                config.inference.model, config.inference.base_url
            );

            let mut link = meshtastic::connect(&config.meshtastic).await?;
            let server = BridgeServer::from_config(
                &config,
                Arc::new(OllamaBackend::from_config(&config.inference)),
                link.writer.clone(),
                link.nodes.clone(),
                link.identity.clone(),
            )?;
            let result = server.run(&mut link.events).await;
            link.shutdown().await;
            result?;
        }
        Commands::Init => {
            init_logging(None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::SmokeTest { timeout } => {
            let config = Config::load(&cli.config).await.unwrap_or_default();
            init_logging(Some(&config), cli.verbose);
            info!(
                "Starting smoke test against {}",
                config.meshtastic.address()
            );
            let mut link = meshtastic::connect(&config.meshtastic).await?;
            let complete = link
                .wait_for_config(std::time::Duration::from_secs(timeout))
                .await;
            let own_id = link.own_identity();
            let payload = serde_json::json!({
                "status": if complete { "ok" } else { "incomplete" },
                "bot": config.bot.name,
                "address": config.meshtastic.address(),
                "own_id": if own_id.is_empty() { None } else { Some(own_id) },
                "config_complete": complete,
                "node_count": link.nodes.len(),
                "timeout_seconds": timeout,
            });
            link.shutdown().await;
            println!("{}", payload);
            std::process::exit(if complete { 0 } else { 1 });
        }
        Commands::Ask { text, name } => {
            let config = Config::load(&cli.config).await.unwrap_or_default();
            init_logging(Some(&config), cli.verbose);
            let system = config
                .bot
                .render_system_prompt(chrono::Local::now().date_naive());
            let pipeline = ReplyPipeline::new(
                Arc::new(InMemorySessionStore::new(
                    ChatMessage::system(system),
                    config.bot.max_history_turns,
                )),
                Arc::new(OllamaBackend::from_config(&config.inference)),
                PipelineSettings::from_config(&config.inference),
            );
            match pipeline
                .generate(&ConversationId::direct("cli"), &name, &text)
                .await
            {
                Ok(reply) => {
                    println!("{} [{:.1}s]", reply.text, reply.elapsed_seconds());
                }
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .map(|c| c.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // reqwest/hyper are noisy at debug
    builder.filter_module("hyper", log::LevelFilter::Info);
    builder.filter_module("reqwest", log::LevelFilter::Info);

    let file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
