use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use tetobot_core::agent::{ContextBuilder, Dispatcher};
use tetobot_core::channel::line::LineChannel;
use tetobot_core::config::{self, Config};
use tetobot_core::provider::openai_compat::OpenAiCompatFactory;
use tetobot_core::provider::{KeyPool, KeyRotatingProvider};
use tetobot_core::service::{self, AppState};
use tetobot_core::session::{self, SessionMemory};

#[derive(Parser)]
#[command(
    name = "tetobot",
    about = format!("{} tetobot - LINE chat relay with multi-key failover", tetobot_core::LOGO),
    version = tetobot_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server (default)
    Serve {
        /// Listen port, overrides config and PORT
        #[arg(short, long)]
        port: Option<u16>,
        /// Config file (default: ~/.tetobot/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the loaded configuration without secrets
    Status {
        /// Config file (default: ~/.tetobot/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tetobot=info".parse()?)
                .add_directive("tetobot_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port, config }) => cmd_serve(port, config).await?,
        Some(Commands::Status { config }) => cmd_status(config)?,
        None => cmd_serve(None, None).await?,
    }

    Ok(())
}

// ====== Commands ======

async fn cmd_serve(port: Option<u16>, config_path: Option<PathBuf>) -> Result<()> {
    let mut cfg = config::load_config_from_env(config_path.as_deref());
    if let Some(port) = port {
        cfg.server.port = port;
    }
    cfg.validate()?;

    let pool = Arc::new(KeyPool::new(cfg.api_keys())?);
    let factory = Arc::new(OpenAiCompatFactory::new(
        cfg.providers.openai.api_base.clone(),
        cfg.agent.model.clone(),
    ));
    let provider = KeyRotatingProvider::new(pool, factory, cfg.agent.model.clone())
        .with_retry_delay(cfg.retry_delay());

    if cfg.line.channel_secret.is_empty() {
        tracing::warn!("LINE channel secret not set; every webhook will be rejected");
    }
    let channel_secret = cfg.line.channel_secret.clone();
    let line = LineChannel::new(cfg.line.clone());

    let memory = Arc::new(SessionMemory::new(cfg.memory.max_turns));
    let sweeper = cfg
        .session_idle_ttl()
        .map(|ttl| session::spawn_idle_sweeper(memory.clone(), ttl));

    let dispatcher = Dispatcher::new(
        Arc::new(provider),
        Arc::new(line),
        memory,
        ContextBuilder::from_config(&cfg.agent),
        cfg.replies.clone(),
    );

    info!(
        "{} tetobot v{} ({}) starting: model={}, memory={} turns",
        tetobot_core::LOGO,
        tetobot_core::VERSION,
        tetobot_core::GIT_HASH,
        cfg.agent.model,
        cfg.memory.max_turns
    );

    let state = Arc::new(AppState::new(channel_secret, dispatcher));
    let result = service::serve(&cfg.listen_addr(), state).await;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    result
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.clone().unwrap_or_else(config::get_config_path);
    let cfg: Config = config::load_config_from_env(config_path.as_deref());

    println!("{} tetobot Status\n", tetobot_core::LOGO);
    println!(
        "Config: {} {}",
        path.display(),
        if path.exists() { "✓" } else { "✗" }
    );
    println!("Version: {} ({})", tetobot_core::VERSION, tetobot_core::GIT_HASH);
    println!("Model: {}", cfg.agent.model);
    println!(
        "API base: {}",
        cfg.providers
            .openai
            .api_base
            .as_deref()
            .unwrap_or(tetobot_core::provider::openai_compat::DEFAULT_API_BASE)
    );

    let keys = cfg.api_keys().len();
    println!(
        "OpenAI API keys: {}",
        if keys == 0 { "not set".to_string() } else { format!("{keys} ✓") }
    );
    println!(
        "LINE channel: {}",
        if cfg.line.channel_secret.is_empty() || cfg.line.channel_access_token.is_empty() {
            "not configured"
        } else {
            "✓"
        }
    );
    println!("Listen: {}", cfg.listen_addr());
    println!("Memory: {} turns per user", cfg.memory.max_turns);
    match cfg.session_idle_ttl() {
        Some(ttl) => println!("Idle expiry: {}s", ttl.as_secs()),
        None => println!("Idle expiry: off"),
    }
    println!("Retry delay: {}ms", cfg.retry.delay_ms);

    if let Err(e) = cfg.validate() {
        println!("\n✗ {}", e);
    }

    Ok(())
}
