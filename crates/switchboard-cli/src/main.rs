use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchboard_core::{
    AvailabilityTracker, CanonicalResponse, ChatMessage, Router, RouterError, build_http_client,
    mask_secret,
};

mod config;

use config::SwitchboardConfig;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Switchboard: route chat requests across LLM providers with automatic failover")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a one-shot message through the router
    Ask {
        /// The message to send
        message: String,

        /// Pin the request to a catalog model id ("auto" routes normally)
        #[arg(short, long)]
        model: Option<String>,

        /// System instruction sent ahead of the message
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Show configured providers and their availability
    Status {
        /// Send a short probe request first so availability reflects reality
        #[arg(long)]
        probe: bool,
    },

    /// List the models that can be pinned with `ask --model`
    Models,

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging. Logs go to stderr so stdout carries only the reply.
    let filter = if cli.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Models => cmd_models(&cli.config).await,
        Commands::Status { probe } => cmd_status(&cli.config, probe).await,
        Commands::Ask {
            message,
            model,
            system,
        } => cmd_ask(&cli.config, &message, model.as_deref(), system.as_deref()).await,
    }
}

fn build_router(cfg: &SwitchboardConfig) -> Result<Router> {
    let registry = cfg.registry().context("Invalid provider configuration")?;
    let tracker = Arc::new(AvailabilityTracker::new(cfg.router.cooldown()));
    let client = build_http_client(cfg.router.request_timeout())?;
    let router = Router::new(&registry, cfg.catalog(), tracker, client)
        .with_attempt_timeout(cfg.router.attempt_timeout());
    info!(
        "Router ready with {} enabled provider(s)",
        router.providers().len()
    );
    Ok(router)
}

fn build_messages(message: &str, system: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(message));
    messages
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Switchboard initialized at {}", config_dir.display());
    println!(
        "Set GEMINI_API_KEY, GROQ_API_KEY, OPENROUTER_API_KEY, OPENAI_API_KEY or HUGGINGFACE_API_KEY, or edit {}.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let mut cfg = SwitchboardConfig::load(config_path)?;
    for provider in &mut cfg.providers {
        provider.api_key = mask_secret(&provider.api_key);
    }
    println!("{}", toml::to_string_pretty(&cfg)?);
    if cfg.providers.is_empty() {
        println!("# No [[providers]] configured; using provider API keys from the environment");
    }
    Ok(())
}

async fn cmd_models(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let router = build_router(&cfg)?;
    let status = router.provider_status();

    println!("{:<24} {:<14} {:<40} {}", "ID", "PROVIDER", "BACKEND MODEL", "NAME");
    for entry in router.catalog().entries() {
        let marker = if status.get(&entry.provider).copied().unwrap_or(false) {
            ""
        } else {
            " (unavailable)"
        };
        println!(
            "{:<24} {:<14} {:<40} {}{}",
            entry.id, entry.provider, entry.backend_model, entry.display_name, marker
        );
    }
    Ok(())
}

async fn cmd_status(config_path: &Option<PathBuf>, probe: bool) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let router = build_router(&cfg)?;

    if probe {
        let messages = build_messages("Reply with the single word OK.", None);
        match router.generate_response(&messages, None).await {
            Ok(response) => info!("Probe answered by {}", response.provider_name),
            Err(e) => warn!("Probe failed: {}", e),
        }
    }

    let exclusions = router.tracker().exclusions();
    for (name, available) in router.provider_status() {
        let state = if available {
            "available".to_string()
        } else if let Some(remaining) = exclusions.get(&name) {
            format!("cooling down ({}s left)", remaining.as_secs())
        } else {
            "disabled (no API key)".to_string()
        };
        println!("{:<14} {}", name, state);
    }
    match router.current_provider() {
        Some(name) => println!("\nNext request goes to: {}", name),
        None => println!("\nNo provider is currently available"),
    }
    Ok(())
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    message: &str,
    model: Option<&str>,
    system: Option<&str>,
) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let router = build_router(&cfg)?;
    let messages = build_messages(message, system);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling request...");
            ctrl_c_cancel.cancel();
        }
    });

    let result = router
        .generate_response_with_cancel(&messages, model, &cancel)
        .await;

    match result {
        Ok(response) => {
            print_response(&response);
            Ok(())
        }
        Err(RouterError::RateLimited {
            provider,
            rate_limit,
        }) => {
            let response = CanonicalResponse::rate_limited(&provider, rate_limit);
            print_response(&response);
            Err(anyhow::anyhow!("{} is rate limited", provider))
        }
        Err(e) => {
            println!("{}", e.user_message());
            Err(e.into())
        }
    }
}

fn print_response(response: &CanonicalResponse) {
    println!("{}", response.text);
    let mut footer = format!("[{} / {}", response.provider_name, response.model);
    if let Some(usage) = &response.usage {
        footer.push_str(&format!(", {} tokens", usage.total_tokens));
    }
    if let Some(secs) = response
        .rate_limit
        .as_ref()
        .and_then(|r| r.retry_after_seconds)
    {
        footer.push_str(&format!(", retry in {}s", secs));
    }
    footer.push(']');
    eprintln!("{}", footer);
}
