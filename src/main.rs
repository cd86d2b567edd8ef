//! fsx-bridge - Operator CLI for the Core gateway
//!
//! Runs single gateway operations against Core and prints the outcome as JSON.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fsx_bridge::config::{self, Config};
use fsx_bridge::gateway::Gateway;

/// fsx-bridge - Gateway between front ends and Core
#[derive(Parser)]
#[command(name = "fsx-bridge")]
#[command(version)]
#[command(about = "Talk to Core over its framed TCP protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },

    /// Log in and open a persistent session
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        password: String,

        /// Keep the session alive until Ctrl+C, then log out
        #[arg(long)]
        hold: bool,
    },

    /// List online users
    Online,

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };
    config.apply_env_overrides()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose || config.general.verbose {
            EnvFilter::new("debug")
        } else if let Some(directive) = &config.general.log_filter {
            EnvFilter::new(directive)
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Register {
            username,
            email,
            password,
        } => {
            let gateway = Gateway::new(&config);
            let response = gateway
                .register(&username, &email, &password, gateway.request_timeout())
                .await?;
            print_json(&response)?;
        }
        Commands::Login {
            username,
            password,
            hold,
        } => {
            let gateway = Gateway::new(&config);
            let response = gateway
                .login(&username, &password, gateway.request_timeout())
                .await?;
            print_json(&response)?;

            if hold && response.ok {
                hold_session(&gateway, &username).await;
            }
            gateway.shutdown().await;
        }
        Commands::Online => {
            let gateway = Gateway::new(&config);
            print_json(&gateway.get_online().await)?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Keep `username` online until Ctrl+C or until Core drops the session
async fn hold_session(gateway: &Gateway, username: &str) {
    if !gateway.has_session(username).await {
        tracing::warn!("No persistent session for {}, nothing to hold", username);
        return;
    }

    eprintln!("Session for {} is live. Press Ctrl+C to log out.", username);

    let mut check = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nLogging out...");
                break;
            }
            _ = check.tick() => {
                if !gateway.has_session(username).await {
                    tracing::warn!("Session for {} was lost", username);
                    break;
                }
            }
        }
    }

    gateway.logout(username).await;
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
