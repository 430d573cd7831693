mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::process;

use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
    error::{AppError, Result},
};

#[tokio::main]
async fn main() {
    // Values from .env feed the `env` fallbacks of the arguments.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let json_errors = args.output.is_json();

    if let Err(e) = run(args).await {
        if json_errors {
            let error_json = serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            });
            println!("{error_json}");
        } else {
            error!("Application error: {}", e);
            eprintln!("Error: {}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    if let Commands::Config { show, reset } = args.command {
        if reset {
            let path = AppConfig::reset(args.config.as_deref())?;
            println!("Configuration reset to defaults at {}", path.display());
        } else if show {
            let config = AppConfig::load(args.config.as_deref())?;
            println!("{}", config.show()?);
        } else {
            println!("Use --show to display current configuration or --reset to reset to defaults");
        }
        return Ok(());
    }

    let config = AppConfig::load(args.config.as_deref())?.with_overrides(
        args.base_url,
        args.timeout,
        args.proxy,
    );
    config.client.validate()?;

    let executor = CommandExecutor::new(config, args.output)?;
    let result = match args.command {
        Commands::Signin { email, password } => executor.sign_in(&email, &password).await,
        Commands::Signup {
            name,
            email,
            password,
        } => executor.sign_up(&name, &email, &password).await,
        Commands::Signout => executor.sign_out().await,
        Commands::Whoami => executor.whoami().await,
        Commands::Latest => executor.latest().await,
        Commands::Listings => executor.listings().await,
        Commands::Category { name } => executor.category(&name).await,
        Commands::Detail { id } => executor.detail(&id).await,
        Commands::Search { query } => executor.search(&query).await,
        Commands::Ask { id, question } => executor.ask(&id, &question).await,
        Commands::Listen => executor.listen().await,
        Commands::Config { .. } => Ok(()),
    };
    executor.finish().await;
    result
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
