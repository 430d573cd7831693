use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "market")]
#[command(about = "Browse the marketplace, manage your session and follow your conversations")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MARKET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, global = true, env = "MARKET_BASE_URL")]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = "MARKET_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Proxy URL (http or https)
    #[arg(long, global = true, env = "MARKET_PROXY")]
    pub proxy: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    pub output: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session
    Signin {
        /// Account email
        email: String,

        /// Account password
        #[arg(long, env = "MARKET_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account
    Signup {
        name: String,
        email: String,

        #[arg(long, env = "MARKET_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Invalidate the stored session
    Signout,

    /// Show the signed-in profile
    Whoami,

    /// Latest products on the marketplace
    Latest,

    /// Your own listings
    Listings,

    /// Products in a category
    Category { name: String },

    /// Full details of a product
    Detail { id: String },

    /// Search products by name
    Search { query: String },

    /// Ask the assistant a question about a product
    Ask {
        /// Product id
        id: String,
        question: String,
    },

    /// Stream realtime events until interrupted
    Listen,

    /// Configuration management
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable output
    Pretty,
    /// Pretty printed JSON
    Json,
    /// Single line JSON
    JsonCompact,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::JsonCompact)
    }
}
