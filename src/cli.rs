//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// certgate - certificate and Negotiate authentication gateway
#[derive(Parser, Debug)]
#[command(name = "certgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CERTGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CERTGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CERTGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERTGATE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CERTGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Run the certificate validator against a PEM chain (leaf first)
    CheckCert {
        /// PEM file holding the leaf and any intermediates
        #[arg(required = true)]
        file: PathBuf,
    },
}
