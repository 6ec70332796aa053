//! certgate - certificate and Negotiate authentication gateway

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use certgate::{
    certificate::{CertificateValidator, PresentedCertificate},
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::CheckCert { ref file }) => run_check_cert(cli.config.as_deref(), file).await,
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Validate a PEM chain with the configured validator and print the verdict
async fn run_check_cert(config_path: Option<&Path>, file: &Path) -> ExitCode {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let validator = match CertificateValidator::from_config(&config.certificate, &config.revocation)
    {
        Ok(v) => v,
        Err(e) => {
            eprintln!("❌ Failed to build validator: {e}");
            return ExitCode::FAILURE;
        }
    };

    let presented = match std::fs::read(file)
        .map_err(certgate::Error::from)
        .and_then(|data| PresentedCertificate::from_pem(&data))
    {
        Ok(Some(p)) => p,
        Ok(None) => {
            eprintln!("❌ No certificate found in {}", file.display());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("❌ Failed to read {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    match validator.validate(Some(&presented)).await {
        Ok(principal) => {
            println!("✅ accepted");
            for (claim, value) in principal.claims() {
                println!("   {claim}: {value}");
            }
            println!("   issuer: {}", principal.issuer());
            ExitCode::SUCCESS
        }
        Err(rejection) => {
            println!("❌ rejected: {rejection}");
            println!("   category: {:?}", rejection.kind());
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting certgate"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
