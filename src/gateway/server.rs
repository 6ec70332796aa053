//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use super::auth::ConnectionContext;
use super::router::{AppState, create_router};
use crate::certificate::PresentedCertificate;
use crate::config::Config;
use crate::coordinator::AuthenticationCoordinator;
use crate::policy::PolicyRegistry;
use crate::tls::build_server_config;
use crate::{Error, Result};

/// Authentication gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Authentication entry point
    coordinator: Arc<AuthenticationCoordinator>,
    /// TLS acceptor built from `config.tls`
    acceptor: TlsAcceptor,
    /// Router shared by all connections
    app: Router,
}

impl Gateway {
    /// Create a new gateway: load trust anchors, CRLs, TLS material.
    pub fn new(config: Config) -> Result<Self> {
        let coordinator = Arc::new(AuthenticationCoordinator::from_config(&config)?);
        let acceptor = TlsAcceptor::from(build_server_config(&config.tls)?);

        let state = Arc::new(AppState {
            coordinator: Arc::clone(&coordinator),
            policies: PolicyRegistry::default(),
            request_timeout: config.server.request_timeout,
        });
        let app = create_router(state)?;

        Ok(Self {
            config,
            coordinator,
            acceptor,
            app,
        })
    }

    /// Run until Ctrl+C / SIGTERM, then drain connections.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("CERTGATE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening (TLS)");
        info!(
            certificate = self.config.certificate.enabled,
            allowed_types = ?self.config.certificate.allowed_certificate_types,
            revocation = ?self.config.revocation.mode,
            fail_open = self.config.certificate.revocation_fail_open,
            "Certificate authentication"
        );
        info!(
            negotiate = self.config.negotiate.enabled,
            "Negotiate authentication"
        );
        if self.config.certificate.revocation_fail_open {
            warn!("Revocation fail-open enabled - Unknown status is accepted");
        }
        info!("  GET /w  (NegotiateRequired)");
        info!("  GET /c  (CertificateRequired)");
        info!("============================================================");

        self.spawn_revocation_sweeper(shutdown_tx.subscribe());

        let mut connections = JoinSet::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            connections.spawn(serve_connection(
                                stream,
                                peer,
                                self.acceptor.clone(),
                                self.app.clone(),
                                Arc::clone(&self.coordinator),
                                shutdown_tx.subscribe(),
                                self.config.server.request_timeout,
                            ));
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                () = &mut shutdown => break,
            }
        }

        info!(open = connections.len(), "Draining connections...");
        let _ = shutdown_tx.send(());
        let drained = tokio::time::timeout(self.config.server.shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "Shutdown timeout reached, aborting connections"
            );
            connections.abort_all();
        }

        Ok(())
    }

    fn spawn_revocation_sweeper(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let Some(checker) = self
            .coordinator
            .certificate_validator()
            .and_then(|v| v.revocation_checker())
            .cloned()
        else {
            return;
        };
        let period = self.config.revocation.verdict_ttl;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => checker.evict_expired(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }
}

/// TLS handshake, then HTTP/1.1 or HTTP/2 on one connection.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    app: Router,
    coordinator: Arc<AuthenticationCoordinator>,
    mut shutdown_rx: broadcast::Receiver<()>,
    handshake_timeout: std::time::Duration,
) {
    let tls = match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "TLS handshake timed out");
            return;
        }
    };

    let presented = tls
        .get_ref()
        .1
        .peer_certificates()
        .map(<[_]>::to_vec)
        .and_then(PresentedCertificate::from_chain);
    debug!(
        peer = %peer,
        client_certificate = presented.is_some(),
        "TLS handshake complete"
    );

    let context = ConnectionContext::new(presented, &coordinator);
    let service = TowerToHyperService::new(app.layer(Extension(context)));

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "Connection closed with error");
            }
        }
        _ = shutdown_rx.recv() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!(peer = %peer, error = %e, "Connection error during drain");
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
