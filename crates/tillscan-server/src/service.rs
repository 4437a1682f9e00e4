//! Lifecycle of the scan ingestion service.
//!
//! One listener at a time, guarded by a single async mutex. `start` on a
//! running service is a restart: the live listener is torn down first, so
//! two listeners never coexist and the preferred port can be picked up
//! again immediately.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tillscan_core::ScanConfig;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::addr::{self, AdvertisedAddr};
use crate::dispatch::{self, ScanHandler};
use crate::page;
use crate::port::{self, PortError};
use crate::routes::{self, RouterState};
use crate::tls::{CredentialRequest, CredentialStore, CredentialStrategy, Provisioner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a running listener, as returned by [`ScanService::start`].
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    /// Always [`ServiceState::Running`] while the snapshot is reachable;
    /// kept so a status line can be rendered without a second lookup.
    pub state: ServiceState,
    pub scheme: Scheme,
    pub port: u16,
    pub address: AdvertisedAddr,
    /// Full URL handsets should open, e.g. `https://192.168.1.20:8080/scan`.
    pub advertised_url: String,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Ports(#[from] PortError),
    #[error("could not bind port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },
}

pub struct ScanService {
    config: ScanConfig,
    provisioner: Provisioner,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: ServiceState,
    running: Option<RunningListener>,
}

struct RunningListener {
    status: ServiceStatus,
    shutdown: watch::Sender<bool>,
    accept_handle: JoinHandle<()>,
    dispatch_handle: JoinHandle<()>,
}

impl ScanService {
    pub fn new(config: ScanConfig) -> Self {
        let store = CredentialStore::new(config.credential_dir());
        let provisioner = Provisioner::new(store, config.tls_tool.clone());
        Self::assemble(config, provisioner)
    }

    /// Same service with a caller-supplied credential strategy list, for
    /// hosts that bring their own certificate source.
    pub fn with_strategies(
        config: ScanConfig,
        strategies: Vec<Box<dyn CredentialStrategy>>,
    ) -> Self {
        let store = CredentialStore::new(config.credential_dir());
        let provisioner = Provisioner::with_strategies(store, strategies);
        Self::assemble(config, provisioner)
    }

    fn assemble(config: ScanConfig, provisioner: Provisioner) -> Self {
        Self {
            config,
            provisioner,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.lock().await.state
    }

    /// Listener snapshot, `None` unless running.
    pub async fn status(&self) -> Option<ServiceStatus> {
        self.inner
            .lock()
            .await
            .running
            .as_ref()
            .map(|running| running.status.clone())
    }

    /// Starts listening and hands accepted scans to `on_scan`, invoked
    /// serially from a dedicated task. A running listener is stopped
    /// first, so calling this twice restarts rather than errors.
    pub async fn start(
        &self,
        preferred_port: u16,
        on_scan: ScanHandler,
    ) -> Result<ServiceStatus, StartError> {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.running.take() {
            info!(
                port = previous.status.port,
                "restart requested, stopping live listener"
            );
            teardown(previous).await;
            inner.state = ServiceState::Stopped;
        }
        inner.state = ServiceState::Starting;
        match self.launch(preferred_port, on_scan).await {
            Ok(running) => {
                let status = running.status.clone();
                inner.state = ServiceState::Running;
                inner.running = Some(running);
                Ok(status)
            }
            Err(err) => {
                inner.state = ServiceState::Stopped;
                Err(err)
            }
        }
    }

    /// Stops accepting. The bound port is released by the time this
    /// returns; requests already in flight may still finish, and scans
    /// they submitted are still delivered.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(running) = inner.running.take() {
            teardown(running).await;
        }
        inner.state = ServiceState::Stopped;
    }

    async fn launch(
        &self,
        preferred_port: u16,
        on_scan: ScanHandler,
    ) -> Result<RunningListener, StartError> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let port = port::allocate(preferred_port, self.config.max_port_attempts)?;
        let address = addr::resolve();
        if address.is_fallback() {
            warn!(
                ip = %address.ip(),
                "no LAN address detected, the advertised URL may be unreachable from handsets"
            );
        }

        let acceptor = self.acceptor_for(address).await;
        let scheme = if acceptor.is_some() {
            Scheme::Https
        } else {
            Scheme::Http
        };
        if scheme == Scheme::Http {
            warn!("serving plain HTTP, scans cross the store network unencrypted");
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|source| StartError::Bind { port, source })?;

        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let dispatch_handle = dispatch::spawn_dispatcher(scan_rx, on_scan);

        let page = page::render_scan_page(self.config.cooldown());
        let router = routes::router(RouterState {
            scans: scan_tx,
            page: Arc::new(page),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_handle = tokio::spawn(accept_loop(listener, acceptor, router, shutdown_rx));

        let status = ServiceStatus {
            state: ServiceState::Running,
            scheme,
            port,
            address,
            advertised_url: format!(
                "{}://{}:{}{}",
                scheme.as_str(),
                address.ip(),
                port,
                routes::SCAN_PATH
            ),
        };
        info!(url = %status.advertised_url, "scan service listening");

        Ok(RunningListener {
            status,
            shutdown: shutdown_tx,
            accept_handle,
            dispatch_handle,
        })
    }

    /// Provisioning happens off the runtime because it shells out and
    /// touches disk. Every failure path lands on `None`: no certificate
    /// ever stops the checkout from scanning.
    async fn acceptor_for(&self, address: AdvertisedAddr) -> Option<TlsAcceptor> {
        if self.config.force_plaintext {
            info!("plaintext forced by configuration, skipping credential provisioning");
            return None;
        }

        let mut request = CredentialRequest::new("tillscan");
        if !matches!(address, AdvertisedAddr::Loopback) {
            request = request.with_addr(address.ip().into());
        }

        let provisioner = self.provisioner.clone();
        let provisioned =
            tokio::task::spawn_blocking(move || provisioner.provision(&request)).await;
        match provisioned {
            Ok(Ok(credential)) => {
                debug!(not_after = %credential.not_after(), "transport credential ready");
                match credential.into_acceptor() {
                    Ok(acceptor) => Some(acceptor),
                    Err(err) => {
                        warn!("credential rejected by rustls, downgrading to plaintext: {err}");
                        None
                    }
                }
            }
            Ok(Err(err)) => {
                warn!("credential provisioning failed, downgrading to plaintext: {err}");
                None
            }
            Err(err) => {
                warn!("provisioning task failed, downgrading to plaintext: {err}");
                None
            }
        }
    }
}

async fn teardown(running: RunningListener) {
    let _ = running.shutdown.send(true);
    if let Err(err) = running.accept_handle.await
        && err.is_panic()
    {
        warn!("accept loop panicked during shutdown: {err}");
    }
    // The dispatcher exits on its own once the router and any in-flight
    // connections are gone, draining queued scans first.
    drop(running.dispatch_handle);
}

/// Single accept loop for both transports. Each connection is served on
/// its own task; the loop owns the listener, so breaking out of it is
/// what releases the port.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!("accept failed: {err}");
                    continue;
                }
            },
        };

        let tls = tls.clone();
        let service = TowerToHyperService::new(router.clone());
        tokio::spawn(async move {
            let builder = ConnBuilder::new(TokioExecutor::new());
            let served = match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        builder
                            .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                            .await
                    }
                    Err(err) => {
                        debug!(%peer, "TLS handshake failed: {err}");
                        return;
                    }
                },
                None => {
                    builder
                        .serve_connection_with_upgrades(TokioIo::new(stream), service)
                        .await
                }
            };
            if let Err(err) = served {
                debug!(%peer, "connection ended with error: {err}");
            }
        });
    }
    debug!("accept loop stopped, listener released");
}
