//! Self-signed transport credentials for the scan listener.
//!
//! Strategies are tried in order: the external `openssl` binary first,
//! which writes reusable PEM files into the credential store, then an
//! in-process rcgen build that keeps its material in memory. When every
//! strategy fails the caller downgrades to plaintext instead of refusing
//! to start; a checkout without HTTPS still has to sell groceries.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";
pub const META_FILE: &str = "meta.json";

const VALIDITY_DAYS: i64 = 825;

/// Cached material this close to expiry is regenerated instead of served.
const EXPIRY_MARGIN: Duration = Duration::days(1);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no cached credential")]
    Missing,
    #[error("cached credential expires {0}")]
    Expired(OffsetDateTime),
    #[error("cached credential unreadable: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of a single provisioning strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("credential tool failed: {0}")]
    Tool(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("certificate build failed: {0}")]
    Build(#[from] rcgen::Error),
    #[error("store rejected generated credential: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("all credential strategies failed: {}", format_failures(.failures))]
    AllStrategiesFailed {
        failures: Vec<(&'static str, StrategyError)>,
    },
}

fn format_failures(failures: &[(&'static str, StrategyError)]) -> String {
    if failures.is_empty() {
        return "none attempted".to_string();
    }
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// What a strategy is asked to certify.
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub common_name: String,
    /// IP subject alternative names. Always contains 127.0.0.1.
    pub san_addrs: Vec<IpAddr>,
}

impl CredentialRequest {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            san_addrs: vec![IpAddr::from([127, 0, 0, 1])],
        }
    }

    /// Adds a detected LAN address so handsets do not get a name mismatch
    /// on top of the self-signed warning.
    pub fn with_addr(mut self, ip: IpAddr) -> Self {
        if !self.san_addrs.contains(&ip) {
            self.san_addrs.push(ip);
        }
        self
    }
}

/// Serving material produced by a strategy. Owned by the listener that
/// consumes it and never handed out past [`Self::into_acceptor`].
#[derive(Debug)]
pub struct TransportCredential {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    not_after: OffsetDateTime,
}

impl TransportCredential {
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn into_acceptor(self) -> Result<TlsAcceptor, rustls::Error> {
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.chain, self.key)?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoreMeta {
    pub strategy: String,
    pub created_at: i64,
    pub not_after: i64,
}

impl StoreMeta {
    pub(crate) fn new(strategy: &str, not_after: OffsetDateTime) -> Self {
        Self {
            strategy: strategy.to_string(),
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            not_after: not_after.unix_timestamp(),
        }
    }
}

/// On-disk cache of PEM credentials plus a JSON sidecar describing them.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn ensure_dir(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Loads cached material, rejecting anything expired or unparsable.
    /// Every error here means "regenerate", never "abort".
    pub fn load(&self) -> Result<TransportCredential, StoreError> {
        let meta = self.read_meta()?;
        let not_after = OffsetDateTime::from_unix_timestamp(meta.not_after)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        if not_after < OffsetDateTime::now_utc() + EXPIRY_MARGIN {
            return Err(StoreError::Expired(not_after));
        }

        let cert_bytes = self.read_file(&self.cert_path())?;
        let chain: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(&cert_bytes)
            .collect::<Result<_, _>>()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        if chain.is_empty() {
            return Err(StoreError::Corrupt(format!("{CERT_FILE} holds no certificates")));
        }
        let key_bytes = self.read_file(&self.key_path())?;
        let key = PrivateKeyDer::from_pem_slice(&key_bytes)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;

        Ok(TransportCredential {
            chain,
            key,
            not_after,
        })
    }

    pub(crate) fn write_meta(&self, meta: &StoreMeta) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(meta)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        std::fs::write(self.meta_path(), raw)?;
        Ok(())
    }

    fn read_meta(&self) -> Result<StoreMeta, StoreError> {
        let raw = self.read_file(&self.meta_path())?;
        serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt(err.to_string()))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        std::fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StoreError::Missing
            } else {
                StoreError::Io(err)
            }
        })
    }
}

/// One way of obtaining serving material. Strategies are consulted in
/// order and the first success wins.
pub trait CredentialStrategy: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &'static str;

    fn provision(
        &self,
        store: &CredentialStore,
        request: &CredentialRequest,
    ) -> Result<TransportCredential, StrategyError>;
}

/// Shells out to the platform `openssl` binary and caches the resulting
/// PEM files in the store for later runs.
pub struct OpensslCommand {
    tool: String,
}

impl OpensslCommand {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl CredentialStrategy for OpensslCommand {
    fn name(&self) -> &'static str {
        "openssl-command"
    }

    fn provision(
        &self,
        store: &CredentialStore,
        request: &CredentialRequest,
    ) -> Result<TransportCredential, StrategyError> {
        store.ensure_dir()?;
        let not_after = OffsetDateTime::now_utc() + Duration::days(VALIDITY_DAYS);
        let output = Command::new(&self.tool)
            .args(["req", "-x509", "-newkey", "rsa:2048", "-sha256", "-nodes"])
            .arg("-days")
            .arg(VALIDITY_DAYS.to_string())
            .arg("-keyout")
            .arg(store.key_path())
            .arg("-out")
            .arg(store.cert_path())
            .arg("-subj")
            .arg(format!("/CN={}", request.common_name))
            .arg("-addext")
            .arg(san_extension(request))
            .output()?;
        if !output.status.success() {
            return Err(StrategyError::Tool(format!(
                "{} exited with {}: {}",
                self.tool,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        store.write_meta(&StoreMeta::new(self.name(), not_after))?;
        Ok(store.load()?)
    }
}

fn san_extension(request: &CredentialRequest) -> String {
    let mut extension = String::from("subjectAltName=DNS:localhost");
    for ip in &request.san_addrs {
        extension.push_str(",IP:");
        extension.push_str(&ip.to_string());
    }
    extension
}

/// Builds the certificate in-process with rcgen. Nothing is written to
/// disk; the material lives for this run only.
pub struct RcgenBuilder;

impl CredentialStrategy for RcgenBuilder {
    fn name(&self) -> &'static str {
        "rcgen-builder"
    }

    fn provision(
        &self,
        _store: &CredentialStore,
        request: &CredentialRequest,
    ) -> Result<TransportCredential, StrategyError> {
        let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, request.common_name.as_str());
        params.distinguished_name = dn;
        for ip in &request.san_addrs {
            params.subject_alt_names.push(SanType::IpAddress(*ip));
        }
        let not_before = OffsetDateTime::now_utc();
        let not_after = not_before + Duration::days(VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        Ok(TransportCredential {
            chain: vec![cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(key_pair.serialize_der().into()),
            not_after,
        })
    }
}

/// Ordered strategy list plus the cache in front of it.
#[derive(Clone)]
pub struct Provisioner {
    store: CredentialStore,
    strategies: Arc<[Box<dyn CredentialStrategy>]>,
}

impl Provisioner {
    /// Default order: external tool with a persistent cache, then the
    /// in-process builder.
    pub fn new(store: CredentialStore, tool: impl Into<String>) -> Self {
        Self::with_strategies(
            store,
            vec![Box::new(OpensslCommand::new(tool)), Box::new(RcgenBuilder)],
        )
    }

    pub fn with_strategies(
        store: CredentialStore,
        strategies: Vec<Box<dyn CredentialStrategy>>,
    ) -> Self {
        Self {
            store,
            strategies: strategies.into(),
        }
    }

    /// Returns cached material when present and fresh, otherwise walks the
    /// strategy list. Blocks on file IO and the external tool, so call it
    /// from a blocking context.
    pub fn provision(
        &self,
        request: &CredentialRequest,
    ) -> Result<TransportCredential, ProvisionError> {
        match self.store.load() {
            Ok(credential) => {
                info!(dir = %self.store.dir().display(), "reusing cached transport credential");
                return Ok(credential);
            }
            Err(err) => debug!("credential cache unusable: {err}"),
        }

        let mut failures = Vec::new();
        for strategy in self.strategies.iter() {
            match strategy.provision(&self.store, request) {
                Ok(credential) => {
                    info!(strategy = strategy.name(), "provisioned transport credential");
                    return Ok(credential);
                }
                Err(err) => {
                    warn!(strategy = strategy.name(), "credential strategy failed: {err}");
                    failures.push((strategy.name(), err));
                }
            }
        }
        Err(ProvisionError::AllStrategiesFailed { failures })
    }
}
