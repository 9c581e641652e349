//! TLS binding over TCP.
//!
//! Server certificates are verified against a PEM CA bundle, either the one
//! given explicitly or the first system bundle found on disk. The name
//! checked against the certificate is the host part of `host:port`.

use crate::chunk::Chunk;
use crate::error::TransportError;
use crate::stream::{IoStream, SocketLink};
use crate::tcp::dial;
use crate::transport::Transport;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// System CA bundles tried in order when none is configured
pub const SYSTEM_CA_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/cert.pem",
    "/etc/ssl/ca-bundle.pem",
];

/// Read the configured CA bundle, or the first system bundle that exists
pub fn load_ca_bundle(path: Option<&Path>) -> Result<String, TransportError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => SYSTEM_CA_BUNDLES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| TransportError::Tls("no system CA bundle found".into()))?,
    };

    debug!("Loading CA bundle from {}", path.display());
    Ok(std::fs::read_to_string(&path)?)
}

/// Create a TLS client configuration trusting the certificates in `ca_pem`
pub fn make_client_config(ca_pem: &str) -> Result<ClientConfig, TransportError> {
    // Install default crypto provider if not already set
    let _ = rustls::crypto::ring::default_provider().install_default();

    let ca_results: Result<Vec<_>, _> = rustls_pemfile::certs(&mut ca_pem.as_bytes()).collect();
    let ca_certs = ca_results?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(ca_certs);
    if added == 0 {
        return Err(TransportError::Tls("no usable CA certificates".into()));
    }
    debug!("Trusting {} CA certificates ({} ignored)", added, ignored);

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Host part of `host:port`, without IPv6 brackets
pub fn server_host(remote: &str) -> Result<&str, TransportError> {
    let (host, port) = remote
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidAddress(remote.to_string()))?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(TransportError::InvalidAddress(remote.to_string()));
    }
    Ok(host.trim_start_matches('[').trim_end_matches(']'))
}

/// Dial `host:port` and relay bytes over TLS
pub struct TlsTransport {
    name: String,
    remote: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    link: Option<SocketLink>,
}

impl TlsTransport {
    /// Create a transport for `remote` with the given client configuration
    pub fn new(remote: impl Into<String>, config: ClientConfig) -> Result<Self, TransportError> {
        let remote = remote.into();
        let host = server_host(&remote)?;
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|_| TransportError::InvalidAddress(remote.clone()))?;

        Ok(Self {
            name: format!("tls:{}", remote),
            remote,
            server_name,
            connector: TlsConnector::from(Arc::new(config)),
            link: None,
        })
    }

    /// Create a transport trusting the CA bundle at `ca_bundle`, or the
    /// system bundle when `None`
    pub fn with_ca_bundle(
        remote: impl Into<String>,
        ca_bundle: Option<&Path>,
    ) -> Result<Self, TransportError> {
        let pem = load_ca_bundle(ca_bundle)?;
        Self::new(remote, make_client_config(&pem)?)
    }
}

#[async_trait]
impl Transport for TlsTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(SocketLink::is_open)
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(link) = self.link.take() {
            link.shutdown(&self.name).await;
        }

        let tcp = dial(&self.remote).await?;
        debug!("{}: TCP connected, starting handshake", self.name);
        let tls = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| TransportError::Tls(format!("handshake with {} failed: {}", self.remote, e)))?;

        info!("{}: connected", self.name);
        self.link = Some(SocketLink::spawn(IoStream::TlsClient(Box::new(tls))));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(link) = self.link.take() {
            link.shutdown(&self.name).await;
            info!("{}: closed", self.name);
        }
        Ok(())
    }

    async fn write(
        &mut self,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        link.write(buf, timeout).await
    }

    async fn next_chunk(&mut self) -> Chunk {
        match self.link.as_mut() {
            Some(link) => link.next_chunk().await,
            None => Chunk::EndOfStream,
        }
    }
}
