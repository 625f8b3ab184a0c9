//! QUIC broker connector.
//!
//! One bidirectional stream per session carries every frame in both
//! directions. A writer task drains an outbound queue onto the send half; a
//! reader task routes acks to waiting requests and messages to the inbound
//! channel.
//!
//! # Security
//!
//! TLS 1.3 only, ALPN `keyward/1`. [`ServerVerification::SkipVerification`]
//! accepts any certificate and exists for local development against a
//! self-signed broker. Production clients must pin roots.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use keyward_proto::{ALPN_PROTOCOL, BrokerFrame, Outcome, read_frame, write_frame};
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream};
use rustls::pki_types::CertificateDer;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};
use tracing::{debug, info, warn};

use crate::{Connector, InboundMessage, Link, LinkError, Session};

/// Address scheme served by [`QuicConnector`].
pub const QUIC_SCHEME: &str = "quic://";

/// How the client authenticates the broker's certificate.
#[derive(Debug, Clone)]
pub enum ServerVerification {
    /// Trust only these root certificates
    Roots(Vec<CertificateDer<'static>>),
    /// Accept any certificate (development only)
    SkipVerification,
}

/// QUIC connector configuration.
#[derive(Debug, Clone)]
pub struct QuicConfig {
    /// TLS server name expected in the broker certificate
    pub server_name: String,
    /// Close the connection after this much silence
    pub idle_timeout: Duration,
    /// Keep-alive period; must be shorter than `idle_timeout`
    pub keep_alive_interval: Duration,
    /// Inbound queue depth before the reader applies backpressure
    pub inbound_buffer: usize,
    /// Certificate verification policy
    pub verification: ServerVerification,
}

impl QuicConfig {
    /// Trust the given roots.
    pub fn with_roots(roots: Vec<CertificateDer<'static>>) -> Self {
        Self {
            server_name: "localhost".to_string(),
            idle_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(10),
            inbound_buffer: 256,
            verification: ServerVerification::Roots(roots),
        }
    }

    /// Trust the certificates in a PEM bundle.
    ///
    /// # Errors
    ///
    /// `LinkError::Tls` if the bundle cannot be parsed or holds no
    /// certificate.
    pub fn with_pem_roots(pem: &[u8]) -> Result<Self, LinkError> {
        let roots = rustls_pemfile::certs(&mut &pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LinkError::Tls(format!("failed to parse certificates: {e}")))?;

        if roots.is_empty() {
            return Err(LinkError::Tls("no certificate found in PEM bundle".to_string()));
        }

        Ok(Self::with_roots(roots))
    }

    /// Development preset: accepts the broker's self-signed certificate.
    pub fn development() -> Self {
        Self { verification: ServerVerification::SkipVerification, ..Self::with_roots(Vec::new()) }
    }
}

/// Connector for `quic://host:port` brokers.
pub struct QuicConnector {
    config: QuicConfig,
    client_config: ClientConfig,
}

impl QuicConnector {
    /// Build a connector.
    ///
    /// # Errors
    ///
    /// `LinkError::Tls` if the TLS or QUIC configuration is invalid.
    pub fn new(config: QuicConfig) -> Result<Self, LinkError> {
        let client_config = client_config(&config)?;
        Ok(Self { config, client_config })
    }
}

#[async_trait]
impl Connector for QuicConnector {
    async fn connect(&self, address: &str, client_id: &str) -> Result<Session, LinkError> {
        let remote = resolve(address).await?;

        let bind: SocketAddr = if remote.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let endpoint =
            Endpoint::client(bind).map_err(|e| LinkError::Io(format!("endpoint creation failed: {e}")))?;

        let connection = endpoint
            .connect_with(self.client_config.clone(), remote, &self.config.server_name)
            .map_err(|e| LinkError::Refused(format!("connect failed: {e}")))?
            .await
            .map_err(|e| LinkError::Refused(format!("connection failed: {e}")))?;

        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| LinkError::Io(format!("open_bi failed: {e}")))?;

        write_frame(&mut send, &BrokerFrame::Connect { client_id: client_id.to_string() }).await?;
        match read_frame(&mut recv).await? {
            Some(BrokerFrame::ConnAck) => {},
            Some(other) => {
                connection.close(0u32.into(), b"protocol violation");
                return Err(LinkError::Io(format!("expected connack, got {}", other.kind())));
            },
            None => return Err(LinkError::Closed),
        }

        info!(%remote, client = client_id, "broker session established");

        let pending: SharedAcks = Arc::new(Mutex::new(PendingAcks::default()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_buffer);

        let writer = tokio::spawn(run_writer(send, outbound_rx));
        let reader = tokio::spawn(run_reader(recv, inbound_tx, Arc::clone(&pending)));

        let link = QuicLink {
            outbound: outbound_tx,
            pending,
            next_request: AtomicU32::new(1),
            connection,
            _endpoint: endpoint,
            writer: writer.abort_handle(),
            reader: reader.abort_handle(),
        };

        Ok(Session { link: Box::new(link), inbound: inbound_rx })
    }
}

async fn resolve(address: &str) -> Result<SocketAddr, LinkError> {
    let host_port = address
        .strip_prefix(QUIC_SCHEME)
        .ok_or_else(|| LinkError::Refused(format!("unsupported address '{address}'")))?;

    tokio::net::lookup_host(host_port)
        .await
        .map_err(|e| LinkError::Refused(format!("cannot resolve '{host_port}': {e}")))?
        .next()
        .ok_or_else(|| LinkError::Refused(format!("no address for '{host_port}'")))
}

/// Requests waiting for a broker ack.
///
/// Once closed, no new waiter is accepted, so a request racing the reader's
/// shutdown fails with `Closed` instead of waiting forever.
#[derive(Default)]
struct PendingAcks {
    closed: bool,
    waiters: HashMap<u32, oneshot::Sender<Outcome>>,
}

type SharedAcks = Arc<Mutex<PendingAcks>>;

impl PendingAcks {
    fn register(&mut self, request_id: u32) -> Result<oneshot::Receiver<Outcome>, LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_id, tx);
        Ok(rx)
    }

    /// Hand `outcome` to its waiter. False if no request has that id.
    fn resolve(&mut self, request_id: u32, outcome: Outcome) -> bool {
        match self.waiters.remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            },
            None => false,
        }
    }

    fn cancel(&mut self, request_id: u32) {
        self.waiters.remove(&request_id);
    }

    /// Fail every outstanding request with `Closed` and refuse new ones.
    fn close(&mut self) {
        self.closed = true;
        self.waiters.clear();
    }
}

/// Drain queued frames onto the stream until the link is dropped.
async fn run_writer(mut send: SendStream, mut outbound: mpsc::UnboundedReceiver<BrokerFrame>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut send, &frame).await {
            warn!("broker write failed: {e}");
            return;
        }
    }

    let _ = send.finish();
}

/// Route broker frames until the stream ends, then close `pending`.
async fn run_reader(
    mut recv: RecvStream,
    inbound: mpsc::Sender<InboundMessage>,
    pending: SharedAcks,
) {
    loop {
        let frame = match read_frame(&mut recv).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("broker closed the stream");
                break;
            },
            Err(e) => {
                warn!("broker read failed: {e}");
                break;
            },
        };

        match frame {
            BrokerFrame::Message { topic, payload } => {
                if inbound.send(InboundMessage { topic, payload }).await.is_err() {
                    break;
                }
            },
            BrokerFrame::SubAck { request_id, outcome }
            | BrokerFrame::UnsubAck { request_id, outcome } => {
                let resolved = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .resolve(request_id, outcome);
                if !resolved {
                    warn!(request_id, "ack for unknown request");
                }
            },
            other => warn!(kind = other.kind(), "unexpected frame from broker"),
        }
    }

    pending.lock().unwrap_or_else(PoisonError::into_inner).close();
}

struct QuicLink {
    outbound: mpsc::UnboundedSender<BrokerFrame>,
    pending: SharedAcks,
    next_request: AtomicU32,
    connection: quinn::Connection,
    _endpoint: Endpoint,
    writer: AbortHandle,
    reader: AbortHandle,
}

impl QuicLink {
    async fn request(&self, build: impl FnOnce(u32) -> BrokerFrame) -> Result<(), LinkError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.lock().unwrap_or_else(PoisonError::into_inner).register(request_id)?;

        if self.outbound.send(build(request_id)).is_err() {
            self.pending.lock().unwrap_or_else(PoisonError::into_inner).cancel(request_id);
            return Err(LinkError::Closed);
        }

        match rx.await.map_err(|_| LinkError::Closed)? {
            Outcome::Accepted => Ok(()),
            Outcome::Rejected { reason } => Err(LinkError::Rejected(reason)),
        }
    }
}

#[async_trait]
impl Link for QuicLink {
    async fn subscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.request(|request_id| BrokerFrame::Subscribe { request_id, topic: topic.to_string() })
            .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.request(|request_id| BrokerFrame::Unsubscribe { request_id, topic: topic.to_string() })
            .await
    }

    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), LinkError> {
        self.outbound
            .send(BrokerFrame::Publish { topic: topic.to_string(), payload })
            .map_err(|_| LinkError::Closed)
    }

    fn close(&self) {
        self.writer.abort();
        self.reader.abort();
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).close();
        self.connection.close(0u32.into(), b"client closed");
    }
}

impl Drop for QuicLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn client_config(config: &QuicConfig) -> Result<ClientConfig, LinkError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| LinkError::Tls(format!("invalid TLS config: {e}")))?;

    let mut tls = match &config.verification {
        ServerVerification::Roots(certs) => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in certs {
                roots
                    .add(cert.clone())
                    .map_err(|e| LinkError::Tls(format!("invalid root certificate: {e}")))?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        },
        ServerVerification::SkipVerification => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
            .with_no_client_auth(),
    };

    tls.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
        .map_err(|e| LinkError::Tls(format!("QUIC config error: {e}")))?;
    let mut client = ClientConfig::new(Arc::new(quic));

    let idle = quinn::IdleTimeout::try_from(config.idle_timeout)
        .map_err(|e| LinkError::Tls(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    transport.keep_alive_interval(Some(config.keep_alive_interval));
    client.transport_config(Arc::new(transport));

    Ok(client)
}

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct SkipServerVerification(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
