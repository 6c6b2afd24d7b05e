//! QUIC transport
//!
//! One bidirectional stream per exchange: the client writes a request frame
//! and finishes its side, the server answers with one response frame.

use crate::network::error::{NetworkError, NetworkResult};
use crate::network::transport::SyncTransport;
use crate::network::types::{ConnectionConfig, NetworkStats, PeerAddress};
use crate::protocol::{codec, Request, Response, SyncHandler};
use async_trait::async_trait;
use dashmap::DashMap;
use quinn::{Connection, Endpoint, Incoming, RecvStream, SendStream, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;

/// Server name presented in (and expected from) self-signed certificates
const SERVER_NAME: &str = "localhost";

pub struct QuicTransport {
    endpoint: Endpoint,
    connections: Arc<DashMap<SocketAddr, Connection>>,
    stats: Arc<parking_lot::RwLock<NetworkStats>>,
    config: ConnectionConfig,
}

impl QuicTransport {
    /// Create new QUIC transport with self-signed certificate
    pub async fn new(config: ConnectionConfig) -> NetworkResult<Self> {
        if config.insecure_skip_verify {
            tracing::warn!(
                "SECURITY WARNING: TLS certificate verification is DISABLED. \
                 Only use this inside a cluster of nodes with self-signed certificates."
            );
        }

        let mut endpoint = Self::make_server_endpoint(&config)?;
        endpoint.set_default_client_config(Self::make_client_config(&config)?);

        Ok(Self {
            endpoint,
            connections: Arc::new(DashMap::new()),
            stats: Arc::new(parking_lot::RwLock::new(NetworkStats::default())),
            config,
        })
    }

    fn transport_config(config: &ConnectionConfig) -> NetworkResult<quinn::TransportConfig> {
        let idle_timeout: quinn::IdleTimeout = config
            .max_idle_timeout
            .try_into()
            .map_err(|e| NetworkError::QuicError(format!("invalid idle timeout: {}", e)))?;

        let mut transport_config = quinn::TransportConfig::default();
        transport_config
            .max_concurrent_bidi_streams(config.max_concurrent_streams.into())
            .max_idle_timeout(Some(idle_timeout))
            .keep_alive_interval(Some(config.keep_alive_interval));
        Ok(transport_config)
    }

    /// Create server endpoint with self-signed certificate
    fn make_server_endpoint(config: &ConnectionConfig) -> NetworkResult<Endpoint> {
        let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.into()])
            .map_err(|e| NetworkError::CertificateError(e.to_string()))?;
        let cert_der = cert.cert.der().to_vec();
        let priv_key = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der())
            .map_err(|e| NetworkError::CertificateError(e.to_string()))?;

        let mut server_config = ServerConfig::with_single_cert(
            vec![rustls::pki_types::CertificateDer::from(cert_der)],
            priv_key,
        )
        .map_err(|e| NetworkError::CertificateError(e.to_string()))?;
        server_config.transport_config(Arc::new(Self::transport_config(config)?));

        Endpoint::server(server_config, config.bind_addr)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))
    }

    /// Client side of the endpoint
    ///
    /// Insecure mode accepts any certificate; otherwise system roots are
    /// used, falling back to the webpki roots.
    fn make_client_config(config: &ConnectionConfig) -> NetworkResult<quinn::ClientConfig> {
        let crypto = if config.insecure_skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth()
        } else {
            let mut root_store = rustls::RootCertStore::empty();

            match rustls_native_certs::load_native_certs() {
                Ok(certs) => {
                    for cert in certs {
                        if let Err(e) = root_store.add(cert) {
                            tracing::warn!("Failed to add certificate to root store: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load native certificates: {}. Using webpki roots.",
                        e
                    );
                }
            }

            if root_store.is_empty() {
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }

            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| NetworkError::CertificateError(e.to_string()))?,
        ));
        client_config.transport_config(Arc::new(Self::transport_config(config)?));
        Ok(client_config)
    }

    /// Cached connection to `addr`, reconnecting if it was closed
    async fn connection(&self, addr: SocketAddr) -> NetworkResult<Connection> {
        if let Some(conn) = self.connections.get(&addr) {
            if conn.close_reason().is_none() {
                return Ok(conn.clone());
            }
        }

        let conn = self.endpoint.connect(addr, SERVER_NAME)?.await?;
        tracing::debug!("Connected to {}", addr);

        self.connections.insert(addr, conn.clone());
        self.stats.write().active_connections = self.connections.len();
        Ok(conn)
    }

    async fn exchange(&self, addr: SocketAddr, frame: &[u8]) -> NetworkResult<Vec<u8>> {
        let conn = self.connection(addr).await?;
        let (mut send, mut recv) = conn.open_bi().await?;

        send.write_all(frame).await?;
        send.finish()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        Ok(recv.read_to_end(self.config.max_frame_size).await?)
    }

    /// Answer requests with `handler` until the endpoint closes
    pub async fn serve(self: Arc<Self>, handler: Arc<SyncHandler>) {
        tracing::info!("Serving sync requests on {:?}", self.endpoint.local_addr());

        while let Some(incoming) = self.endpoint.accept().await {
            let transport = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.handle_connection(incoming, handler).await {
                    tracing::debug!("Connection ended: {}", e);
                }
            });
        }

        tracing::info!("Endpoint closed, no longer serving");
    }

    async fn handle_connection(
        self: Arc<Self>,
        incoming: Incoming,
        handler: Arc<SyncHandler>,
    ) -> NetworkResult<()> {
        let conn = incoming.await?;
        let remote = conn.remote_address();
        tracing::debug!("Accepted connection from {}", remote);

        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(streams) => streams,
                Err(quinn::ConnectionError::ApplicationClosed(_))
                | Err(quinn::ConnectionError::LocallyClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let transport = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.handle_stream(send, recv, handler).await {
                    tracing::warn!("Request from {} failed: {}", remote, e);
                    transport.stats.write().failures += 1;
                }
            });
        }
    }

    async fn handle_stream(
        &self,
        mut send: SendStream,
        mut recv: RecvStream,
        handler: Arc<SyncHandler>,
    ) -> NetworkResult<()> {
        let frame = recv.read_to_end(self.config.max_frame_size).await?;

        let response = match codec::decode_frame::<Request>(&frame) {
            Ok(request) => handler.handle(request).await,
            Err(e) => Response::Failed {
                reason: e.to_string(),
            },
        };

        let response_frame = codec::encode_frame(&response)?;
        send.write_all(&response_frame).await?;
        send.finish()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        let mut stats = self.stats.write();
        stats.requests_served += 1;
        stats.total_bytes_received += frame.len() as u64;
        stats.total_bytes_sent += response_frame.len() as u64;
        Ok(())
    }

    /// Get local address
    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        self.endpoint.local_addr().map_err(NetworkError::IoError)
    }

    /// Get network statistics
    pub fn stats(&self) -> NetworkStats {
        self.stats.read().clone()
    }

    /// Close all connections and stop accepting new ones
    pub fn close(&self) {
        for entry in self.connections.iter() {
            entry.value().close(0u32.into(), b"closing");
        }
        self.connections.clear();
        self.endpoint.close(0u32.into(), b"shutdown");
    }
}

#[async_trait]
impl SyncTransport for QuicTransport {
    async fn request(&self, peer: &PeerAddress, request: Request) -> NetworkResult<Response> {
        let frame = codec::encode_frame(&request)?;
        let timeout = self.config.request_timeout;

        let response_frame = match tokio::time::timeout(timeout, self.exchange(peer.addr, &frame)).await {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                self.stats.write().failures += 1;
                // Drop a connection that may be broken
                self.connections.remove(&peer.addr);
                return Err(e);
            }
            Err(_) => {
                self.stats.write().failures += 1;
                return Err(NetworkError::Timeout(timeout));
            }
        };

        {
            let mut stats = self.stats.write();
            stats.requests_sent += 1;
            stats.total_bytes_sent += frame.len() as u64;
            stats.total_bytes_received += response_frame.len() as u64;
        }

        Ok(codec::decode_frame(&response_frame)?)
    }
}

impl Drop for QuicTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// Certificate verifier that accepts any certificate (INSECURE)
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputePool;
    use crate::protocol::{CopyRequest, InfoRequest, InfoStatus};
    use crate::replication::{LocalResponsibilityTracker, StaticPeerDirectory};
    use crate::storage::{Id160, MemoryStorage, StorageKey};
    use std::time::Duration;

    // Initialize crypto provider once for all tests
    fn init_crypto() {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
    }

    fn loopback_config() -> ConnectionConfig {
        ConnectionConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            request_timeout: Duration::from_secs(5),
            insecure_skip_verify: true,
            ..Default::default()
        }
    }

    fn test_handler(local: PeerAddress) -> Arc<SyncHandler> {
        let tracker = Arc::new(LocalResponsibilityTracker::new(Arc::new(
            StaticPeerDirectory::new(local),
        )));
        Arc::new(SyncHandler::new(
            Arc::new(MemoryStorage::new()),
            tracker,
            ComputePool::new(1),
            6,
        ))
    }

    #[tokio::test]
    async fn test_create_transport() {
        init_crypto();
        let transport = QuicTransport::new(loopback_config()).await.unwrap();
        assert!(transport.local_addr().is_ok());
        assert_eq!(transport.stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_request_over_loopback() {
        init_crypto();
        let server = Arc::new(QuicTransport::new(loopback_config()).await.unwrap());
        let server_peer = PeerAddress::new(Id160::from_u64(2), server.local_addr().unwrap());
        tokio::spawn(server.clone().serve(test_handler(server_peer.clone())));

        let client = QuicTransport::new(loopback_config()).await.unwrap();
        let key = StorageKey::new(Id160::from_u64(1), Id160::ZERO, Id160::ZERO);

        let response = client
            .request(&server_peer, Request::Info(InfoRequest::new(key, b"Lugano")))
            .await
            .unwrap();
        assert!(matches!(response, Response::Info(ref i) if i.status == InfoStatus::NotFound));

        let response = client
            .request(
                &server_peer,
                Request::Copy(CopyRequest::single(key, b"Lugano".to_vec())),
            )
            .await
            .unwrap();
        assert!(matches!(response, Response::CopyAck { stored: 1 }));

        // Second exchange reuses the cached connection
        let response = client
            .request(&server_peer, Request::Info(InfoRequest::new(key, b"Lugano")))
            .await
            .unwrap();
        assert!(matches!(response, Response::Info(ref i) if i.status == InfoStatus::Ok));

        let stats = client.stats();
        assert_eq!(stats.requests_sent, 3);
        assert_eq!(stats.active_connections, 1);
    }

    #[tokio::test]
    async fn test_unreachable_peer_times_out() {
        init_crypto();
        let mut config = loopback_config();
        config.request_timeout = Duration::from_millis(300);
        let client = QuicTransport::new(config).await.unwrap();

        // Bound but never answering
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = PeerAddress::new(Id160::from_u64(9), silent.local_addr().unwrap());

        let key = StorageKey::new(Id160::from_u64(1), Id160::ZERO, Id160::ZERO);
        let result = client
            .request(&peer, Request::Info(InfoRequest::new(key, b"x")))
            .await;
        assert!(matches!(result, Err(NetworkError::Timeout(_))));
        assert_eq!(client.stats().failures, 1);
    }
}
