//! gRPC probe
//!
//! Dials the target and performs one of three checks:
//!
//! - **connectivity**: the channel must become ready within the deadline
//! - **health**: the standard `grpc.health.v1.Health/Check` RPC must
//!   report `SERVING` for the configured service name (empty = overall)
//! - **reflection**: degrades to a connectivity check
//!
//! TLS targets are verified against native roots; with `insecure_tls`
//! the handshake runs through a verifier that accepts any certificate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Uri};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::trace;

use super::Probe;
use crate::model::{GrpcCheckType, GrpcConfig};

/// Probe for gRPC services
pub struct GrpcProbe {
    config: GrpcConfig,
}

impl GrpcProbe {
    pub fn new(config: GrpcConfig) -> Self {
        Self { config }
    }

    /// Dial the target; a returned channel is ready for RPCs
    async fn connect(&self, deadline: Duration) -> Result<Channel> {
        if self.config.tls && self.config.insecure_tls {
            return self.connect_insecure(deadline).await;
        }

        let scheme = if self.config.tls { "https" } else { "http" };
        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{}", self.config.endpoint))
            .with_context(|| format!("invalid grpc endpoint {:?}", self.config.endpoint))?
            .connect_timeout(deadline)
            .timeout(deadline);

        if self.config.tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .context("failed to build tls config")?;
        }

        endpoint
            .connect()
            .await
            .with_context(|| format!("failed to connect to {}", self.config.endpoint))
    }

    /// TLS dial that skips certificate verification
    async fn connect_insecure(&self, deadline: Duration) -> Result<Channel> {
        let addr = self.config.endpoint.clone();
        let host = addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| addr.clone());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .context("failed to build tls config")?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerification))
            .with_no_client_auth();
        tls.alpn_protocols = vec![b"h2".to_vec()];
        let connector = tokio_rustls::TlsConnector::from(Arc::new(tls));

        let endpoint = Endpoint::from_shared(format!("https://{addr}"))
            .with_context(|| format!("invalid grpc endpoint {addr:?}"))?
            .connect_timeout(deadline)
            .timeout(deadline);

        endpoint
            .connect_with_connector(tower::service_fn(move |_: Uri| {
                let connector = connector.clone();
                let addr = addr.clone();
                let host = host.clone();
                async move {
                    let tcp = TcpStream::connect(addr.as_str()).await?;
                    let domain = rustls::pki_types::ServerName::try_from(host)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                    let stream = connector.connect(domain, tcp).await?;
                    Ok::<_, std::io::Error>(TokioIo::new(stream))
                }
            }))
            .await
            .with_context(|| format!("failed to connect to {}", self.config.endpoint))
    }

    async fn run(&self, deadline: Duration) -> Result<()> {
        let channel = self.connect(deadline).await?;

        match self.config.check_type {
            // reflection is served over any ready channel on conforming
            // servers, so readiness is the check for both
            GrpcCheckType::Connectivity | GrpcCheckType::Reflection => {
                trace!("channel to {} is ready", self.config.endpoint);
                Ok(())
            }
            GrpcCheckType::Health => {
                let service = self.config.service_name.clone().unwrap_or_default();
                let mut client = HealthClient::new(channel);
                let response = client
                    .check(HealthCheckRequest {
                        service: service.clone(),
                    })
                    .await
                    .context("health check rpc failed")?;

                let status = response.into_inner().status();
                if status != ServingStatus::Serving {
                    bail!("health check for {service:?} reported {status:?}");
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Probe for GrpcProbe {
    async fn check(&self, deadline: Duration) -> Result<()> {
        timeout(deadline, self.run(deadline))
            .await
            .with_context(|| format!("grpc check of {} timed out", self.config.endpoint))?
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Verifier that accepts any server certificate
    #[derive(Debug)]
    pub(super) struct NoVerification;

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
