use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tracing::debug;

use crate::cert::{CertError, CertificateSource};

const CLIENT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);

// 핸드셰이크마다 이미 고른 인증서 하나만 돌려주는 resolver
struct ResolvedCert(Arc<CertifiedKey>);

impl ResolvesServerCert for ResolvedCert {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

/// SNI 이름으로 인증서를 골라 TLS 핸드셰이크를 완료합니다.
///
/// ClientHello를 먼저 읽어 서버 이름을 확인하고, 허용 목록에 없으면 인증서를 요청하지 않고 연결을 끊습니다.
#[derive(Clone)]
pub struct SniAcceptor {
    source: Arc<dyn CertificateSource>,
}

impl SniAcceptor {
    pub fn new(source: Arc<dyn CertificateSource>) -> Self {
        Self { source }
    }

    pub async fn accept<IO>(&self, stream: IO) -> Result<TlsStream<IO>, CertError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let start = tokio::time::timeout(
            CLIENT_HELLO_TIMEOUT,
            LazyConfigAcceptor::new(Acceptor::default(), stream),
        )
        .await
        .map_err(|_| CertError::Handshake(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "ClientHello 수신 시간 초과",
        )))?
        .map_err(CertError::Handshake)?;

        let server_name = start
            .client_hello()
            .server_name()
            .map(|name| name.trim_end_matches('.').to_lowercase())
            .ok_or(CertError::MissingServerName)?;

        if !self.source.is_allowed(&server_name) {
            return Err(CertError::NotAllowed(server_name));
        }

        let certified_key = self.source.certificate_for(&server_name).await?;
        debug!(server_name = %server_name, "인증서 선택 완료");

        start
            .into_stream(Self::server_config(certified_key))
            .await
            .map_err(CertError::Handshake)
    }

    fn server_config(certified_key: Arc<CertifiedKey>) -> Arc<ServerConfig> {
        let mut config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(ResolvedCert(certified_key)));
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Arc::new(config)
    }
}
