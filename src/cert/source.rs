use std::sync::Arc;
use async_trait::async_trait;
use tokio_rustls::rustls::sign::CertifiedKey;

use super::CertError;

/// TLS 리스너가 사용하는 인증서 공급자 인터페이스입니다.
///
/// 구현체는 자체적으로 캐시와 동시 발급 중복 제거를 책임집니다.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// 이 서버 이름에 대해 인증서를 발급할 수 있는지
    fn is_allowed(&self, server_name: &str) -> bool;

    /// 캐시된 인증서를 돌려주거나, 없으면 발급합니다.
    async fn certificate_for(&self, server_name: &str) -> Result<Arc<CertifiedKey>, CertError>;
}
