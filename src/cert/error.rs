use std::fmt;
use std::time::Duration;

/// 인증서 조회/발급 중 발생하는 에러입니다. 실패한 도메인의 핸드셰이크에만 영향을 줍니다.
#[derive(Debug)]
pub enum CertError {
    /// ClientHello에 SNI가 없음
    MissingServerName,
    /// 허용 목록에 없는 도메인
    NotAllowed(String),
    /// ACME 프로토콜 에러
    Acme {
        domain: String,
        reason: String,
    },
    /// 캐시 디렉터리 입출력 에러
    Cache {
        path: String,
        error: std::io::Error,
    },
    /// 인증서/키 PEM을 해석할 수 없음
    InvalidCertificate(String),
    /// 직전 발급 실패로 재시도 대기 중
    Backoff {
        domain: String,
        retry_after: Duration,
    },
    /// TLS 핸드셰이크 입출력 에러
    Handshake(std::io::Error),
}

impl CertError {
    pub(crate) fn acme(domain: &str, reason: impl fmt::Display) -> Self {
        CertError::Acme {
            domain: domain.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for CertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertError::MissingServerName =>
                write!(f, "ClientHello에 서버 이름(SNI)이 없음"),
            CertError::NotAllowed(name) =>
                write!(f, "허용되지 않은 도메인: {}", name),
            CertError::Acme { domain, reason } =>
                write!(f, "도메인 {} 인증서 발급 실패: {}", domain, reason),
            CertError::Cache { path, error } =>
                write!(f, "인증서 캐시 {} 오류: {}", path, error),
            CertError::InvalidCertificate(reason) =>
                write!(f, "잘못된 인증서: {}", reason),
            CertError::Backoff { domain, retry_after } =>
                write!(f, "도메인 {} 발급 재시도 대기 중 ({}초 후)", domain, retry_after.as_secs()),
            CertError::Handshake(e) =>
                write!(f, "TLS 핸드셰이크 실패: {}", e),
        }
    }
}

impl std::error::Error for CertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CertError::Cache { error, .. } => Some(error),
            CertError::Handshake(e) => Some(e),
            _ => None,
        }
    }
}
