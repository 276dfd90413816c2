use std::fmt;

/// 요청 라우팅 중 발생하는 에러입니다.
#[derive(Debug, PartialEq)]
pub enum RoutingError {
    /// Host 헤더 누락
    MissingHost,
    /// 헤더 파싱 에러
    HeaderParseError {
        header_name: String,
        error: String,
    },
    /// 백엔드 서비스를 찾을 수 없음
    BackendNotFound {
        host: String,
    },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::MissingHost =>
                write!(f, "Host 헤더가 누락됨"),
            RoutingError::HeaderParseError { header_name, error } =>
                write!(f, "{} 헤더 파싱 실패: {}", header_name, error),
            // 클라이언트에게 그대로 노출되는 메시지
            RoutingError::BackendNotFound { host } =>
                write!(f, "backend URL for host {} not found", host),
        }
    }
}

impl std::error::Error for RoutingError {}

/// 레지스트리 초기화 에러입니다. 모두 시작 단계에서 치명적입니다.
#[derive(Debug, PartialEq)]
pub enum RegistryError {
    NoDomains,
    EmptyDomain,
    MissingBackend {
        domain: String,
        var_name: String,
    },
    InvalidBackendUrl {
        domain: String,
        value: String,
        reason: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NoDomains =>
                write!(f, "설정된 도메인이 없습니다 (DOMAINS)"),
            RegistryError::EmptyDomain =>
                write!(f, "빈 도메인 이름이 포함되어 있습니다"),
            RegistryError::MissingBackend { domain, var_name } =>
                write!(f, "도메인 {}의 백엔드 URL이 정의되지 않음. 필요한 환경 변수: {}", domain, var_name),
            RegistryError::InvalidBackendUrl { domain, value, reason } =>
                write!(f, "도메인 {}의 백엔드 URL {} 오류: {}", domain, value, reason),
        }
    }
}

impl std::error::Error for RegistryError {}
