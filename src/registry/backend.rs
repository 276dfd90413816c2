use std::fmt;
use hyper::http::uri::Authority;
use url::Url;

use crate::registry::error::RegistryError;

/// 도메인 하나에 연결된 백엔드 정보입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEntry {
    pub domain: String,
    pub url: Url,
    authority: Authority,
}

impl BackendEntry {
    /// 백엔드 기본 URL을 검증해서 엔트리를 만듭니다.
    ///
    /// 포워딩 클라이언트가 평문 HTTP만 사용하므로 `http` 스킴만 허용합니다.
    pub fn parse(domain: &str, value: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidBackendUrl {
            domain: domain.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(value.trim()).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "http" {
            return Err(invalid("http 스킴만 지원합니다"));
        }
        let host = url.host_str().ok_or_else(|| invalid("호스트가 없습니다"))?;

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let authority = authority.parse::<Authority>()
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            domain: domain.to_string(),
            url,
            authority,
        })
    }

    /// 프록시 요청의 Host 헤더로 쓰이는 `host[:port]` 값
    pub fn authority(&self) -> &Authority {
        &self.authority
    }
}

impl fmt::Display for BackendEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
