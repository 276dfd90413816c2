use std::collections::HashMap;
use hyper::header;
use tracing::{debug, info, warn};

use crate::registry::{BackendEntry, RegistryError, RoutingError};

/// 도메인 첫 라벨에 붙는 환경 변수 접미사
pub const BACKEND_KEY_SUFFIX: &str = "_BACKEND";

/// 도메인에서 백엔드 환경 변수 이름을 만듭니다.
///
/// ```
/// use reverse_proxy_acme::registry::backend_env_key;
///
/// assert_eq!(backend_env_key("www.example.com"), "WWW_BACKEND");
/// ```
pub fn backend_env_key(domain: &str) -> String {
    let label = domain.split('.').next().unwrap_or(domain);
    format!("{}{}", label.to_uppercase(), BACKEND_KEY_SUFFIX)
}

/// 도메인 → 백엔드 매핑입니다.
///
/// 시작 시 한 번 채워진 뒤에는 변경되지 않으므로 `Arc`로 공유해 잠금 없이 읽습니다.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    entries: HashMap<String, BackendEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 도메인 목록과 환경 변수 조회 함수로 레지스트리를 채웁니다.
    ///
    /// 이미 채워져 있으면 아무것도 하지 않습니다. 실패하면 레지스트리는 비어 있는 상태로 남습니다.
    pub fn initialize<F>(&mut self, domains: &[String], lookup: F) -> Result<(), RegistryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.entries.is_empty() {
            debug!(count = self.entries.len(), "레지스트리가 이미 초기화됨");
            return Ok(());
        }

        if domains.is_empty() {
            return Err(RegistryError::NoDomains);
        }

        let mut entries = HashMap::with_capacity(domains.len());
        let mut seen_keys: HashMap<String, String> = HashMap::new();

        for domain in domains {
            let domain = domain.trim().to_lowercase();
            if domain.is_empty() {
                return Err(RegistryError::EmptyDomain);
            }

            let var_name = backend_env_key(&domain);
            let value = lookup(&var_name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| RegistryError::MissingBackend {
                    domain: domain.clone(),
                    var_name: var_name.clone(),
                })?;

            if let Some(other) = seen_keys.get(&var_name) {
                warn!(
                    domain = %domain,
                    other_domain = %other,
                    var_name = %var_name,
                    "두 도메인이 같은 백엔드 환경 변수를 공유함"
                );
            }

            let entry = BackendEntry::parse(&domain, &value)?;
            info!(domain = %domain, backend = %entry, "백엔드 등록");
            seen_keys.entry(var_name).or_insert_with(|| domain.clone());
            entries.insert(domain, entry);
        }

        self.entries = entries;
        Ok(())
    }

    /// 프로세스 환경 변수에서 바로 레지스트리를 만듭니다.
    pub fn from_env(domains: &[String]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.initialize(domains, |key| std::env::var(key).ok())?;
        Ok(registry)
    }

    /// Host 값과 정확히 일치하는 백엔드를 찾습니다. 포트 제거나 대소문자 변환은 하지 않습니다.
    pub fn lookup(&self, host: &str) -> Option<&BackendEntry> {
        self.entries.get(host)
    }

    /// HTTP 요청의 Host로 백엔드를 찾습니다.
    pub fn route_request<B>(&self, req: &hyper::Request<B>) -> Result<&BackendEntry, RoutingError> {
        let host = Self::extract_host(req)?;

        match self.lookup(&host) {
            Some(entry) => {
                debug!(host = %host, backend = %entry, "백엔드 서비스 찾음");
                Ok(entry)
            }
            None => {
                warn!(
                    host = %host,
                    available_domains = ?self.domains(),
                    "백엔드 서비스를 찾을 수 없음"
                );
                Err(RoutingError::BackendNotFound { host })
            }
        }
    }

    /// 요청의 Host 헤더 값을 그대로 꺼냅니다. 헤더가 없으면 절대 형식 URI의 authority를 씁니다.
    pub fn extract_host<B>(req: &hyper::Request<B>) -> Result<String, RoutingError> {
        match req.headers().get(header::HOST) {
            Some(value) => value
                .to_str()
                .map(|host| host.to_string())
                .map_err(|e| RoutingError::HeaderParseError {
                    header_name: "Host".to_string(),
                    error: e.to_string(),
                }),
            None => req
                .uri()
                .authority()
                .map(|authority| authority.to_string())
                .ok_or(RoutingError::MissingHost),
        }
    }

    /// 등록된 도메인 목록 (정렬됨)
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.entries.keys().cloned().collect();
        domains.sort();
        domains
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
