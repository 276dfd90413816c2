//! Reverse Proxy ACME는 도메인별 백엔드로 요청을 전달하면서 TLS 인증서를 자동으로 발급/갱신하는 리버스 프록시입니다.
//!
//! # 주요 기능
//!
//! - `Host` 헤더 기반 라우팅 (도메인당 백엔드 하나)
//! - ACME HTTP-01 챌린지를 통한 인증서 자동 발급, 디스크 캐시, 만료 전 갱신
//! - 평문 리스너 모드: 챌린지 응답 또는 HTTPS 리다이렉트
//! - 스트리밍 리버스 프록시
//!
//! # 예제
//!
//! ```
//! use reverse_proxy_acme::registry::BackendRegistry;
//! use std::collections::HashMap;
//!
//! let env: HashMap<&str, &str> = HashMap::from([
//!     ("WWW_BACKEND", "http://127.0.0.1:8080"),
//!     ("API_BACKEND", "http://127.0.0.1:9090"),
//! ]);
//!
//! let domains = vec!["www.example.com".to_string(), "api.example.com".to_string()];
//! let mut registry = BackendRegistry::new();
//! registry
//!     .initialize(&domains, |key| env.get(key).map(|v| v.to_string()))
//!     .unwrap();
//!
//! let backend = registry.lookup("api.example.com").unwrap();
//! assert_eq!(backend.url.as_str(), "http://127.0.0.1:9090/");
//! assert!(registry.lookup("unknown.example.com").is_none());
//! ```

pub mod logging;
pub mod proxy;
pub mod tls;
pub mod cert;
pub mod registry;
pub mod server;
pub mod settings;
