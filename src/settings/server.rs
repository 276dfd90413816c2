use std::env;
use std::net::IpAddr;
use std::time::Duration;
use super::SettingsError;

/// 평문(80) 리스너가 동작하는 방식입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    /// ACME HTTP-01 챌린지에 응답하고 나머지 경로는 404
    Challenge,
    /// 모든 요청을 같은 호스트의 HTTPS 주소로 301 리다이렉트
    Redirect,
}

impl Default for HttpMode {
    fn default() -> Self {
        HttpMode::Challenge
    }
}

impl std::str::FromStr for HttpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "challenge" => Ok(HttpMode::Challenge),
            "redirect" => Ok(HttpMode::Redirect),
            _ => Err(format!("지원하지 않는 HTTP 모드: {} (challenge 또는 redirect)", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// 리스너 바인딩 주소 (기본값: 0.0.0.0)
    pub bind_addr: IpAddr,

    /// 평문 HTTP 포트 (기본값: 80)
    pub http_port: u16,

    /// HTTPS 포트 (기본값: 443)
    pub https_port: u16,

    /// 평문 리스너 모드
    pub http_mode: HttpMode,

    /// 백엔드 응답 헤더 대기 시간
    pub upstream_timeout: Duration,
}

fn default_bind_addr() -> IpAddr { IpAddr::from([0, 0, 0, 0]) }
fn default_http_port() -> u16 { 80 }
fn default_https_port() -> u16 { 443 }
fn default_upstream_timeout_secs() -> u64 { 30 }

pub fn parse_env_var<T: std::str::FromStr, F: FnOnce() -> T>(name: &str, default: F) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: val,
            reason: e.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default()),
        Err(e) => Err(SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: "".to_string(),
            reason: e.to_string(),
        }),
    }
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let timeout_secs: u64 = parse_env_var("PROXY_UPSTREAM_TIMEOUT", default_upstream_timeout_secs)?;

        let settings = Self {
            bind_addr: parse_env_var("PROXY_BIND_ADDR", default_bind_addr)?,
            http_port: parse_env_var("PROXY_HTTP_PORT", default_http_port)?,
            https_port: parse_env_var("PROXY_HTTPS_PORT", default_https_port)?,
            http_mode: parse_env_var("PROXY_HTTP_MODE", HttpMode::default)?,
            upstream_timeout: Duration::from_secs(timeout_secs),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.http_port == 0 || self.https_port == 0 {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_HTTP_PORT/PROXY_HTTPS_PORT".to_string(),
                value: format!("{}/{}", self.http_port, self.https_port),
                reason: "포트는 0이 될 수 없습니다".to_string(),
            });
        }

        // HTTP/HTTPS 포트 충돌 검사
        if self.http_port == self.https_port {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_HTTP_PORT/PROXY_HTTPS_PORT".to_string(),
                value: format!("{}/{}", self.http_port, self.https_port),
                reason: "HTTP와 HTTPS 포트는 달라야 합니다".to_string(),
            });
        }

        if self.upstream_timeout.is_zero() {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_UPSTREAM_TIMEOUT".to_string(),
                value: "0".to_string(),
                reason: "타임아웃은 1초 이상이어야 합니다".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            http_mode: HttpMode::default(),
            upstream_timeout: Duration::from_secs(default_upstream_timeout_secs()),
        }
    }
}
