use tracing::debug;

mod server;
pub mod logging;
mod acme;
mod backends;
mod error;

pub use server::{HttpMode, ServerSettings};
pub use logging::LogSettings;
pub use acme::{AcmeSettings, LETS_ENCRYPT_PRODUCTION};
pub use backends::{parse_domains, BackendSettings};
pub use error::SettingsError;

pub type Result<T> = std::result::Result<T, SettingsError>;
pub use server::parse_env_var;

/// 프로세스 시작 시 환경 변수에서 한 번 읽는 전체 설정입니다.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    // 리스너 설정
    pub server: ServerSettings,

    // 인증서 발급/캐시 설정
    pub acme: AcmeSettings,

    // 도메인 목록
    pub backends: BackendSettings,

    // 로깅 설정
    pub logging: LogSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            server: ServerSettings::from_env()?,
            acme: AcmeSettings::from_env()?,
            backends: BackendSettings::from_env()?,
            logging: LogSettings::from_env()?,
        };

        debug!(
            domains = ?settings.backends.domains,
            http_mode = ?settings.server.http_mode,
            cache_dir = %settings.acme.cache_dir.display(),
            "설정 로드 완료"
        );
        Ok(settings)
    }

    /// 설정 유효성 검증
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.acme.validate()?;
        if self.backends.domains.is_empty() {
            return Err(SettingsError::EnvVarMissing {
                var_name: "DOMAINS".to_string(),
            });
        }
        Ok(())
    }
}
