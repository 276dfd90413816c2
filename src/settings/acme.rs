use std::{env, path::PathBuf, time::Duration};
use super::{server::parse_env_var, SettingsError};

pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

#[derive(Debug, Clone)]
pub struct AcmeSettings {
    /// 발급된 인증서와 계정 정보를 저장하는 디렉터리
    pub cache_dir: PathBuf,

    /// ACME 디렉터리 URL
    pub directory_url: String,

    /// 계정 연락처 이메일 (선택)
    pub contact_email: Option<String>,

    /// 만료 며칠 전부터 갱신할지
    pub renew_before_days: u32,

    /// 발급 한 번(계정 생성부터 인증서 다운로드까지)에 허용하는 시간
    pub issuance_timeout: Duration,
}

impl AcmeSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let timeout_secs: u64 = parse_env_var("ACME_ISSUANCE_TIMEOUT", default_issuance_timeout_secs)?;

        let settings = Self {
            cache_dir: env::var("CERT_CACHE_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
            directory_url: env::var("ACME_DIRECTORY_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| LETS_ENCRYPT_PRODUCTION.to_string()),
            contact_email: env::var("ACME_CONTACT_EMAIL")
                .ok()
                .map(|email| email.trim().to_string())
                .filter(|email| !email.is_empty()),
            renew_before_days: parse_env_var("ACME_RENEW_BEFORE_DAYS", default_renew_before_days)?,
            issuance_timeout: Duration::from_secs(timeout_secs),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if url::Url::parse(&self.directory_url).is_err() {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "ACME_DIRECTORY_URL".to_string(),
                value: self.directory_url.clone(),
                reason: "유효한 URL이 아닙니다".to_string(),
            });
        }

        if self.renew_before_days == 0 || self.renew_before_days > 60 {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "ACME_RENEW_BEFORE_DAYS".to_string(),
                value: self.renew_before_days.to_string(),
                reason: "1-60 범위여야 합니다".to_string(),
            });
        }

        if self.issuance_timeout.is_zero() {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "ACME_ISSUANCE_TIMEOUT".to_string(),
                value: "0".to_string(),
                reason: "0보다 커야 합니다".to_string(),
            });
        }

        if self.cache_dir.is_file() {
            return Err(SettingsError::FileError {
                path: self.cache_dir.to_string_lossy().to_string(),
                error: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "인증서 캐시 경로가 디렉터리가 아닙니다",
                ),
            });
        }

        Ok(())
    }

    /// 연락처를 ACME `mailto:` 형식으로 반환합니다.
    pub fn contact(&self) -> Option<String> {
        self.contact_email.as_ref().map(|email| format!("mailto:{}", email))
    }
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            directory_url: LETS_ENCRYPT_PRODUCTION.to_string(),
            contact_email: None,
            renew_before_days: default_renew_before_days(),
            issuance_timeout: Duration::from_secs(default_issuance_timeout_secs()),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_renew_before_days() -> u32 {
    30
}

fn default_issuance_timeout_secs() -> u64 {
    120
}
