use std::env;
use super::SettingsError;

/// `DOMAINS` 환경 변수에서 읽은 도메인 목록입니다.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub domains: Vec<String>,
}

impl BackendSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let raw = match env::var("DOMAINS") {
            Ok(value) => value,
            Err(env::VarError::NotPresent) => {
                return Err(SettingsError::EnvVarMissing {
                    var_name: "DOMAINS".to_string(),
                });
            }
            Err(e) => {
                return Err(SettingsError::EnvVarInvalid {
                    var_name: "DOMAINS".to_string(),
                    value: "".to_string(),
                    reason: e.to_string(),
                });
            }
        };

        Ok(Self {
            domains: parse_domains(&raw)?,
        })
    }
}

/// 쉼표로 구분된 도메인 목록을 정규화합니다 (공백 제거, 소문자, 중복 제거).
///
/// 빈 항목은 건너뛰지 않고 오류로 처리합니다.
pub fn parse_domains(raw: &str) -> Result<Vec<String>, SettingsError> {
    if raw.trim().is_empty() {
        return Err(SettingsError::EnvVarMissing {
            var_name: "DOMAINS".to_string(),
        });
    }

    let mut domains: Vec<String> = Vec::new();
    for entry in raw.split(',') {
        let domain = entry.trim().to_lowercase();
        if domain.is_empty() {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "DOMAINS".to_string(),
                value: raw.to_string(),
                reason: "빈 도메인 항목이 있습니다".to_string(),
            });
        }
        if !domains.contains(&domain) {
            domains.push(domain);
        }
    }

    Ok(domains)
}
