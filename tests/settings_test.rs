use reverse_proxy_acme::settings::{
    logging::{LogFormat, LogOutput},
    HttpMode, Settings, SettingsError, LETS_ENCRYPT_PRODUCTION,
};
use std::path::PathBuf;
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;  // 환경 변수를 공유하므로 순차 실행

    const ENV_VARS: [&str; 15] = [
        "DOMAINS",
        "PROXY_BIND_ADDR",
        "PROXY_HTTP_PORT",
        "PROXY_HTTPS_PORT",
        "PROXY_HTTP_MODE",
        "PROXY_UPSTREAM_TIMEOUT",
        "CERT_CACHE_DIR",
        "ACME_DIRECTORY_URL",
        "ACME_CONTACT_EMAIL",
        "ACME_RENEW_BEFORE_DAYS",
        "ACME_ISSUANCE_TIMEOUT",
        "PROXY_LOG_FORMAT",
        "PROXY_LOG_LEVEL",
        "PROXY_LOG_OUTPUT",
        "WWW_BACKEND",
    ];

    // 테스트 전후 환경변수 초기화를 위한 헬퍼 함수
    fn cleanup_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    fn assert_invalid(result: Result<Settings, SettingsError>, expected_var: &str) {
        match result {
            Err(SettingsError::EnvVarInvalid { var_name, .. }) => {
                assert!(var_name.contains(expected_var), "{} != {}", var_name, expected_var);
            }
            other => panic!("{} 오류를 기대했지만: {:?}", expected_var, other),
        }
    }

    #[test]
    #[serial]
    fn test_settings_defaults() {
        cleanup_env();
        std::env::set_var("DOMAINS", "www.example.com");

        let settings = Settings::from_env().unwrap();

        assert_eq!(settings.server.http_port, 80);
        assert_eq!(settings.server.https_port, 443);
        assert_eq!(settings.server.bind_addr.to_string(), "0.0.0.0");
        assert_eq!(settings.server.http_mode, HttpMode::Challenge);
        assert_eq!(settings.server.upstream_timeout, Duration::from_secs(30));
        assert_eq!(settings.acme.cache_dir, PathBuf::from("certs"));
        assert_eq!(settings.acme.directory_url, LETS_ENCRYPT_PRODUCTION);
        assert_eq!(settings.acme.contact(), None);
        assert_eq!(settings.acme.renew_before_days, 30);
        assert_eq!(settings.acme.issuance_timeout, Duration::from_secs(120));
        assert_eq!(settings.logging.level, tracing::Level::INFO);
        assert_eq!(settings.logging.format, LogFormat::Text);
        assert_eq!(settings.logging.output, LogOutput::Stdout);
        assert_eq!(settings.backends.domains, vec!["www.example.com"]);
        assert!(settings.validate().is_ok());

        cleanup_env();
    }

    #[test]
    #[serial]
    fn test_settings_from_env() {
        cleanup_env();
        std::env::set_var("DOMAINS", "WWW.example.com, api.example.com");
        std::env::set_var("PROXY_BIND_ADDR", "127.0.0.1");
        std::env::set_var("PROXY_HTTP_PORT", "8080");
        std::env::set_var("PROXY_HTTPS_PORT", "8443");
        std::env::set_var("PROXY_HTTP_MODE", "redirect");
        std::env::set_var("PROXY_UPSTREAM_TIMEOUT", "5");
        std::env::set_var("CERT_CACHE_DIR", "/tmp/proxy-certs");
        std::env::set_var("ACME_DIRECTORY_URL", "https://acme-staging-v02.api.letsencrypt.org/directory");
        std::env::set_var("ACME_CONTACT_EMAIL", "ops@example.com");
        std::env::set_var("ACME_RENEW_BEFORE_DAYS", "14");
        std::env::set_var("ACME_ISSUANCE_TIMEOUT", "45");
        std::env::set_var("PROXY_LOG_FORMAT", "json");
        std::env::set_var("PROXY_LOG_LEVEL", "debug");
        std::env::set_var("PROXY_LOG_OUTPUT", "/tmp/proxy.log");

        let settings = Settings::from_env().unwrap();

        assert_eq!(settings.backends.domains, vec!["www.example.com", "api.example.com"]);
        assert_eq!(settings.server.bind_addr.to_string(), "127.0.0.1");
        assert_eq!(settings.server.http_port, 8080);
        assert_eq!(settings.server.https_port, 8443);
        assert_eq!(settings.server.http_mode, HttpMode::Redirect);
        assert_eq!(settings.server.upstream_timeout, Duration::from_secs(5));
        assert_eq!(settings.acme.cache_dir, PathBuf::from("/tmp/proxy-certs"));
        assert_eq!(settings.acme.contact().as_deref(), Some("mailto:ops@example.com"));
        assert_eq!(settings.acme.renew_before_days, 14);
        assert_eq!(settings.acme.issuance_timeout, Duration::from_secs(45));
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.logging.level, tracing::Level::DEBUG);
        assert_eq!(settings.logging.output, LogOutput::File(PathBuf::from("/tmp/proxy.log")));

        cleanup_env();
    }

    #[test]
    #[serial]
    fn test_missing_domains() {
        cleanup_env();

        match Settings::from_env() {
            Err(SettingsError::EnvVarMissing { var_name }) => assert_eq!(var_name, "DOMAINS"),
            other => panic!("DOMAINS 누락 오류를 기대했지만: {:?}", other),
        }

        std::env::set_var("DOMAINS", "a.example.com,,b.example.com");
        assert_invalid(Settings::from_env(), "DOMAINS");

        cleanup_env();
    }

    #[test]
    #[serial]
    fn test_settings_validation() {
        cleanup_env();
        std::env::set_var("DOMAINS", "www.example.com");

        // 1. 잘못된 포트 번호
        std::env::set_var("PROXY_HTTP_PORT", "99999");
        assert_invalid(Settings::from_env(), "PROXY_HTTP_PORT");
        std::env::remove_var("PROXY_HTTP_PORT");

        // 2. 포트 충돌
        std::env::set_var("PROXY_HTTP_PORT", "8443");
        std::env::set_var("PROXY_HTTPS_PORT", "8443");
        assert_invalid(Settings::from_env(), "PROXY_HTTPS_PORT");
        std::env::remove_var("PROXY_HTTP_PORT");
        std::env::remove_var("PROXY_HTTPS_PORT");

        // 3. 알 수 없는 평문 리스너 모드
        std::env::set_var("PROXY_HTTP_MODE", "passthrough");
        assert_invalid(Settings::from_env(), "PROXY_HTTP_MODE");
        std::env::remove_var("PROXY_HTTP_MODE");

        // 4. 잘못된 로그 레벨
        std::env::set_var("PROXY_LOG_LEVEL", "invalid_level");
        assert_invalid(Settings::from_env(), "PROXY_LOG_LEVEL");
        std::env::remove_var("PROXY_LOG_LEVEL");

        // 5. 갱신 구간 범위 초과
        std::env::set_var("ACME_RENEW_BEFORE_DAYS", "90");
        assert_invalid(Settings::from_env(), "ACME_RENEW_BEFORE_DAYS");
        std::env::remove_var("ACME_RENEW_BEFORE_DAYS");

        // 6. 타임아웃 0
        std::env::set_var("PROXY_UPSTREAM_TIMEOUT", "0");
        assert_invalid(Settings::from_env(), "PROXY_UPSTREAM_TIMEOUT");
        std::env::remove_var("PROXY_UPSTREAM_TIMEOUT");

        std::env::set_var("ACME_ISSUANCE_TIMEOUT", "0");
        assert_invalid(Settings::from_env(), "ACME_ISSUANCE_TIMEOUT");

        cleanup_env();
    }

    #[test]
    #[serial]
    fn test_cache_dir_must_not_be_a_file() {
        cleanup_env();
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not_a_dir");
        std::fs::write(&file_path, "x").unwrap();

        std::env::set_var("DOMAINS", "www.example.com");
        std::env::set_var("CERT_CACHE_DIR", &file_path);

        assert!(matches!(Settings::from_env(), Err(SettingsError::FileError { .. })));

        cleanup_env();
    }
}
