use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::fs;
use tokio_rustls::rustls::{self, sign::CertifiedKey, Certificate, PrivateKey};
use tracing::{debug, info};

use super::CertError;

const ACCOUNT_FILE: &str = "acme_account.json";

/// 캐시에서 읽었거나 새로 발급된 인증서입니다.
#[derive(Clone)]
pub struct StoredCertificate {
    pub certified_key: Arc<CertifiedKey>,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl std::fmt::Debug for StoredCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCertificate")
            .field("chain_len", &self.certified_key.cert.len())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

impl StoredCertificate {
    /// 개인키와 인증서 체인이 함께 들어있는 PEM을 해석합니다.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CertError> {
        let items = rustls_pemfile::read_all(&mut &pem[..])
            .map_err(|e| CertError::InvalidCertificate(e.to_string()))?;

        let mut chain = Vec::new();
        let mut key = None;
        for item in items {
            match item {
                rustls_pemfile::Item::X509Certificate(der) => chain.push(Certificate(der)),
                rustls_pemfile::Item::PKCS8Key(der)
                | rustls_pemfile::Item::ECKey(der)
                | rustls_pemfile::Item::RSAKey(der) => {
                    if key.is_none() {
                        key = Some(PrivateKey(der));
                    }
                }
                _ => {}
            }
        }

        let key = key.ok_or_else(|| CertError::InvalidCertificate("개인키를 찾을 수 없음".to_string()))?;
        let leaf = chain.first()
            .ok_or_else(|| CertError::InvalidCertificate("인증서를 찾을 수 없음".to_string()))?;
        let (not_before, not_after) = leaf_validity(leaf)?;

        let signing_key = rustls::sign::any_supported_type(&key)
            .map_err(|e| CertError::InvalidCertificate(e.to_string()))?;

        Ok(Self {
            certified_key: Arc::new(CertifiedKey::new(chain, signing_key)),
            not_before,
            not_after,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.not_after <= OffsetDateTime::now_utc()
    }

    /// 실제로 적용할 갱신 구간. 유효 기간의 1/3을 넘지 않습니다.
    ///
    /// 유효 기간이 `window`보다 짧은 인증서는 갱신 직후에도 다시 갱신 대상이
    /// 되므로 구간을 줄여 핸드셰이크마다 재발급하지 않게 합니다.
    pub fn renewal_window(&self, window: Duration) -> Duration {
        let lifetime = (self.not_after.unix_timestamp() - self.not_before.unix_timestamp()).max(0) as u64;
        window.min(Duration::from_secs(lifetime / 3))
    }

    /// 만료까지 남은 시간이 갱신 구간 이하인지
    pub fn needs_renewal(&self, window: Duration) -> bool {
        let remaining = self.not_after.unix_timestamp() - OffsetDateTime::now_utc().unix_timestamp();
        remaining <= self.renewal_window(window).as_secs() as i64
    }
}

fn leaf_validity(leaf: &Certificate) -> Result<(OffsetDateTime, OffsetDateTime), CertError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(&leaf.0)
        .map_err(|e| CertError::InvalidCertificate(e.to_string()))?;
    let validity = parsed.validity();
    let to_time = |timestamp: i64| {
        OffsetDateTime::from_unix_timestamp(timestamp)
            .map_err(|e| CertError::InvalidCertificate(e.to_string()))
    };
    Ok((to_time(validity.not_before.timestamp())?, to_time(validity.not_after.timestamp())?))
}

/// 도메인별 인증서를 `<dir>/<domain>` 파일로 보관하는 디렉터리 캐시입니다.
#[derive(Debug, Clone)]
pub struct CertCache {
    dir: PathBuf,
}

impl CertCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 캐시에서 인증서를 읽습니다. 파일이 없으면 `Ok(None)`.
    pub async fn load(&self, domain: &str) -> Result<Option<StoredCertificate>, CertError> {
        let path = self.entry_path(domain)?;
        let pem = match fs::read(&path).await {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cache_error(&path, e)),
        };

        let stored = StoredCertificate::from_pem(&pem)?;
        debug!(domain = %domain, not_after = %stored.not_after, "캐시에서 인증서 로드");
        Ok(Some(stored))
    }

    /// 개인키 PEM과 체인 PEM을 한 파일로 저장하고 해석된 인증서를 돌려줍니다.
    pub async fn store(&self, domain: &str, key_pem: &str, chain_pem: &str) -> Result<StoredCertificate, CertError> {
        let mut pem = String::with_capacity(key_pem.len() + chain_pem.len() + 1);
        pem.push_str(key_pem);
        if !pem.ends_with('\n') {
            pem.push('\n');
        }
        pem.push_str(chain_pem);

        // 저장 전에 검증해서 깨진 파일이 캐시에 남지 않게 함
        let stored = StoredCertificate::from_pem(pem.as_bytes())?;
        let path = self.entry_path(domain)?;
        self.write_atomic(&path, pem.as_bytes()).await?;

        info!(domain = %domain, not_after = %stored.not_after, path = %path.display(), "인증서 캐시 저장");
        Ok(stored)
    }

    pub async fn load_account(&self) -> Result<Option<String>, CertError> {
        let path = self.dir.join(ACCOUNT_FILE);
        match fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(cache_error(&path, e)),
        }
    }

    pub async fn store_account(&self, json: &str) -> Result<(), CertError> {
        let path = self.dir.join(ACCOUNT_FILE);
        self.write_atomic(&path, json.as_bytes()).await
    }

    fn entry_path(&self, domain: &str) -> Result<PathBuf, CertError> {
        if domain.is_empty()
            || domain == ACCOUNT_FILE
            || domain.starts_with('.')
            || domain.contains(['/', '\\'])
        {
            return Err(CertError::InvalidCertificate(format!("캐시 키로 쓸 수 없는 도메인: {}", domain)));
        }
        Ok(self.dir.join(domain))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), CertError> {
        fs::create_dir_all(&self.dir).await.map_err(|e| cache_error(&self.dir, e))?;

        let file_name = path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = self.dir.join(format!(".{}.tmp", file_name));

        fs::write(&tmp, contents).await.map_err(|e| cache_error(&tmp, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| cache_error(&tmp, e))?;
        }
        fs::rename(&tmp, path).await.map_err(|e| cache_error(path, e))
    }
}

fn cache_error(path: &Path, error: std::io::Error) -> CertError {
    CertError::Cache {
        path: path.to_string_lossy().to_string(),
        error,
    }
}
