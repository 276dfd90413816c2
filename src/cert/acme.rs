//! ACME(HTTP-01) 기반 자동 인증서 공급자
//!
//! 도메인별 상태는 메모리 맵 → 디스크 캐시 → 신규 발급 순으로 조회합니다.
//! 같은 도메인의 동시 발급은 도메인별 잠금으로 한 번만 수행되고,
//! 발급에 실패한 도메인은 지수 백오프 동안 CA에 다시 요청하지 않습니다.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::{debug, error, info, instrument, warn};

use crate::settings::AcmeSettings;
use super::{CertCache, CertError, CertificateSource, ChallengeStore, StoredCertificate};

const RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);
const BACKOFF_BASE: Duration = Duration::from_secs(60);
const BACKOFF_MAX: Duration = Duration::from_secs(60 * 60);
const ORDER_POLL_ATTEMPTS: u32 = 10;
const ORDER_POLL_INITIAL_DELAY: Duration = Duration::from_millis(250);
const ORDER_POLL_MAX_DELAY: Duration = Duration::from_secs(8);
const CERTIFICATE_POLL_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    retry_at: Instant,
}

impl Backoff {
    fn delay_for(failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(6);
        (BACKOFF_BASE * 2u32.pow(exp)).min(BACKOFF_MAX)
    }
}

struct Inner {
    allowed: HashSet<String>,
    cache: CertCache,
    challenges: Arc<ChallengeStore>,
    directory_url: String,
    contact: Option<String>,
    renew_before: Duration,
    issuance_timeout: Duration,
    loaded: StdRwLock<HashMap<String, StoredCertificate>>,
    issuing: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    backoff: StdMutex<HashMap<String, Backoff>>,
    account: Mutex<Option<Account>>,
}

/// 허용 목록에 있는 도메인에 대해서만 인증서를 발급하는 ACME 공급자입니다.
#[derive(Clone)]
pub struct AcmeCertificateSource {
    inner: Arc<Inner>,
}

impl AcmeCertificateSource {
    pub fn new(settings: &AcmeSettings, domains: &[String]) -> Self {
        Self::with_challenges(settings, domains, Arc::new(ChallengeStore::new()))
    }

    pub fn with_challenges(settings: &AcmeSettings, domains: &[String], challenges: Arc<ChallengeStore>) -> Self {
        let allowed = domains.iter().map(|domain| domain.to_lowercase()).collect();

        Self {
            inner: Arc::new(Inner {
                allowed,
                cache: CertCache::new(settings.cache_dir.clone()),
                challenges,
                directory_url: settings.directory_url.clone(),
                contact: settings.contact(),
                renew_before: Duration::from_secs(u64::from(settings.renew_before_days) * 24 * 60 * 60),
                issuance_timeout: settings.issuance_timeout,
                loaded: StdRwLock::new(HashMap::new()),
                issuing: StdMutex::new(HashMap::new()),
                backoff: StdMutex::new(HashMap::new()),
                account: Mutex::new(None),
            }),
        }
    }

    /// 평문 리스너와 공유하는 HTTP-01 토큰 저장소
    pub fn challenges(&self) -> Arc<ChallengeStore> {
        self.inner.challenges.clone()
    }

    /// 로드된 인증서를 주기적으로 확인해 갱신 구간에 들어온 것을 갱신합니다.
    pub fn start_renewal_task(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + RENEWAL_CHECK_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, RENEWAL_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                let due = this.domains_due_for_renewal();
                debug!(count = due.len(), "인증서 갱신 점검");
                for domain in due {
                    this.spawn_renewal(&domain);
                }
            }
        })
    }

    fn domains_due_for_renewal(&self) -> Vec<String> {
        let loaded = match self.inner.loaded.read() {
            Ok(loaded) => loaded,
            Err(poisoned) => poisoned.into_inner(),
        };
        loaded
            .iter()
            .filter(|(_, stored)| stored.needs_renewal(self.inner.renew_before))
            .map(|(domain, _)| domain.clone())
            .collect()
    }

    fn loaded(&self, domain: &str) -> Option<StoredCertificate> {
        let loaded = match self.inner.loaded.read() {
            Ok(loaded) => loaded,
            Err(poisoned) => poisoned.into_inner(),
        };
        loaded.get(domain).cloned()
    }

    fn remember(&self, domain: &str, stored: StoredCertificate) {
        let mut loaded = match self.inner.loaded.write() {
            Ok(loaded) => loaded,
            Err(poisoned) => poisoned.into_inner(),
        };
        loaded.insert(domain.to_string(), stored);
    }

    fn issuing_lock(&self, domain: &str) -> Arc<Mutex<()>> {
        let mut issuing = match self.inner.issuing.lock() {
            Ok(issuing) => issuing,
            Err(poisoned) => poisoned.into_inner(),
        };
        issuing.entry(domain.to_string()).or_default().clone()
    }

    fn check_backoff(&self, domain: &str) -> Result<(), CertError> {
        let backoff = match self.inner.backoff.lock() {
            Ok(backoff) => backoff,
            Err(poisoned) => poisoned.into_inner(),
        };
        match backoff.get(domain) {
            Some(state) if state.retry_at > Instant::now() => Err(CertError::Backoff {
                domain: domain.to_string(),
                retry_after: state.retry_at - Instant::now(),
            }),
            _ => Ok(()),
        }
    }

    fn record_failure(&self, domain: &str) -> Duration {
        let mut backoff = match self.inner.backoff.lock() {
            Ok(backoff) => backoff,
            Err(poisoned) => poisoned.into_inner(),
        };
        let failures = backoff.get(domain).map_or(0, |state| state.failures) + 1;
        let delay = Backoff::delay_for(failures);
        backoff.insert(domain.to_string(), Backoff {
            failures,
            retry_at: Instant::now() + delay,
        });
        delay
    }

    fn record_success(&self, domain: &str) {
        let mut backoff = match self.inner.backoff.lock() {
            Ok(backoff) => backoff,
            Err(poisoned) => poisoned.into_inner(),
        };
        backoff.remove(domain);
    }

    /// 메모리에 없거나 만료된 인증서를 캐시 또는 발급으로 확보합니다.
    async fn obtain(&self, domain: &str) -> Result<StoredCertificate, CertError> {
        self.check_backoff(domain)?;

        let lock = self.issuing_lock(domain);
        let _guard = lock.lock().await;

        // 잠금을 기다리는 동안 다른 핸드셰이크가 발급했을 수 있음
        if let Some(stored) = self.loaded(domain).filter(|stored| !stored.is_expired()) {
            return Ok(stored);
        }
        self.check_backoff(domain)?;

        match self.inner.cache.load(domain).await {
            Ok(Some(stored)) if !stored.is_expired() => {
                self.remember(domain, stored.clone());
                return Ok(stored);
            }
            Ok(Some(stored)) => {
                info!(domain = %domain, not_after = %stored.not_after, "캐시된 인증서 만료, 재발급");
            }
            Ok(None) => {}
            Err(e) => warn!(domain = %domain, error = %e, "캐시된 인증서를 읽을 수 없음, 재발급"),
        }

        self.issue_and_remember(domain).await
    }

    async fn issue_and_remember(&self, domain: &str) -> Result<StoredCertificate, CertError> {
        // CA가 응답하지 않아도 발급 잠금이 풀리고 백오프가 시작되도록 전체 시간을 제한
        let result = tokio::time::timeout(self.inner.issuance_timeout, self.issue(domain))
            .await
            .unwrap_or_else(|_| {
                Err(CertError::acme(
                    domain,
                    format!("timeout ({}초 안에 발급이 끝나지 않음)", self.inner.issuance_timeout.as_secs()),
                ))
            });

        match result {
            Ok(stored) => {
                self.record_success(domain);
                self.remember(domain, stored.clone());
                Ok(stored)
            }
            Err(e) => {
                let retry_after = self.record_failure(domain);
                error!(
                    domain = %domain,
                    error = %e,
                    retry_after_secs = retry_after.as_secs(),
                    "인증서 발급 실패"
                );
                Err(e)
            }
        }
    }

    /// 백그라운드 갱신. 같은 도메인이 이미 발급 중이거나 백오프 중이면 건너뜁니다.
    fn spawn_renewal(&self, domain: &str) {
        if self.check_backoff(domain).is_err() {
            return;
        }
        let guard: OwnedMutexGuard<()> = match self.issuing_lock(domain).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        let this = self.clone();
        let domain = domain.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            info!(domain = %domain, "인증서 갱신 시작");
            if this.issue_and_remember(&domain).await.is_ok() {
                info!(domain = %domain, "인증서 갱신 완료");
            }
        });
    }

    async fn account(&self) -> Result<Account, CertError> {
        let mut slot = self.inner.account.lock().await;
        if let Some(account) = slot.as_ref() {
            return Ok(account.clone());
        }

        let account = match self.inner.cache.load_account().await? {
            Some(json) => {
                let credentials: AccountCredentials = serde_json::from_str(&json)
                    .map_err(|e| CertError::acme("account", e))?;
                let account = Account::from_credentials(credentials)
                    .await
                    .map_err(|e| CertError::acme("account", e))?;
                debug!("저장된 ACME 계정 사용");
                account
            }
            None => {
                let contact: Vec<&str> = self.inner.contact.iter().map(String::as_str).collect();
                let (account, credentials) = Account::create(
                    &NewAccount {
                        contact: &contact,
                        terms_of_service_agreed: true,
                        only_return_existing: false,
                    },
                    &self.inner.directory_url,
                    None,
                )
                .await
                .map_err(|e| CertError::acme("account", e))?;

                let json = serde_json::to_string_pretty(&credentials)
                    .map_err(|e| CertError::acme("account", e))?;
                self.inner.cache.store_account(&json).await?;
                info!(directory = %self.inner.directory_url, "ACME 계정 생성");
                account
            }
        };

        *slot = Some(account.clone());
        Ok(account)
    }

    #[instrument(skip(self), err)]
    async fn issue(&self, domain: &str) -> Result<StoredCertificate, CertError> {
        info!(directory = %self.inner.directory_url, "인증서 발급 요청");
        let account = self.account().await?;

        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder { identifiers: &identifiers })
            .await
            .map_err(|e| CertError::acme(domain, e))?;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| CertError::acme(domain, e))?;

        let mut tokens = Vec::new();
        let mut ready_urls = Vec::new();
        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                ref status => {
                    return Err(CertError::acme(domain, format!("예상하지 못한 인가 상태: {:?}", status)));
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|challenge| challenge.r#type == ChallengeType::Http01)
                .ok_or_else(|| CertError::acme(domain, "HTTP-01 챌린지가 제공되지 않음"))?;

            let key_authorization = order.key_authorization(challenge);
            self.inner
                .challenges
                .add_challenge(&challenge.token, key_authorization.as_str())
                .await;
            tokens.push(challenge.token.clone());
            ready_urls.push(challenge.url.clone());
        }

        let result = self.complete_order(domain, &mut order, &ready_urls).await;

        for token in &tokens {
            self.inner.challenges.remove_challenge(token).await;
        }

        let (key_pem, chain_pem) = result?;
        self.inner.cache.store(domain, &key_pem, &chain_pem).await
    }

    async fn complete_order(
        &self,
        domain: &str,
        order: &mut Order,
        ready_urls: &[String],
    ) -> Result<(String, String), CertError> {
        for url in ready_urls {
            order
                .set_challenge_ready(url)
                .await
                .map_err(|e| CertError::acme(domain, e))?;
        }

        let mut delay = ORDER_POLL_INITIAL_DELAY;
        let mut attempts = 0;
        loop {
            tokio::time::sleep(delay).await;
            let state = order.refresh().await.map_err(|e| CertError::acme(domain, e))?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => break,
                OrderStatus::Invalid => {
                    return Err(CertError::acme(domain, "CA가 주문을 거부함 (챌린지 검증 실패)"));
                }
                _ => {}
            }

            attempts += 1;
            if attempts >= ORDER_POLL_ATTEMPTS {
                return Err(CertError::acme(domain, "주문이 준비 상태가 되지 않음"));
            }
            delay = (delay * 2).min(ORDER_POLL_MAX_DELAY);
        }

        let mut params = CertificateParams::new(vec![domain.to_string()]);
        params.distinguished_name = DistinguishedName::new();
        let key_cert = rcgen::Certificate::from_params(params)
            .map_err(|e| CertError::acme(domain, e))?;
        let csr = key_cert
            .serialize_request_der()
            .map_err(|e| CertError::acme(domain, e))?;

        order
            .finalize(&csr)
            .await
            .map_err(|e| CertError::acme(domain, e))?;

        let mut attempts = 0;
        let chain_pem = loop {
            match order.certificate().await.map_err(|e| CertError::acme(domain, e))? {
                Some(chain_pem) => break chain_pem,
                None => {
                    attempts += 1;
                    if attempts >= CERTIFICATE_POLL_ATTEMPTS {
                        return Err(CertError::acme(domain, "인증서 다운로드 대기 시간 초과"));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };

        Ok((key_cert.serialize_private_key_pem(), chain_pem))
    }
}

#[async_trait]
impl CertificateSource for AcmeCertificateSource {
    fn is_allowed(&self, server_name: &str) -> bool {
        self.inner.allowed.contains(server_name)
    }

    async fn certificate_for(&self, server_name: &str) -> Result<Arc<CertifiedKey>, CertError> {
        if !self.is_allowed(server_name) {
            return Err(CertError::NotAllowed(server_name.to_string()));
        }

        if let Some(stored) = self.loaded(server_name) {
            if !stored.is_expired() {
                if stored.needs_renewal(self.inner.renew_before) {
                    self.spawn_renewal(server_name);
                }
                return Ok(stored.certified_key);
            }
        }

        let stored = self.obtain(server_name).await?;
        if stored.needs_renewal(self.inner.renew_before) {
            self.spawn_renewal(server_name);
        }
        Ok(stored.certified_key)
    }
}
