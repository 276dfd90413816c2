use reverse_proxy_acme::cert::{
    AcmeCertificateSource, CertCache, CertError, CertificateSource, StoredCertificate,
};
use reverse_proxy_acme::settings::AcmeSettings;
use reverse_proxy_acme::tls::SniAcceptor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use rcgen::{Certificate, CertificateParams};
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::{self, sign::CertifiedKey, ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// 테스트용 자체 서명 인증서 (개인키 PEM, 인증서 PEM, 인증서 DER)
fn self_signed(domain: &str, not_after: Option<OffsetDateTime>) -> (String, String, Vec<u8>) {
    let mut params = CertificateParams::new(vec![domain.to_string()]);
    if let Some(not_after) = not_after {
        params.not_after = not_after;
    }
    let cert = Certificate::from_params(params).unwrap();
    (
        cert.serialize_private_key_pem(),
        cert.serialize_pem().unwrap(),
        cert.serialize_der().unwrap(),
    )
}

// 고정된 도메인 하나에만 인증서를 돌려주는 공급자
struct StaticSource {
    domain: String,
    certified_key: Arc<CertifiedKey>,
}

#[async_trait]
impl CertificateSource for StaticSource {
    fn is_allowed(&self, server_name: &str) -> bool {
        server_name == self.domain
    }

    async fn certificate_for(&self, server_name: &str) -> Result<Arc<CertifiedKey>, CertError> {
        if !self.is_allowed(server_name) {
            return Err(CertError::NotAllowed(server_name.to_string()));
        }
        Ok(self.certified_key.clone())
    }
}

fn client_config(root_der: Vec<u8>) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add(&rustls::Certificate(root_der)).unwrap();
    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

/// acceptor로 연결 하나를 받아 결과를 돌려주는 서버를 띄웁니다.
async fn spawn_tls_server(
    acceptor: SniAcceptor,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<Result<(), CertError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(stream).await?;
        let mut buf = [0u8; 4];
        tls.read_exact(&mut buf).await.map_err(CertError::Handshake)?;
        tls.write_all(&buf).await.map_err(CertError::Handshake)?;
        tls.shutdown().await.map_err(CertError::Handshake)?;
        Ok(())
    });

    (addr, handle)
}

fn static_acceptor(domain: &str) -> (SniAcceptor, Vec<u8>) {
    let (key_pem, cert_pem, der) = self_signed(domain, None);
    let stored = StoredCertificate::from_pem(format!("{}{}", key_pem, cert_pem).as_bytes()).unwrap();
    let source = StaticSource {
        domain: domain.to_string(),
        certified_key: stored.certified_key,
    };
    (SniAcceptor::new(Arc::new(source)), der)
}

#[tokio::test]
async fn test_handshake_for_allowed_domain() {
    let (acceptor, der) = static_acceptor("www.example.com");
    let (addr, server) = spawn_tls_server(acceptor).await;

    let connector = TlsConnector::from(client_config(der));
    let stream = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("www.example.com").unwrap();
    let mut tls = connector.connect(name, stream).await.unwrap();

    // ALPN은 http/1.1로 협상
    assert_eq!(tls.get_ref().1.alpn_protocol(), Some(&b"http/1.1"[..]));

    tls.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tls.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handshake_rejected_for_unknown_domain() {
    let (acceptor, der) = static_acceptor("www.example.com");
    let (addr, server) = spawn_tls_server(acceptor).await;

    let connector = TlsConnector::from(client_config(der));
    let stream = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("evil.example.com").unwrap();
    assert!(connector.connect(name, stream).await.is_err());

    match server.await.unwrap() {
        Err(CertError::NotAllowed(name)) => assert_eq!(name, "evil.example.com"),
        other => panic!("허용되지 않은 도메인 오류를 기대했지만: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_handshake_without_sni_is_rejected() {
    let (acceptor, der) = static_acceptor("www.example.com");
    let (addr, server) = spawn_tls_server(acceptor).await;

    // IP 주소로 접속하면 클라이언트가 SNI를 보내지 않음
    let connector = TlsConnector::from(client_config(der));
    let stream = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::IpAddress(addr.ip());
    assert!(connector.connect(name, stream).await.is_err());

    assert!(matches!(server.await.unwrap(), Err(CertError::MissingServerName)));
}

#[tokio::test]
async fn test_cache_store_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CertCache::new(dir.path().join("certs"));

    assert!(cache.load("www.example.com").await.unwrap().is_none());

    let (key_pem, cert_pem, _) = self_signed("www.example.com", None);
    let stored = cache.store("www.example.com", &key_pem, &cert_pem).await.unwrap();
    assert!(!stored.is_expired());
    assert!(!stored.needs_renewal(30 * DAY));

    // 임시 파일 없이 도메인 이름 파일 하나만 남음
    let files: Vec<String> = std::fs::read_dir(cache.dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(files, vec!["www.example.com"]);

    let loaded = cache.load("www.example.com").await.unwrap().unwrap();
    assert_eq!(loaded.not_after, stored.not_after);
    assert_eq!(loaded.certified_key.cert, stored.certified_key.cert);
}

#[tokio::test]
async fn test_cache_rejects_invalid_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CertCache::new(dir.path());

    // 깨진 PEM은 저장하지 않음
    assert!(cache.store("www.example.com", "garbage", "garbage").await.is_err());
    assert!(cache.load("www.example.com").await.unwrap().is_none());

    // 경로를 벗어나는 키
    let (key_pem, cert_pem, _) = self_signed("www.example.com", None);
    assert!(cache.store("../escape", &key_pem, &cert_pem).await.is_err());

    // 디스크의 파일이 손상되었으면 오류
    std::fs::write(dir.path().join("api.example.com"), "not a pem").unwrap();
    assert!(cache.load("api.example.com").await.is_err());
}

#[tokio::test]
async fn test_renewal_window() {
    let soon = OffsetDateTime::now_utc() + time::Duration::days(10);
    let (key_pem, cert_pem, _) = self_signed("www.example.com", Some(soon));
    let stored = StoredCertificate::from_pem(format!("{}{}", key_pem, cert_pem).as_bytes()).unwrap();

    assert!(!stored.is_expired());
    assert!(stored.needs_renewal(30 * DAY));
    assert!(!stored.needs_renewal(5 * DAY));

    let past = OffsetDateTime::now_utc() - time::Duration::days(1);
    let (key_pem, cert_pem, _) = self_signed("www.example.com", Some(past));
    let stored = StoredCertificate::from_pem(format!("{}{}", key_pem, cert_pem).as_bytes()).unwrap();
    assert!(stored.is_expired());
}

fn certificate_valid_between(not_before: OffsetDateTime, not_after: OffsetDateTime) -> StoredCertificate {
    let mut params = CertificateParams::new(vec!["www.example.com".to_string()]);
    params.not_before = not_before;
    params.not_after = not_after;
    let cert = Certificate::from_params(params).unwrap();
    let pem = format!("{}{}", cert.serialize_private_key_pem(), cert.serialize_pem().unwrap());
    StoredCertificate::from_pem(pem.as_bytes()).unwrap()
}

#[tokio::test]
async fn test_renewal_window_is_capped_by_lifetime() {
    let now = OffsetDateTime::now_utc();

    // 유효 기간 10일짜리 인증서에 30일 구간을 그대로 쓰면 발급 직후에도 갱신 대상이 됨
    let fresh = certificate_valid_between(now - time::Duration::days(1), now + time::Duration::days(9));
    assert_eq!(fresh.renewal_window(30 * DAY), Duration::from_secs(10 * DAY.as_secs() / 3));
    assert!(!fresh.needs_renewal(30 * DAY));
    // 구간이 유효 기간의 1/3보다 짧으면 그대로 사용
    assert_eq!(fresh.renewal_window(DAY), DAY);

    // 유효 기간의 마지막 1/3에 들어오면 갱신
    let aging = certificate_valid_between(now - time::Duration::days(8), now + time::Duration::days(2));
    assert!(aging.needs_renewal(30 * DAY));
}

fn acme_settings(cache_dir: &std::path::Path) -> AcmeSettings {
    AcmeSettings {
        cache_dir: cache_dir.to_path_buf(),
        directory_url: "https://127.0.0.1:9/directory".to_string(),
        contact_email: None,
        renew_before_days: 30,
        issuance_timeout: Duration::from_secs(1),
    }
}

/// 연결을 받기만 하고 아무 응답도 하지 않는 CA. 받은 연결 수를 셉니다.
async fn spawn_stalled_ca() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = connections.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    (format!("https://{}/directory", addr), connections)
}

#[tokio::test]
async fn test_acme_source_rejects_unlisted_domains() {
    let dir = tempfile::tempdir().unwrap();
    let source = AcmeCertificateSource::new(
        &acme_settings(dir.path()),
        &["www.example.com".to_string()],
    );

    assert!(source.is_allowed("www.example.com"));
    assert!(!source.is_allowed("api.example.com"));
    assert!(matches!(
        source.certificate_for("api.example.com").await,
        Err(CertError::NotAllowed(_))
    ));
}

#[tokio::test]
async fn test_acme_source_serves_cached_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let (key_pem, cert_pem, _) = self_signed("www.example.com", None);
    CertCache::new(dir.path())
        .store("www.example.com", &key_pem, &cert_pem)
        .await
        .unwrap();

    let source = AcmeCertificateSource::new(
        &acme_settings(dir.path()),
        &["www.example.com".to_string()],
    );

    let first = source.certificate_for("www.example.com").await.unwrap();
    let second = source.certificate_for("www.example.com").await.unwrap();
    assert_eq!(first.cert, second.cert);
}

#[tokio::test]
async fn test_stalled_ca_times_out_and_backs_off() {
    let dir = tempfile::tempdir().unwrap();
    let (directory_url, connections) = spawn_stalled_ca().await;
    let settings = AcmeSettings {
        directory_url,
        ..acme_settings(dir.path())
    };
    let source = AcmeCertificateSource::new(&settings, &["www.example.com".to_string()]);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        source.certificate_for("www.example.com"),
    )
    .await
    .expect("응답 없는 CA를 발급 시간 제한으로 끊어야 함");

    match result {
        Err(CertError::Acme { domain, reason }) => {
            assert_eq!(domain, "www.example.com");
            assert!(reason.starts_with("timeout"), "{}", reason);
        }
        other => panic!("발급 시간 초과 오류를 기대했지만: {:?}", other.map(|_| ())),
    }

    // 시간 초과도 실패로 기록되어 백오프 동안 CA에 다시 연결하지 않음
    assert!(matches!(
        source.certificate_for("www.example.com").await,
        Err(CertError::Backoff { .. })
    ));
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_handshakes_share_one_issuance() {
    let dir = tempfile::tempdir().unwrap();
    let (directory_url, connections) = spawn_stalled_ca().await;
    let settings = AcmeSettings {
        directory_url,
        issuance_timeout: Duration::from_secs(2),
        ..acme_settings(dir.path())
    };
    let source = AcmeCertificateSource::new(&settings, &["www.example.com".to_string()]);

    let handshakes: Vec<_> = (0..2)
        .map(|_| {
            let source = source.clone();
            tokio::spawn(async move { source.certificate_for("www.example.com").await.map(|_| ()) })
        })
        .collect();

    let mut errors = Vec::new();
    for handshake in handshakes {
        let result = tokio::time::timeout(Duration::from_secs(15), handshake)
            .await
            .expect("발급 대기가 끝나야 함")
            .unwrap();
        errors.push(result.unwrap_err());
    }

    // 발급은 한 번만 시도되고 기다리던 쪽은 그 실패의 백오프를 받음
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert_eq!(errors.iter().filter(|e| matches!(e, CertError::Acme { .. })).count(), 1);
    assert_eq!(errors.iter().filter(|e| matches!(e, CertError::Backoff { .. })).count(), 1);
}
