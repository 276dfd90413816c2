use std::sync::Arc;
use tracing::{info, instrument};

use crate::cert::{AcmeCertificateSource, CertificateCoordinator, CertificateSource, ChallengeStore};
use crate::proxy::ProxyConfig;
use crate::registry::BackendRegistry;
use crate::settings::Settings;
use super::handler::RequestHandler;
use super::listener::ServerListener;
use super::Result;

/// 레지스트리, 인증서 코디네이터, 두 리스너를 조립하고 수명을 관리합니다.
pub struct ServerManager {
    pub settings: Settings,
    pub registry: Arc<BackendRegistry>,
    coordinator: CertificateCoordinator,
    acme: Option<AcmeCertificateSource>,
}

impl ServerManager {
    /// 환경 변수로 레지스트리를 만들고 ACME 공급자를 구성합니다.
    ///
    /// 백엔드 설정이 하나라도 잘못되면 리스너를 바인딩하기 전에 실패합니다.
    #[instrument(skip(settings), level = "debug", err)]
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let registry = Arc::new(BackendRegistry::from_env(&settings.backends.domains)?);

        let acme = AcmeCertificateSource::new(&settings.acme, &registry.domains());
        let coordinator = CertificateCoordinator::new(
            Arc::new(acme.clone()),
            acme.challenges(),
            settings.server.http_mode,
        );

        Ok(Self {
            settings,
            registry,
            coordinator,
            acme: Some(acme),
        })
    }

    /// 이미 만들어진 레지스트리와 인증서 공급자로 서버를 구성합니다.
    pub fn with_source(
        settings: Settings,
        registry: Arc<BackendRegistry>,
        source: Arc<dyn CertificateSource>,
        challenges: Arc<ChallengeStore>,
    ) -> Self {
        let coordinator = CertificateCoordinator::new(source, challenges, settings.server.http_mode);
        Self {
            settings,
            registry,
            coordinator,
            acme: None,
        }
    }

    pub fn coordinator(&self) -> &CertificateCoordinator {
        &self.coordinator
    }

    pub fn request_handler(&self) -> Arc<RequestHandler> {
        Arc::new(RequestHandler::new(
            self.registry.clone(),
            ProxyConfig::new(self.settings.server.upstream_timeout),
        ))
    }

    /// 두 포트를 바인딩합니다. 하나라도 실패하면 서버를 시작하지 않습니다.
    pub async fn bind(&self) -> Result<ServerListener> {
        ServerListener::bind(&self.settings.server).await
    }

    /// 바인딩된 리스너로 서버를 실행합니다. 정상적으로는 반환하지 않습니다.
    pub async fn serve(&self, listener: ServerListener) -> Result<()> {
        let renewal = self.acme.as_ref().map(|acme| acme.start_renewal_task());

        info!(
            domains = ?self.registry.domains(),
            mode = ?self.coordinator.mode(),
            "프록시 서버 시작"
        );

        let result = listener
            .run(
                self.request_handler(),
                self.coordinator.plaintext_handler(),
                self.coordinator.acceptor(),
            )
            .await;

        if let Some(renewal) = renewal {
            renewal.abort();
        }
        result
    }

    #[instrument(skip(self), level = "info", err)]
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

