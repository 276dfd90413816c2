use std::sync::Arc;

use crate::settings::HttpMode;
use crate::tls::SniAcceptor;
use super::{CertificateSource, ChallengeStore, PlaintextHandler};

/// 인증서 공급자와 평문 리스너 모드를 함께 묶습니다.
///
/// 두 리스너는 이 구조체가 만들어 준 핸들러/acceptor만 사용하므로 모드 분기가 여기 한 곳에 모입니다.
#[derive(Clone)]
pub struct CertificateCoordinator {
    source: Arc<dyn CertificateSource>,
    challenges: Arc<ChallengeStore>,
    mode: HttpMode,
}

impl CertificateCoordinator {
    pub fn new(source: Arc<dyn CertificateSource>, challenges: Arc<ChallengeStore>, mode: HttpMode) -> Self {
        Self { source, challenges, mode }
    }

    pub fn mode(&self) -> HttpMode {
        self.mode
    }

    pub fn plaintext_handler(&self) -> PlaintextHandler {
        match self.mode {
            HttpMode::Challenge => PlaintextHandler::Challenge(self.challenges.clone()),
            HttpMode::Redirect => PlaintextHandler::Redirect,
        }
    }

    pub fn acceptor(&self) -> SniAcceptor {
        SniAcceptor::new(self.source.clone())
    }
}
