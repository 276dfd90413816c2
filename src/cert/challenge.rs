use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// HTTP-01 검증 대기 중인 토큰 → key authorization 저장소입니다.
///
/// ACME 발급기가 쓰고 평문 리스너가 읽습니다.
#[derive(Debug, Default)]
pub struct ChallengeStore {
    challenges: RwLock<HashMap<String, String>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_challenge(&self, token: &str, key_authorization: &str) {
        let mut challenges = self.challenges.write().await;
        challenges.insert(token.to_string(), key_authorization.to_string());
        debug!(token = %token, "ACME 챌린지 등록");
    }

    pub async fn get_challenge(&self, token: &str) -> Option<String> {
        let challenges = self.challenges.read().await;
        challenges.get(token).cloned()
    }

    pub async fn remove_challenge(&self, token: &str) {
        let mut challenges = self.challenges.write().await;
        if challenges.remove(token).is_some() {
            debug!(token = %token, "ACME 챌린지 제거");
        }
    }

    pub async fn len(&self) -> usize {
        self.challenges.read().await.len()
    }
}
