//! 인증서 자동 관리 (ACME HTTP-01) 모듈입니다.
//!
//! - [`CertificateSource`]: TLS 리스너가 보는 좁은 인터페이스
//! - [`AcmeCertificateSource`]: 허용 목록 + 디렉터리 캐시 + ACME 발급/갱신
//! - [`ChallengeStore`]: 발급기와 평문 리스너가 공유하는 토큰 저장소
//! - [`CertificateCoordinator`]: 평문 리스너 모드와 SNI acceptor를 함께 구성

mod error;
mod source;
mod cache;
mod challenge;
mod acme;
mod plaintext;
mod coordinator;

pub use error::CertError;
pub use source::CertificateSource;
pub use cache::{CertCache, StoredCertificate};
pub use challenge::ChallengeStore;
pub use acme::AcmeCertificateSource;
pub use plaintext::{PlaintextHandler, ACME_CHALLENGE_PREFIX};
pub use coordinator::CertificateCoordinator;
