//! 도메인 → 백엔드 매핑과 호스트 기반 조회를 제공하는 모듈입니다.

mod error;
mod backend;
mod table;

pub use error::{RoutingError, RegistryError};
pub use backend::BackendEntry;
pub use table::{backend_env_key, BackendRegistry, BACKEND_KEY_SUFFIX};
