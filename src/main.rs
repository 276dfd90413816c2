use reverse_proxy_acme::{logging::init_logging, server::ServerManager, settings::Settings};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // 설정 로드 (로깅 초기화 전이므로 stderr로 출력)
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("설정 로드 실패: {}", e);
            std::process::exit(1);
        }
    };

    // 로깅 초기화. guard는 프로세스가 끝날 때까지 유지해야 버퍼가 비워집니다.
    let guard = match init_logging(&settings.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("로깅 초기화 실패: {}", e);
            std::process::exit(1);
        }
    };

    let manager = match ServerManager::new(settings) {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "서버 구성 실패");
            drop(guard);
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = manager.start() => {
            if let Err(e) = result {
                error!(error = %e, "서버 실행 실패");
                drop(guard);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("종료 신호 수신, 서버를 종료합니다");
        }
    }
}
