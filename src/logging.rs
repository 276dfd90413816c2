use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use crate::settings::logging::{LogFormat, LogOutput};
use crate::settings::LogSettings;

/// 전역 subscriber를 설정합니다.
///
/// 반환된 guard는 프로세스가 끝날 때까지 유지해야 버퍼에 남은 로그가 기록됩니다.
pub fn init_logging(settings: &LogSettings) -> Result<WorkerGuard, Box<dyn std::error::Error + Send + Sync>> {
    let (writer, guard) = match &settings.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::File(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            let file_name = path.file_name()
                .ok_or("로그 파일 이름이 없습니다")?;
            std::fs::create_dir_all(&dir)?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
        }
    };

    // RUST_LOG 지시어가 설정 레벨보다 우선
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(settings.level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(BoxMakeWriter::new(writer))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match settings.format {
        LogFormat::Json => builder.json().try_init()?,
        LogFormat::Text => builder.try_init()?,
    }

    Ok(guard)
}

/// 요청 하나에 대한 완료 로그. 요청이 끝날 때 `log_request`로 한 번 기록됩니다.
#[derive(Debug)]
pub struct RequestLog {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub host: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub backend: Option<String>,
    pub error: Option<String>,
}

impl RequestLog {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            method: String::new(),
            path: String::new(),
            host: String::new(),
            status_code: 0,
            duration_ms: 0,
            backend: None,
            error: None,
        }
    }

    pub fn with_request<B>(&mut self, req: &hyper::Request<B>) {
        self.method = req.method().to_string();
        self.path = req.uri().path().to_string();
        self.host = req
            .headers()
            .get(hyper::header::HOST)
            .and_then(|host| host.to_str().ok())
            .or_else(|| req.uri().host())
            .unwrap_or_default()
            .to_string();
    }

    pub fn with_response(&mut self, status: hyper::StatusCode) {
        self.status_code = status.as_u16();
    }

    pub fn with_backend(&mut self, backend: impl std::fmt::Display) {
        self.backend = Some(backend.to_string());
    }

    pub fn with_error(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
    }

    fn level(&self) -> Level {
        match (&self.error, self.status_code) {
            (Some(_), _) | (_, 500..=599) => Level::ERROR,
            (_, 400..=499) => Level::WARN,
            _ => Level::INFO,
        }
    }
}

/// 결과에 따라 info/warn/error 레벨로 요청 로그를 남깁니다.
pub fn log_request(log: &RequestLog) {
    let backend = log.backend.as_deref().unwrap_or("-");

    macro_rules! emit {
        ($macro:ident, $message:literal) => {
            $macro!(
                request_id = %log.request_id,
                method = %log.method,
                path = %log.path,
                host = %log.host,
                status = log.status_code,
                duration_ms = log.duration_ms,
                backend = %backend,
                error = log.error.as_deref(),
                $message
            )
        };
    }

    match log.level() {
        Level::ERROR => emit!(error, "요청 처리 실패"),
        Level::WARN => emit!(warn, "요청 거부"),
        _ => emit!(info, "요청 완료"),
    }
}
