use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use hyper::{Request, Response, StatusCode, Uri, Version};
use hyper::body::{Body, Bytes};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use http_body_util::{BodyExt, Full};
use http_body_util::combinators::UnsyncBoxBody;
use hyper_util::client::legacy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tracing::{debug, instrument};

use crate::registry::BackendEntry;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 클라이언트로 돌려보내는 응답 바디. 백엔드 응답은 버퍼링 없이 그대로 스트리밍됩니다.
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

type UpstreamBody = UnsyncBoxBody<Bytes, BoxError>;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

// RFC 9110 7.6.1 홉 단위 헤더
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug)]
pub enum ProxyError {
    InvalidTarget(String),
    Upstream(legacy::Error),
    Timeout(Duration),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::InvalidTarget(msg) => write!(f, "Failed to build upstream request: {}", msg),
            ProxyError::Upstream(e) => write!(f, "Backend request failed: {}", e),
            ProxyError::Timeout(after) => write!(f, "Backend did not respond within {}s", after.as_secs()),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Upstream(e) => Some(e),
            _ => None,
        }
    }
}

// 프록시 요청을 위한 불변 설정 구조체. 모든 백엔드가 keep-alive 풀 하나를 공유합니다.
#[derive(Clone)]
pub struct ProxyConfig {
    client: legacy::Client<HttpConnector, UpstreamBody>,
    upstream_timeout: Duration,
}

impl ProxyConfig {
    pub fn new(upstream_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(upstream_timeout));
        connector.set_nodelay(true);

        let client = legacy::Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(connector);

        Self { client, upstream_timeout }
    }
}

/// 요청을 백엔드로 전달하고 응답을 스트리밍으로 돌려줍니다.
///
/// 응답 헤더를 `upstream_timeout` 안에 받지 못하면 `ProxyError::Timeout`을 반환합니다.
/// 호출한 future가 drop되면 (클라이언트 연결 종료) 백엔드 요청도 함께 중단됩니다.
#[instrument(skip(config, backend, req), fields(backend = %backend))]
pub async fn proxy_request<B>(
    config: &ProxyConfig,
    backend: &BackendEntry,
    req: Request<B>,
    client_ip: Option<IpAddr>,
) -> Result<Response<ProxyBody>, ProxyError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let proxied_req = build_proxied_request(backend, req, client_ip)?;
    debug!(uri = %proxied_req.uri(), "Proxying request to backend");

    let response = tokio::time::timeout(config.upstream_timeout, config.client.request(proxied_req))
        .await
        .map_err(|_| ProxyError::Timeout(config.upstream_timeout))?
        .map_err(ProxyError::Upstream)?;

    let (mut parts, body) = response.into_parts();
    remove_hop_by_hop_headers(&mut parts.headers);
    debug!(status = %parts.status, "Backend responded");

    Ok(Response::from_parts(parts, body.boxed_unsync()))
}

/// 백엔드로 보낼 요청을 만듭니다.
///
/// 경로는 백엔드 기본 경로와 요청 경로를 슬래시 하나로 잇고, 쿼리는 `&`로 합칩니다.
pub fn build_proxied_request<B>(
    backend: &BackendEntry,
    req: Request<B>,
    client_ip: Option<IpAddr>,
) -> Result<Request<UpstreamBody>, ProxyError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let (mut parts, body) = req.into_parts();

    let path = join_paths(backend.url.path(), parts.uri.path());
    let path_and_query = match join_queries(backend.url.query(), parts.uri.query()) {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    parts.uri = Uri::builder()
        .scheme("http")
        .authority(backend.authority().clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
    parts.version = Version::HTTP_11;

    let original_host = parts.headers.get(header::HOST).cloned();
    remove_hop_by_hop_headers(&mut parts.headers);

    let backend_host = HeaderValue::from_str(backend.authority().as_str())
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
    parts.headers.insert(header::HOST, backend_host);

    if let Some(ip) = client_ip {
        append_forwarded_for(&mut parts.headers, ip);
    }
    if let Some(host) = original_host {
        parts.headers.insert(X_FORWARDED_HOST.clone(), host);
    }
    parts.headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("https"));

    let body = body.map_err(|e| -> BoxError { e.into() }).boxed_unsync();
    Ok(Request::from_parts(parts, body))
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

fn join_queries(base: Option<&str>, query: Option<&str>) -> Option<String> {
    match (base.filter(|q| !q.is_empty()), query.filter(|q| !q.is_empty())) {
        (Some(base), Some(query)) => Some(format!("{}&{}", base, query)),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
}

/// 홉 단위 헤더와 `Connection` 헤더에 나열된 헤더를 제거합니다.
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// 평문 텍스트 응답을 만듭니다.
pub fn text_response(status: StatusCode, message: impl Into<String>) -> Response<ProxyBody> {
    let mut message = message.into();
    if !message.ends_with('\n') {
        message.push('\n');
    }

    let mut response = Response::new(
        Full::new(Bytes::from(message))
            .map_err(|never| match never {})
            .boxed_unsync(),
    );
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}

pub fn error_response(error: &ProxyError) -> Response<ProxyBody> {
    text_response(error.status(), error.to_string())
}
