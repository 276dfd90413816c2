use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use hyper::{Request, Response, StatusCode};
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use uuid::Uuid;

use crate::{
    logging::{log_request, RequestLog},
    proxy::{self, BoxError, ProxyBody, ProxyConfig},
    registry::{BackendRegistry, RoutingError},
};

/// TLS 리스너의 모든 경로를 처리하는 프록시 핸들러입니다.
pub struct RequestHandler {
    registry: Arc<BackendRegistry>,
    proxy_config: ProxyConfig,
}

impl RequestHandler {
    pub fn new(registry: Arc<BackendRegistry>, proxy_config: ProxyConfig) -> Self {
        Self {
            registry,
            proxy_config,
        }
    }

    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Response<ProxyBody>, Infallible>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let start_time = Instant::now();
        let mut log = RequestLog::new(Uuid::new_v4().to_string());
        log.with_request(&req);

        // 1. 라우팅
        let response = match self.registry.route_request(&req) {
            Ok(backend) => {
                log.with_backend(backend);

                // 2. 프록시 요청
                match proxy::proxy_request(&self.proxy_config, backend, req, remote_addr.map(|addr| addr.ip())).await {
                    Ok(response) => response,
                    Err(e) => {
                        log.with_error(&e);
                        proxy::error_response(&e)
                    }
                }
            }
            Err(e) => Self::create_routing_error_response(e),
        };

        log.with_response(response.status());
        log.duration_ms = start_time.elapsed().as_millis() as u64;
        log_request(&log);

        Ok(response)
    }

    fn create_routing_error_response(error: RoutingError) -> Response<ProxyBody> {
        let status = match error {
            RoutingError::MissingHost |
            RoutingError::HeaderParseError { .. } => StatusCode::BAD_REQUEST,
            RoutingError::BackendNotFound { .. } => StatusCode::NOT_FOUND,
        };

        proxy::text_response(status, error.to_string())
    }

    pub async fn handle_connection<I>(
        &self,
        io: I,
        remote_addr: Option<SocketAddr>,
    ) -> Result<(), hyper::Error>
    where
        I: hyper::rt::Read + hyper::rt::Write + Send + Unpin + 'static,
    {
        http1::Builder::new()
            .serve_connection(
                io,
                service_fn(|req| self.handle_request(req, remote_addr)),
            )
            .await
    }
}
