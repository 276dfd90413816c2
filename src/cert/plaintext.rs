use std::convert::Infallible;
use std::sync::Arc;
use hyper::{header, Request, Response, StatusCode};
use hyper::body::Bytes;
use hyper::header::HeaderValue;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use tracing::{debug, warn};

use crate::proxy::{text_response, ProxyBody};
use crate::registry::BackendRegistry;
use super::ChallengeStore;

pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// 평문 리스너의 동작. 시작 시 한 번 선택됩니다.
#[derive(Debug, Clone)]
pub enum PlaintextHandler {
    /// HTTP-01 챌린지 응답, 그 외 경로는 404
    Challenge(Arc<ChallengeStore>),
    /// 모든 요청을 HTTPS로 301 리다이렉트
    Redirect,
}

impl PlaintextHandler {
    pub async fn handle_request<B>(&self, req: Request<B>) -> Result<Response<ProxyBody>, Infallible> {
        let response = match self {
            PlaintextHandler::Challenge(store) => Self::serve_challenge(store, &req).await,
            PlaintextHandler::Redirect => Self::redirect_to_https(&req),
        };
        Ok(response)
    }

    async fn serve_challenge<B>(store: &ChallengeStore, req: &Request<B>) -> Response<ProxyBody> {
        let token = match req.uri().path().strip_prefix(ACME_CHALLENGE_PREFIX) {
            Some(token) if !token.is_empty() => token,
            _ => return text_response(StatusCode::NOT_FOUND, "404 page not found"),
        };

        match store.get_challenge(token).await {
            Some(key_authorization) => {
                debug!(token = %token, "ACME 챌린지 응답");
                // key authorization은 개행 없이 그대로 응답
                let mut response = Response::new(
                    Full::new(Bytes::from(key_authorization))
                        .map_err(|never| match never {})
                        .boxed_unsync(),
                );
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                );
                response
            }
            None => {
                warn!(token = %token, "알 수 없는 ACME 챌린지 토큰");
                text_response(StatusCode::NOT_FOUND, "404 page not found")
            }
        }
    }

    fn redirect_to_https<B>(req: &Request<B>) -> Response<ProxyBody> {
        let host = match BackendRegistry::extract_host(req) {
            Ok(host) => host,
            Err(e) => return text_response(StatusCode::BAD_REQUEST, format!("Error: {}", e)),
        };

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let location = format!("https://{}{}", host, path_and_query);

        let location = match HeaderValue::from_str(&location) {
            Ok(location) => location,
            Err(e) => return text_response(StatusCode::BAD_REQUEST, format!("Error: {}", e)),
        };

        let mut response = text_response(StatusCode::MOVED_PERMANENTLY, "Moved Permanently");
        response.headers_mut().insert(header::LOCATION, location);
        response
    }

    pub async fn handle_connection<I>(&self, io: I) -> Result<(), hyper::Error>
    where
        I: hyper::rt::Read + hyper::rt::Write + Send + Unpin + 'static,
    {
        http1::Builder::new()
            .serve_connection(io, service_fn(|req| self.handle_request(req)))
            .await
    }
}
