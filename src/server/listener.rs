use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use hyper_util::rt::TokioIo;
use tracing::{debug, error, info, warn};

use crate::cert::{CertError, PlaintextHandler};
use crate::settings::ServerSettings;
use crate::tls::SniAcceptor;
use super::error::Error;
use super::handler::RequestHandler;
use super::Result;

/// 평문(ACME 챌린지/리다이렉트)과 TLS 두 리스너입니다. 둘 다 바인딩되어야 서버가 시작됩니다.
pub struct ServerListener {
    http_listener: TcpListener,
    https_listener: TcpListener,
}

impl ServerListener {
    pub async fn bind(settings: &ServerSettings) -> Result<Self> {
        let http_listener = Self::bind_port(SocketAddr::new(settings.bind_addr, settings.http_port)).await?;
        info!(addr = %http_listener.local_addr()?, mode = ?settings.http_mode, "HTTP 리스너 시작");

        let https_listener = Self::bind_port(SocketAddr::new(settings.bind_addr, settings.https_port)).await?;
        info!(addr = %https_listener.local_addr()?, "HTTPS 리스너 시작");

        Ok(Self {
            http_listener,
            https_listener,
        })
    }

    async fn bind_port(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr).await.map_err(|e| {
            error!(error = %e, addr = %addr, "포트 바인딩 실패");
            Error::Bind { addr, source: e }
        })
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http_listener.local_addr()?)
    }

    pub fn https_addr(&self) -> Result<SocketAddr> {
        Ok(self.https_listener.local_addr()?)
    }

    /// 평문 리스너는 백그라운드 태스크로, TLS 리스너는 현재 태스크에서 실행합니다.
    ///
    /// 어느 한쪽이라도 멈추면 에러를 반환합니다.
    pub async fn run(
        self,
        handler: Arc<RequestHandler>,
        plaintext: PlaintextHandler,
        acceptor: SniAcceptor,
    ) -> Result<()> {
        let plaintext = Arc::new(plaintext);
        let http_listener = self.http_listener;
        let mut plaintext_task = tokio::spawn(async move {
            Self::serve_plaintext(http_listener, plaintext).await
        });

        tokio::select! {
            result = &mut plaintext_task => {
                let reason = match result {
                    Ok(()) => "HTTP 리스너 종료".to_string(),
                    Err(e) => format!("HTTP 리스너 태스크 실패: {}", e),
                };
                error!(reason = %reason, "HTTP 리스너가 멈춤");
                Err(Error::ListenerStopped(reason))
            }
            _ = Self::serve_tls(self.https_listener, handler, acceptor) => {
                plaintext_task.abort();
                Err(Error::ListenerStopped("HTTPS 리스너 종료".to_string()))
            }
        }
    }

    async fn serve_plaintext(listener: TcpListener, plaintext: Arc<PlaintextHandler>) {
        loop {
            match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    let plaintext = plaintext.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        if let Err(err) = plaintext.handle_connection(io).await {
                            debug!(error = %err, remote = %remote_addr, "HTTP 연결 처리 실패");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "HTTP 연결 수락 실패");
                }
            }
        }
    }

    async fn serve_tls(listener: TcpListener, handler: Arc<RequestHandler>, acceptor: SniAcceptor) {
        loop {
            match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    let handler = handler.clone();
                    let acceptor = acceptor.clone();

                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                let io = TokioIo::new(tls_stream);
                                if let Err(err) = handler.handle_connection(io, Some(remote_addr)).await {
                                    debug!(error = %err, remote = %remote_addr, "HTTPS 연결 처리 실패");
                                }
                            }
                            Err(e @ (CertError::Acme { .. } | CertError::Cache { .. } | CertError::Backoff { .. })) => {
                                error!(error = %e, remote = %remote_addr, "인증서를 준비할 수 없어 핸드셰이크 거부");
                            }
                            Err(e) => {
                                warn!(error = %e, remote = %remote_addr, "TLS 핸드셰이크 실패");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "HTTPS 연결 수락 실패");
                }
            }
        }
    }
}
