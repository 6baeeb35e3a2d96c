//! HTTP/HTTPS endpoints using Pingora
//!
//! Nothing is proxied upstream. Every request is answered locally:
//! `/install-root-ca` hands out the root CA so clients can trust it, any
//! other path gets a 1x1 transparent GIF. The HTTPS listener selects its
//! certificate per handshake through [`CertificateBinding`].

use crate::config::ServerConfig;
use crate::tls::{CertificateBinding, create_sni_callbacks};
use async_trait::async_trait;
use bytes::Bytes;
use pingora_core::listeners::tls::TlsSettings;
use pingora_core::prelude::*;
use pingora_core::server::configuration::ServerConf;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};
use std::time::Instant;

pub const INSTALL_ROOT_CA_PATH: &str = "/install-root-ca";

/// 1x1 transparent GIF
pub const PIXEL_GIF: &[u8] = &[
    71, 73, 70, 56, 57, 97, 1, 0, 1, 0, 128, 0, 0, 255, 255, 255, 0, 0, 0, 33, 249, 4, 1, 0, 0, 0,
    0, 44, 0, 0, 0, 0, 1, 0, 1, 0, 0, 2, 2, 68, 1, 0, 59,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    InstallRootCa,
    Pixel,
}

impl Route {
    pub fn for_path(path: &str) -> Self {
        if path.starts_with(INSTALL_ROOT_CA_PATH) {
            Route::InstallRootCa
        } else {
            Route::Pixel
        }
    }
}

/// Needle HTTP service
pub struct NeedleHttp {
    root_ca_pem: Bytes,
}

impl NeedleHttp {
    pub fn new(root_ca_pem: impl Into<Bytes>) -> Self {
        Self {
            root_ca_pem: root_ca_pem.into(),
        }
    }

    async fn respond(
        &self,
        session: &mut Session,
        content_type: &str,
        body: Bytes,
    ) -> Result<()> {
        let mut header = ResponseHeader::build(200, None)?;
        header.insert_header("Content-Type", content_type)?;
        header.insert_header("Content-Length", body.len().to_string())?;
        header.insert_header("Accept-Ranges", "bytes")?;
        session
            .write_response_header(Box::new(header), false)
            .await?;
        session.write_response_body(Some(body), true).await?;
        Ok(())
    }
}

pub struct RequestCtx {
    started: Instant,
    route: Option<Route>,
}

#[async_trait]
impl ProxyHttp for NeedleHttp {
    type CTX = RequestCtx;

    fn new_ctx(&self) -> Self::CTX {
        RequestCtx {
            started: Instant::now(),
            route: None,
        }
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let route = Route::for_path(session.req_header().uri.path());
        ctx.route = Some(route);

        match route {
            Route::InstallRootCa => {
                self.respond(session, "application/x-x509-ca-cert", self.root_ca_pem.clone())
                    .await?
            }
            Route::Pixel => {
                self.respond(session, "image/gif", Bytes::from_static(PIXEL_GIF))
                    .await?
            }
        }

        Ok(true)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        // request_filter answers every request
        Err(Error::new(ErrorType::ConnectNoRoute))
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);

        let host = session
            .req_header()
            .headers
            .get("host")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("-");

        let path = session.req_header().uri.path();
        let method = session.req_header().method.as_str();
        let https = session
            .digest()
            .map(|d| d.ssl_digest.is_some())
            .unwrap_or(false);
        let client = session
            .client_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());

        if let Some(e) = e {
            tracing::warn!(
                host = host,
                method = method,
                path = path,
                client = %client,
                "Request failed: {}", e
            );
            return;
        }

        tracing::debug!(
            host = host,
            method = method,
            path = path,
            status = status,
            https = https,
            client = %client,
            route = ?ctx.route,
            duration_ms = ctx.started.elapsed().as_millis() as u64,
            "Request completed"
        );
    }
}

/// Build the Pingora server: plain HTTP plus TLS with on-demand certificates.
pub fn build_server(
    config: &ServerConfig,
    binding: CertificateBinding,
    root_ca_pem: impl Into<Bytes>,
) -> Result<Server> {
    let mut conf = ServerConf::default();
    conf.grace_period_seconds = Some(config.grace_period.as_secs());
    conf.graceful_shutdown_timeout_seconds = Some(config.shutdown_timeout.as_secs());
    let mut server = Server::new_with_opt_and_conf(None, conf);
    server.bootstrap();

    let mut service =
        pingora_proxy::http_proxy_service(&server.configuration, NeedleHttp::new(root_ca_pem));

    service.add_tcp(&config.http_addr());
    tracing::info!(port = config.http_port, "HTTP listener enabled");

    let callbacks = create_sni_callbacks(binding);
    let mut tls_settings = TlsSettings::with_callbacks(callbacks).map_err(|e| {
        Error::explain(
            ErrorType::InternalError,
            format!("Failed to create TLS settings with SNI callbacks: {}", e),
        )
    })?;
    tls_settings.enable_h2();
    service.add_tls_with_settings(&config.https_addr(), None, tls_settings);
    tracing::info!(
        port = config.https_port,
        "HTTPS listener enabled with on-demand certificates"
    );

    server.add_service(service);
    Ok(server)
}
