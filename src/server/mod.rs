pub mod shutdown;

use crate::config::Config;
use crate::error::WafError;
use crate::geoip::GeoLocator;
use crate::inspector;
use crate::metrics::MetricsCollector;
use crate::model::RequestLog;
use crate::proxy::instrument::{AuditTicket, InstrumentedBody};
use crate::proxy::ReverseProxy;
use crate::storage::{seed, MemoryStore};
use crate::waf::{Outcome, Pipeline, Verdict};
use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Unified response body: buffered JSON for gateway-produced responses,
/// instrumented origin stream for forwarded ones.
pub type GatewayBody = BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone)]
pub struct Server {
    config: Arc<Config>,
    store: Arc<MemoryStore>,
    pipeline: Arc<Pipeline>,
    proxy: Arc<ReverseProxy>,
    metrics: Arc<MetricsCollector>,
    shutdown_coordinator: Arc<shutdown::ShutdownCoordinator>,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        let mut store = MemoryStore::new();
        if let Some(ref log_file) = config.storage.log_file {
            store = store
                .with_log_mirror(log_file)
                .context("Failed to open audit log mirror")?;
            info!("Audit log mirrored to {}", log_file.display());
        }
        let store = Arc::new(store);

        match config.storage.seed_path {
            Some(ref seed_path) => {
                let seed_file = seed::parse_seed_file(seed_path)?;
                seed::apply_seed(&store, seed_file).await;
            }
            None if config.waf.default_rules => {
                for rule in crate::waf::rules::default_rules() {
                    store.insert_rule(rule).await;
                }
                info!("No seed file configured, installed built-in global ruleset");
            }
            None => {
                warn!("No seed file and default rules disabled: rule stage has nothing to match");
            }
        }

        let metrics = Arc::new(MetricsCollector::new());
        let locator = Arc::new(GeoLocator::new(&config.geoip));
        let pipeline = Arc::new(Pipeline::new(
            &config,
            Arc::clone(&store),
            locator,
            Arc::clone(&metrics),
        ));
        let proxy = Arc::new(ReverseProxy::new(&config.proxy)?);
        let shutdown_coordinator = Arc::new(shutdown::ShutdownCoordinator::new(
            config.server.shutdown_timeout_secs,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            pipeline,
            proxy,
            metrics,
            shutdown_coordinator,
        })
    }

    pub async fn serve(self) -> Result<()> {
        let addr_str = format!("{}:{}", self.config.server.host, self.config.server.port);
        let addr: SocketAddr = addr_str
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve address: '{addr_str}'"))?
            .next()
            .with_context(|| format!("No addresses resolved for: '{addr_str}'"))?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to address: {addr}"))?;

        info!("Gateway listening on http://{}", addr);
        info!(
            "Default upstream: {}",
            self.config.proxy.default_upstream
        );

        let server = Arc::new(self);

        let shutdown_handle = tokio::spawn(shutdown::setup_signal_handler(Arc::clone(
            &server.shutdown_coordinator,
        )));

        let mut shutdown_rx = server.shutdown_coordinator.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            if server.shutdown_coordinator.is_shutting_down() {
                                debug!("Rejecting new connection during shutdown from {}", remote_addr);
                                continue;
                            }

                            let server = Arc::clone(&server);
                            server.shutdown_coordinator.inc_connections();
                            server.metrics.inc_active_connections();

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                server.serve_connection(io, remote_addr).await;
                                server.metrics.dec_active_connections();
                                server.shutdown_coordinator.dec_connections();
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        let _ = shutdown_handle.await;

        Ok(())
    }

    async fn serve_connection<I>(&self, io: I, remote_addr: SocketAddr)
    where
        I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let server = Arc::new(self.clone());

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { server.handle_request(req, remote_addr).await }
        });

        if self.config.server.enable_http2 {
            if let Err(err) = http2::Builder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                debug!("Error serving HTTP/2 connection: {}", err);
            }
        } else if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            debug!("Error serving HTTP/1.1 connection: {}", err);
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<GatewayBody>> {
        let started = Instant::now();
        let path = req.uri().path().to_string();

        // Control plane never enters the pipeline.
        if self.config.metrics.enable && path == self.config.metrics.endpoint {
            let output = crate::metrics::export_metrics()?;
            return Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain; version=0.0.4")
                .body(full_body(Bytes::from(output)))?);
        }
        if path == "/_health" {
            return self.handle_health().await;
        }

        let (parts, body) = req.into_parts();
        let body_bytes = match Limited::new(body, self.config.server.max_body_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(_) => {
                return json_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &json!({
                        "error": "Payload Too Large",
                        "message": format!(
                            "Request body exceeds the {} byte limit",
                            self.config.server.max_body_bytes
                        ),
                    }),
                );
            }
        };

        let request = inspector::extract(&parts, &body_bytes, Some(remote_addr));
        let verdict = self.pipeline.decide(&request).await;

        match verdict.outcome {
            Outcome::Blocked {
                status,
                ref body,
                ref attack_type,
                ..
            } => {
                warn!(
                    ip = %request.ip_address,
                    path = %request.path,
                    attack_type = %attack_type,
                    "Request blocked"
                );
                let ticket = self.audit_ticket(&verdict, true, started);
                ticket.finalize(status);
                json_response(StatusCode::from_u16(status)?, body)
            }
            Outcome::Allowed => {
                let ticket = verdict
                    .audit_armed
                    .then(|| self.audit_ticket(&verdict, false, started));
                self.forward(parts, body_bytes, &verdict, ticket).await
            }
        }
    }

    async fn forward(
        &self,
        parts: hyper::http::request::Parts,
        body_bytes: Bytes,
        verdict: &Verdict,
        ticket: Option<AuditTicket>,
    ) -> Result<Response<GatewayBody>> {
        let client_ip = verdict.sanitized.ip_address.clone();
        let result = self
            .proxy
            .forward(
                &parts,
                body_bytes,
                &client_ip,
                verdict.proxy_target.as_deref(),
            )
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let (resp_parts, resp_body) = response.into_parts();

                let body: GatewayBody = match ticket {
                    Some(ticket) => InstrumentedBody::new(resp_body, ticket, status)
                        .map_err(into_boxed_error)
                        .boxed(),
                    None => resp_body.map_err(into_boxed_error).boxed(),
                };

                Ok(Response::from_parts(resp_parts, body))
            }
            Err(e) => {
                self.metrics.inc_proxy_error();
                error!("Origin forward failed: {}", e);

                // No bytes reached the client yet, so fail closed with a 502
                // and settle the audit entry now.
                if let Some(ticket) = ticket {
                    ticket.finalize(502);
                }
                let details = match e {
                    WafError::ProxyUnreachable { ref reason, .. } => reason.clone(),
                    ref other => other.to_string(),
                };
                json_response(
                    StatusCode::BAD_GATEWAY,
                    &json!({
                        "error": "Bad Gateway",
                        "message": "Failed to reach the origin server",
                        "details": details,
                    }),
                )
            }
        }
    }

    fn audit_ticket(&self, verdict: &Verdict, blocked: bool, started: Instant) -> AuditTicket {
        let (attack_type, rule_id) = match &verdict.outcome {
            Outcome::Blocked {
                attack_type,
                rule_id,
                ..
            } => (Some(attack_type.clone()), *rule_id),
            Outcome::Allowed => match &verdict.log_match {
                Some(matched) => (Some(matched.attack_type.clone()), Some(matched.rule_id)),
                None => (None, None),
            },
        };

        let template = RequestLog {
            id: 0,
            ip_address: verdict.sanitized.ip_address.clone(),
            method: verdict.sanitized.method.clone(),
            path: verdict.sanitized.path.clone(),
            headers: verdict.sanitized.headers.clone(),
            body: verdict.sanitized.body.clone(),
            is_blocked: blocked,
            attack_type,
            rule_id,
            response_status: 0,
            response_time_ms: 0,
            domain_id: verdict.domain_id,
            country_code: verdict.country.clone(),
            timestamp: Utc::now(),
        };

        AuditTicket::new(
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            template,
            started,
        )
    }

    async fn handle_health(&self) -> Result<Response<GatewayBody>> {
        let state = self.store.get_waf_state().await;
        let body = json!({
            "status": "healthy",
            "domains": self.store.get_all_domains().await.len(),
            "rules": self.store.get_all_rules().await.len(),
            "total_requests": state.total_requests,
            "total_blocked": state.total_blocked,
            "avg_response_time_ms": state.avg_response_time_ms,
        });
        json_response(StatusCode::OK, &body)
    }
}

fn full_body(bytes: Bytes) -> GatewayBody {
    Full::new(bytes).map_err(into_boxed_error).boxed()
}

fn json_response(status: StatusCode, body: &Value) -> Result<Response<GatewayBody>> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(Bytes::from(body.to_string())))?)
}

fn into_boxed_error<E>(error: E) -> Box<dyn std::error::Error + Send + Sync>
where
    E: std::error::Error + Send + Sync + 'static,
{
    Box::new(error)
}
