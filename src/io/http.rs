//! HTTP/JSON API
//!
//! Routes:
//! - `POST /ingest` - gateway batch `{"gw": "...", "adv": [...]}`
//! - `GET /stats`, `GET /stats/{mac}` - current tag state
//! - `GET /history/{mac}?limit=&start_time=&end_time=` - tag history
//! - `GET|POST /gateway`, `GET|PUT /gateway/{mac}` - gateway registry
//! - `GET /metrics` (Prometheus), `GET /health`
//!
//! Store calls run on tokio's blocking pool so one slow query never stalls
//! the accept loop.

use crate::domain::clock::Clock;
use crate::domain::error::{GatewayError, StoreError, TagError};
use crate::domain::types::{Gateway, GatewayUpdate, RawAdvertisement};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::prometheus::{format_prometheus_metrics, PROMETHEUS_CONTENT_TYPE};
use crate::services::{
    DerivationEngine, DerivationSettings, GatewayRegistry, HistoryRequest, IngestionPipeline,
};
use crate::store::{EventStore, GatewayStore};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Everything a request handler needs
pub struct ApiState {
    pub pipeline: IngestionPipeline,
    pub engine: DerivationEngine,
    pub registry: GatewayRegistry,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
}

impl ApiState {
    /// Wire all services onto one store that holds both events and gateways
    pub fn new<S>(store: Arc<S>, clock: Arc<dyn Clock>, metrics: Arc<Metrics>, config: &Config) -> Self
    where
        S: EventStore + GatewayStore + 'static,
    {
        Self {
            pipeline: IngestionPipeline::new(store.clone(), clock.clone(), metrics.clone()),
            engine: DerivationEngine::new(
                store.clone(),
                store.clone(),
                clock,
                metrics.clone(),
                DerivationSettings::from_config(config),
            ),
            registry: GatewayRegistry::new(store),
            metrics,
            site_id: config.site_id().to_string(),
        }
    }
}

/// Ingest payload as posted by gateways
#[derive(Debug, Deserialize)]
struct IngestRequest {
    #[serde(default)]
    gw: Option<String>,
    #[serde(default)]
    adv: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    status: &'static str,
    inserted: usize,
}

/// Request failure mapped to an HTTP status
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("request body too large")]
    PayloadTooLarge,
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        let body = serde_json::json!({ "detail": self.to_string() }).to_string();
        response(self.status(), JSON_CONTENT_TYPE, body)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}

impl From<TagError> for ApiError {
    fn from(err: TagError) -> Self {
        match err {
            TagError::NotFound { .. } => ApiError::NotFound("MAC not found".to_string()),
            TagError::Store(e) => e.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Invalid(msg) => ApiError::BadRequest(msg),
            GatewayError::AlreadyExists => ApiError::Conflict("Gateway already exists".to_string()),
            GatewayError::NotFound { .. } => ApiError::NotFound("Gateway not found".to_string()),
            GatewayError::Store(e) => e.into(),
        }
    }
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Full<Bytes>>, ApiError> {
    let body = serde_json::to_vec(value).map_err(|e| ApiError::Internal(format!("serialization failed: {e}")))?;
    Ok(response(status, JSON_CONTENT_TYPE, body))
}

/// Run a store-bound closure on the blocking pool
async fn run_blocking<T, F>(state: &Arc<ApiState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&ApiState) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))?
}

/// Percent-decode one path segment
fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn parse_optional_int(name: &str, value: &str) -> Result<Option<i64>, ApiError> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("query parameter {name} must be an integer")))
}

/// Parse `limit`, `start_time` and `end_time`; other parameters are ignored
fn parse_history_query(query: Option<&str>) -> Result<HistoryRequest, ApiError> {
    let mut request = HistoryRequest::default();
    for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "limit" => request.limit = parse_optional_int(&key, &value)?,
            "start_time" => request.start_time = parse_optional_int(&key, &value)?,
            "end_time" => request.end_time = parse_optional_int(&key, &value)?,
            _ => {}
        }
    }
    Ok(request)
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &Bytes, what: &str) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid {what} payload: {e}")))
}

async fn ingest(state: &Arc<ApiState>, body: Bytes) -> Result<Response<Full<Bytes>>, ApiError> {
    let request: IngestRequest = parse_json(&body, "ingest")?;
    let records: Vec<RawAdvertisement> = request.adv.into_iter().map(RawAdvertisement::from_value).collect();
    let gateway = request.gw;

    let inserted = run_blocking(state, move |s| Ok(s.pipeline.ingest(gateway.as_deref(), &records)?)).await?;
    json_response(StatusCode::OK, &IngestResponse { status: "ok", inserted })
}

/// Dispatch one request to its handler
pub async fn route(
    state: Arc<ApiState>,
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let segments: Vec<String> = path.trim_matches('/').split('/').map(decode_segment).collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    let result = match (method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Ok(response(StatusCode::OK, TEXT_CONTENT_TYPE, "ok")),
        (&Method::GET, ["metrics"]) => Ok(response(
            StatusCode::OK,
            PROMETHEUS_CONTENT_TYPE,
            format_prometheus_metrics(&state.metrics.snapshot(), &state.site_id),
        )),
        (&Method::POST, ["ingest"]) => ingest(&state, body).await,
        (&Method::GET, ["stats"]) => {
            match run_blocking(&state, |s| Ok(s.engine.list_current_states()?)).await {
                Ok(states) => json_response(StatusCode::OK, &states),
                Err(e) => Err(e),
            }
        }
        (&Method::GET, ["stats", mac]) => {
            let mac = mac.to_string();
            match run_blocking(&state, move |s| Ok(s.engine.current_state(&mac)?)).await {
                Ok(tag) => json_response(StatusCode::OK, &tag),
                Err(e) => Err(e),
            }
        }
        (&Method::GET, ["history", mac]) => match parse_history_query(query) {
            Ok(request) => {
                let mac = mac.to_string();
                match run_blocking(&state, move |s| Ok(s.engine.history(&mac, request)?)).await {
                    Ok(history) => json_response(StatusCode::OK, &history),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        },
        (&Method::GET, ["gateway"]) => match run_blocking(&state, |s| Ok(s.registry.list()?)).await {
            Ok(gateways) => json_response(StatusCode::OK, &gateways),
            Err(e) => Err(e),
        },
        (&Method::POST, ["gateway"]) => match parse_json::<Gateway>(&body, "gateway") {
            Ok(request) => match run_blocking(&state, move |s| Ok(s.registry.create(request)?)).await {
                Ok(gateway) => json_response(StatusCode::CREATED, &gateway),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        },
        (&Method::GET, ["gateway", mac]) => {
            let mac = mac.to_string();
            match run_blocking(&state, move |s| Ok(s.registry.get(&mac)?)).await {
                Ok(gateway) => json_response(StatusCode::OK, &gateway),
                Err(e) => Err(e),
            }
        }
        (&Method::PUT, ["gateway", mac]) => match parse_json::<GatewayUpdate>(&body, "gateway update") {
            Ok(update) => {
                let mac = mac.to_string();
                match run_blocking(&state, move |s| Ok(s.registry.update(&mac, update)?)).await {
                    Ok(gateway) => json_response(StatusCode::OK, &gateway),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        },
        (&Method::OPTIONS, _) => {
            let mut preflight = response(StatusCode::NO_CONTENT, TEXT_CONTENT_TYPE, "");
            let headers = preflight.headers_mut();
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, PUT, OPTIONS"));
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
            Ok(preflight)
        }
        _ => Err(ApiError::NotFound("Not Found".to_string())),
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                error!(method = %method, path = %path, error = %e, "http_request_failed");
            }
            e.into_response()
        }
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let err = if e.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::PayloadTooLarge
            } else {
                ApiError::BadRequest(format!("failed to read request body: {e}"))
            };
            warn!(path = %parts.uri.path(), error = %err, "http_body_rejected");
            return Ok(err.into_response());
        }
    };

    let response = route(state, &parts.method, parts.uri.path(), parts.uri.query(), body).await;
    debug!(
        method = %parts.method,
        path = %parts.uri.path(),
        status = %response.status().as_u16(),
        elapsed_us = %started.elapsed().as_micros(),
        "http_request"
    );
    Ok(response)
}

/// Start the API server; returns when `shutdown` flips to true
pub async fn start_api_server(
    addr: SocketAddr,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    info!(addr = %addr, site = %state.site_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::FixedClock;
    use crate::store::InMemoryStore;

    const NOW: i64 = 1_700_000_005;

    fn state() -> Arc<ApiState> {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(NOW));
        Arc::new(ApiState::new(store, clock, Arc::new(Metrics::new()), &Config::default()))
    }

    async fn call(
        state: &Arc<ApiState>,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let response = route(state.clone(), &method, path, query, Bytes::from(body.to_string())).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[test]
    fn test_decode_segment() {
        assert_eq!(decode_segment("aa%3Abb%3acc"), "aa:bb:cc");
        assert_eq!(decode_segment("plain"), "plain");
        assert_eq!(decode_segment("bad%zz%4"), "bad%zz%4");
    }

    #[test]
    fn test_parse_history_query() {
        let request = parse_history_query(Some("limit=5&start_time=10&end_time=&foo=bar")).unwrap();
        assert_eq!(request, HistoryRequest { limit: Some(5), start_time: Some(10), end_time: None });
        assert!(parse_history_query(Some("limit=ten")).is_err());
        assert_eq!(parse_history_query(None).unwrap(), HistoryRequest::default());
    }

    #[test]
    fn test_parse_history_query_decodes_escapes() {
        let request = parse_history_query(Some("limit=%35")).unwrap();
        assert_eq!(request.limit, Some(5));

        let request = parse_history_query(Some("start%5Ftime=10&end_time=%2B20")).unwrap();
        assert_eq!(request.start_time, Some(10));
        assert_eq!(request.end_time, Some(20));
    }

    #[tokio::test]
    async fn test_ingest_then_stats() {
        let state = state();
        let (status, body) = call(
            &state,
            Method::POST,
            "/ingest",
            None,
            r#"{"gw": "gw1", "adv": [{"mac": "AA:11:22:33:44:55", "rssi": -60, "tm": 1700000000}, {"mac": "BB"}]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["inserted"], 1);

        let (status, body) = call(&state, Method::GET, "/stats/aa%3A11%3A22%3A33%3A44%3A55", None, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mac"], "aa:11:22:33:44:55");
        assert_eq!(body["last_rssi"], -60);
        assert_eq!(body["gateway"], "gw1");
        assert_eq!(body["last_seen"], 1700000000);
        assert_eq!(body["presence"], "present");

        let (status, body) = call(&state, Method::GET, "/stats", None, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_invalid_ingest_body_is_bad_request() {
        let state = state();
        let (status, body) = call(&state, Method::POST, "/ingest", None, "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("invalid ingest payload"));
    }

    #[tokio::test]
    async fn test_history_and_not_found() {
        let state = state();
        let (status, body) = call(&state, Method::GET, "/history/aa", None, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "MAC not found");

        call(
            &state,
            Method::POST,
            "/ingest",
            None,
            r#"{"gw": "gw1", "adv": [{"mac": "aa", "rssi": -1, "tm": 10}, {"mac": "aa", "rssi": -2, "tm": 20}, {"mac": "aa", "rssi": -3, "tm": 30}]}"#,
        )
        .await;

        let (status, body) = call(&state, Method::GET, "/history/AA", Some("limit=2"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["entries"][0]["timestamp"], 30);
        assert_eq!(body["entries"][1]["rssi"], -2);
        assert_eq!(body["entries"][0]["gateway"], "gw1");

        let (status, _) = call(&state, Method::GET, "/history/aa", Some("start_time=abc"), "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_gateway_routes() {
        let state = state();
        let payload = r#"{"name": "Dock", "mac": "AA:BB:CC", "geolocation": {"latitude": -23.55, "longitude": -46.63}}"#;

        let (status, body) = call(&state, Method::POST, "/gateway", None, payload).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["mac"], "aabbcc");

        let (status, _) = call(&state, Method::POST, "/gateway", None, payload).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&state, Method::PUT, "/gateway/AA:BB:CC", None, r#"{"name": "Dock 2"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Dock 2");

        let (status, body) = call(&state, Method::GET, "/gateway", None, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["geolocation"]["latitude"], -23.55);

        let (status, _) = call(&state, Method::GET, "/gateway/ffff", None, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_include_synthetic_position() {
        let state = state();
        call(
            &state,
            Method::POST,
            "/gateway",
            None,
            r#"{"name": "Dock", "mac": "gw1", "geolocation": {"latitude": 10.0, "longitude": 20.0}}"#,
        )
        .await;
        call(&state, Method::POST, "/ingest", None, r#"{"gw": "gw1", "adv": [{"mac": "aa", "rssi": -1}]}"#).await;

        let (_, body) = call(&state, Method::GET, "/stats", None, "").await;
        let lat = body[0]["latitude"].as_f64().unwrap();
        assert!((lat - 10.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_health_metrics_and_unknown_route() {
        let state = state();
        let response = route(state.clone(), &Method::GET, "/health", None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = route(state.clone(), &Method::GET, "/metrics", None, Bytes::new()).await;
        let text = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&text).contains("tag_tracker_records_inserted_total"));

        let (status, _) = call(&state, Method::DELETE, "/stats", None, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
