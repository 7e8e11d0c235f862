// src/interception/http_interceptor.rs
//! HTTP front of the mock server
//!
//! One listener serves both the operator API under `/api/` and the
//! interception entry point for every other path and method. Non-primary
//! instances relay intercepted calls to the primary; the primary holds them
//! in the pending registry while an operator watches the event stream.

use crate::broker::event_bus::{Notification, ObserverMode, Subscription};
use crate::broker::leader::LeaderSelector;
use crate::interception::forwarder::{ForwardingProxy, FORWARDED_HEADER};
use crate::interception::handler::{InboundCall, Interceptor};
use crate::recording::models::{ConfigInput, HistoryQuery, SshConfigInput};
use crate::utils::errors::{MockError, Result};
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL, CONNECTION, CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

/// Body type of every response served here
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Configuration for the HTTP front
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Content type of intercepted-call replies
    pub response_content_type: String,

    /// Interval between `ping` frames on observer streams
    pub keepalive_interval: Duration,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            response_content_type: "application/xml; charset=utf-8".to_string(),
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondRequest {
    request_id: String,
    response_body: String,
}

#[derive(Debug, Deserialize)]
struct AddRuleRequest {
    #[serde(rename = "configID", alias = "configId", default)]
    config_id: i64,
    #[serde(default)]
    keyword: String,
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct UpdateRuleRequest {
    #[serde(default)]
    keyword: String,
    #[serde(default)]
    response: String,
}

/// HTTP listener for the operator API and intercepted calls
pub struct HttpInterceptor {
    config: InterceptorConfig,
    interceptor: Arc<Interceptor>,
    leader: Arc<LeaderSelector>,
    forwarder: Arc<ForwardingProxy>,
}

impl HttpInterceptor {
    /// Create a new HTTP front
    pub fn new(
        config: InterceptorConfig,
        interceptor: Arc<Interceptor>,
        leader: Arc<LeaderSelector>,
        forwarder: Arc<ForwardingProxy>,
    ) -> Self {
        Self {
            config,
            interceptor,
            leader,
            forwarder,
        }
    }

    /// Accept connections on `listener` until `shutdown` fires
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("HTTP interceptor listening on {}", addr);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("HTTP interceptor on {} stopped", addr);
                    return Ok(());
                }
            };

            let front = Arc::clone(&self);
            tokio::spawn(async move {
                debug!("Accepted connection from {}", peer);

                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let front = Arc::clone(&front);
                    async move { front.handle_request(req).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }

    /// Handle one request; failures become JSON error bodies
    pub async fn handle_request<B>(self: Arc<Self>, req: Request<B>) -> std::result::Result<Response<ResponseBody>, Infallible>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Display,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let mut response = match self.route(req).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    error!("{} {} failed: {}", method, path, e);
                } else {
                    debug!("{} {} rejected: {}", method, path, e);
                }
                error_response(status, &e.to_string())
            }
        };

        response
            .headers_mut()
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        Ok(response)
    }

    async fn route<B>(&self, req: Request<B>) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Display,
    {
        if req.method() == Method::OPTIONS {
            return Ok(preflight_response());
        }

        let path = req.uri().path().to_string();
        if path == "/api" || path.starts_with("/api/") {
            return self.route_api(req, &path).await;
        }

        self.intercept(req).await
    }

    async fn route_api<B>(&self, req: Request<B>, path: &str) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Display,
    {
        let query = parse_query(req.uri().query());
        let store = self.interceptor.store();

        match (req.method(), path) {
            (&Method::GET, "/api/events") => self.observer_stream(&query).await,
            (&Method::POST, "/api/events/forward") => self.forward_event(req).await,
            (&Method::POST, "/api/respond") => self.respond(req).await,
            (&Method::GET, "/api/services") => self.services().await,

            (&Method::POST, "/api/config") => {
                let input: ConfigInput = read_json(req).await?;
                store.set_config(&input).await?;
                Ok(json_response(StatusCode::OK, &json!({"status": "Configuration saved successfully"})))
            }
            (&Method::GET, "/api/configs") => Ok(json_response(StatusCode::OK, &store.list_configs().await?)),
            (&Method::GET, "/api/configs/sources") => {
                Ok(json_response(StatusCode::OK, &store.config_sources().await?))
            }

            (&Method::POST, "/api/rules") => {
                let input: AddRuleRequest = read_json(req).await?;
                let rule = store.add_rule(input.config_id, &input.keyword, &input.response).await?;
                Ok(json_response(StatusCode::OK, &rule))
            }

            (&Method::POST, "/api/ssh/config") => {
                let input: SshConfigInput = read_json(req).await?;
                let saved = store.set_ssh_config(&input).await?;
                Ok(json_response(StatusCode::OK, &saved))
            }
            (&Method::GET, "/api/ssh/configs") => Ok(json_response(StatusCode::OK, &store.list_ssh_configs().await?)),
            (&Method::GET, "/api/ssh/history") => {
                let page = store.list_ssh_events(&history_query(&query)).await?;
                Ok(json_response(StatusCode::OK, &page))
            }

            (&Method::GET, "/api/history") => {
                let page = store.list_events(&history_query(&query)).await?;
                Ok(json_response(StatusCode::OK, &page))
            }
            (&Method::GET, "/api/history/sources") => Ok(json_response(StatusCode::OK, &store.event_sources().await?)),

            (method, _) => {
                let method = method.clone();
                self.route_api_resource(req, &method, path, &query).await
            }
        }
    }

    /// Routes carrying an identifier in the path
    async fn route_api_resource<B>(
        &self,
        req: Request<B>,
        method: &Method,
        path: &str,
        query: &HashMap<String, String>,
    ) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Display,
    {
        let store = self.interceptor.store();
        let source = query.get("source").map(String::as_str).unwrap_or("");

        if let Some(rest) = path.strip_prefix("/api/config/") {
            let endpoint = format!("/{}", decode_segment(rest));
            return match *method {
                Method::GET => match store.get_config(&endpoint, source).await? {
                    Some(config) => Ok(json_response(StatusCode::OK, &config)),
                    None => Err(MockError::NotFound("Configuration not found".to_string())),
                },
                Method::DELETE => {
                    if !store.delete_config(&endpoint, source).await? {
                        return Err(MockError::NotFound("Configuration not found".to_string()));
                    }
                    Ok(json_response(StatusCode::OK, &json!({"status": "Configuration deleted successfully"})))
                }
                _ => Err(MockError::NotFound(format!("No route for {} {}", method, path))),
            };
        }

        if let Some(rest) = path.strip_prefix("/api/rules/") {
            let rule_id: i64 = rest
                .parse()
                .map_err(|_| MockError::BadRequest("Invalid rule ID".to_string()))?;
            return match *method {
                Method::PUT => {
                    let input: UpdateRuleRequest = read_json(req).await?;
                    let rule = store.update_rule(rule_id, &input.keyword, &input.response).await?;
                    Ok(json_response(StatusCode::OK, &rule))
                }
                Method::DELETE => {
                    store.delete_rule(rule_id).await?;
                    Ok(json_response(StatusCode::OK, &json!({"status": "Rule deleted successfully"})))
                }
                _ => Err(MockError::NotFound(format!("No route for {} {}", method, path))),
            };
        }

        if let Some(rest) = path.strip_prefix("/api/ssh/config/") {
            let command = decode_segment(rest);
            return match *method {
                Method::GET => match store.ssh_config_for_command(&command).await? {
                    Some(config) => Ok(json_response(StatusCode::OK, &config)),
                    None => Err(MockError::NotFound("SSH configuration not found".to_string())),
                },
                Method::DELETE => {
                    if !store.delete_ssh_config(&command).await? {
                        return Err(MockError::NotFound("SSH configuration not found".to_string()));
                    }
                    Ok(json_response(StatusCode::OK, &json!({"status": "SSH configuration deleted successfully"})))
                }
                _ => Err(MockError::NotFound(format!("No route for {} {}", method, path))),
            };
        }

        Err(MockError::NotFound(format!("No route for {} {}", method, path)))
    }

    /// Interception entry point for every non-API path
    async fn intercept<B>(&self, req: Request<B>) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let body = read_body(body).await?;

        let forwarded_from = parts
            .headers
            .get(FORWARDED_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        if forwarded_from.is_none() {
            let status = self.leader.is_primary().await;
            if !status.is_primary {
                let response = self.forwarder.forward(&parts, body, status.primary.as_ref()).await?;
                return Ok(response.map(|body| body.boxed_unsync()));
            }
        }

        let call = InboundCall {
            endpoint: parts.uri.path().to_string(),
            source: forwarded_from.unwrap_or_else(|| self.leader.local_address().to_string()),
            payload: String::from_utf8_lossy(&body).into_owned(),
        };

        // Dropping this future (caller hung up) drops the guard and cancels
        // the token seen by the intercept task.
        let caller_gone = CancellationToken::new();
        let guard = caller_gone.clone().drop_guard();
        let interceptor = Arc::clone(&self.interceptor);
        let outcome = tokio::spawn(async move { interceptor.intercept(call, caller_gone).await })
            .await
            .map_err(|e| MockError::Internal(format!("Intercept task failed: {}", e)))??;
        guard.disarm();

        let mut response = Response::new(full(outcome.body.unwrap_or_default()));
        let content_type = HeaderValue::from_str(&self.config.response_content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("text/plain"));
        response.headers_mut().insert(CONTENT_TYPE, content_type);
        Ok(response)
    }

    async fn respond<B>(&self, req: Request<B>) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Display,
    {
        if !self.leader.is_primary().await.is_primary {
            return Err(MockError::Forbidden(
                "Only the primary broker can handle responses.".to_string(),
            ));
        }

        let body = read_body(req.into_body()).await?;
        let request: RespondRequest = serde_json::from_slice(&body)
            .map_err(|_| MockError::BadRequest("Invalid request format".to_string()))?;

        if !self.interceptor.resolve(&request.request_id, &request.response_body) {
            return Err(MockError::NotFound(
                "Request ID not found or already processed".to_string(),
            ));
        }

        Ok(json_response(StatusCode::OK, &json!({"status": "Response processed by primary."})))
    }

    async fn forward_event<B>(&self, req: Request<B>) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Display,
    {
        if !self.leader.is_primary().await.is_primary {
            return Err(MockError::Forbidden("Not the primary broker".to_string()));
        }

        let body = read_body(req.into_body()).await?;
        let notification: Notification = serde_json::from_slice(&body)
            .map_err(|e| MockError::BadRequest(format!("Invalid notification: {}", e)))?;
        self.interceptor.bus().publish(&notification);

        Ok(json_response(StatusCode::OK, &json!({"status": "event forwarded successfully"})))
    }

    async fn services(&self) -> Result<Response<ResponseBody>> {
        let status = self.leader.is_primary().await;
        let services = self.leader.active_instances().await?;
        let primary = status.primary.map(|p| p.address).unwrap_or_default();

        Ok(json_response(StatusCode::OK, &json!({"primary": primary, "services": services})))
    }

    /// Server-sent event stream for one observer
    async fn observer_stream(&self, query: &HashMap<String, String>) -> Result<Response<ResponseBody>> {
        if !self.leader.is_primary().await.is_primary {
            return Ok(error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Not the primary broker. Please connect to the primary.",
            ));
        }

        let mode = ObserverMode::from_query(query.get("mode").map(String::as_str));
        let subscription = self.interceptor.bus().subscribe(mode);
        let (tx, rx) = mpsc::channel::<Bytes>(16);

        tokio::spawn(pump_observer(
            Arc::clone(&self.interceptor),
            subscription,
            tx,
            self.config.keepalive_interval,
        ));

        let frames = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, Infallible>(Frame::data(chunk)), rx))
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive")
            .body(StreamBody::new(frames).boxed_unsync())
            .map_err(|e| MockError::Internal(format!("Response build error: {}", e)))
    }
}

/// Feed one observer's stream until it disconnects. The last interactive
/// observer to leave drains the pending registry.
async fn pump_observer(
    interceptor: Arc<Interceptor>,
    mut subscription: Subscription,
    tx: mpsc::Sender<Bytes>,
    keepalive: Duration,
) {
    let id = subscription.id();
    let mode = subscription.mode();

    if tx.send(sse_frame("connected", r#"{"status": "ok"}"#)).await.is_ok() {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);

        loop {
            tokio::select! {
                notification = subscription.recv() => {
                    let Some(notification) = notification else { break };
                    let data = match serde_json::to_string(&notification) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!("Failed to encode notification {}: {}", notification.request_id(), e);
                            continue;
                        }
                    };
                    if tx.send(sse_frame("message", &data)).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(sse_frame("ping", "keep-alive")).await.is_err() {
                        break;
                    }
                }
                _ = tx.closed() => break,
            }
        }
    }

    let remaining = interceptor.bus().unsubscribe(id);
    if mode == ObserverMode::Interactive && remaining == 0 {
        let drained = interceptor.drain();
        if drained > 0 {
            info!("Last operator left, {} pending calls answered with defaults", drained);
        }
    }
}

/// One server-sent event frame
pub fn sse_frame(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", event, data))
}

/// Parse a query string into a map; later duplicates win
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}

fn decode_segment(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn history_query(query: &HashMap<String, String>) -> HistoryQuery {
    let defaults = HistoryQuery::default();
    let text = |key: &str| query.get(key).filter(|v| !v.is_empty()).cloned();

    HistoryQuery {
        page: query
            .get("page")
            .and_then(|v| v.parse().ok())
            .filter(|page| *page > 0)
            .unwrap_or(defaults.page),
        page_size: query
            .get("pageSize")
            .and_then(|v| v.parse().ok())
            .filter(|size| *size > 0)
            .unwrap_or(defaults.page_size),
        project: text("project"),
        search: text("search"),
        source: text("source"),
    }
}

async fn read_body<B>(body: B) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    Ok(body
        .collect()
        .await
        .map_err(|e| MockError::BadRequest(format!("Body read error: {}", e)))?
        .to_bytes())
}

async fn read_json<T, B>(req: Request<B>) -> Result<T>
where
    T: DeserializeOwned,
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let body = read_body(req.into_body()).await?;
    serde_json::from_slice(&body).map_err(|e| MockError::BadRequest(format!("Invalid request format: {}", e)))
}

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into()).boxed_unsync()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Create error response
fn error_response(status: StatusCode, message: &str) -> Response<ResponseBody> {
    let body = json!({ "error": message }).to_string();
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn preflight_response() -> Response<ResponseBody> {
    let mut response = Response::new(full(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization, X-Forwarded-For-Service"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::event_bus::{EventBus, HttpCallNotice};
    use crate::broker::pending::PendingRegistry;
    use crate::interception::handler::InterceptorSettings;
    use crate::recording::models::CallStatus;
    use crate::recording::storage::MockStore;
    use chrono::Utc;

    const LOCAL: &str = "127.0.0.1:18080";

    struct Fixture {
        front: Arc<HttpInterceptor>,
        store: Arc<MockStore>,
        interceptor: Arc<Interceptor>,
    }

    async fn fixture(register_local: bool) -> Fixture {
        let store = Arc::new(MockStore::in_memory().await.unwrap());
        if register_local {
            store.upsert_instance(LOCAL, "http", Utc::now()).await.unwrap();
        }

        let interceptor = Arc::new(Interceptor::new(
            Arc::clone(&store),
            Arc::new(EventBus::new(1)),
            Arc::new(PendingRegistry::new()),
            InterceptorSettings {
                wait_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        ));
        let leader = Arc::new(LeaderSelector::new(Arc::clone(&store), LOCAL, Duration::from_secs(10)));
        let forwarder = Arc::new(ForwardingProxy::new(LOCAL, Duration::from_secs(1)));
        let front = Arc::new(HttpInterceptor::new(
            InterceptorConfig::default(),
            Arc::clone(&interceptor),
            leader,
            forwarder,
        ));

        Fixture {
            front,
            store,
            interceptor,
        }
    }

    fn request(method: Method, uri: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn send(front: &Arc<HttpInterceptor>, req: Request<Full<Bytes>>) -> (StatusCode, String) {
        let response = Arc::clone(front).handle_request(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[test]
    fn test_parse_query() {
        let query = parse_query(Some("mode=interactive&search=a+b%2Fc&empty=&flag"));
        assert_eq!(query["mode"], "interactive");
        assert_eq!(query["search"], "a b/c");
        assert_eq!(query["empty"], "");
        assert_eq!(query["flag"], "");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_sse_frame_format() {
        assert_eq!(&sse_frame("ping", "keep-alive")[..], b"event: ping\ndata: keep-alive\n\n");
    }

    #[test]
    fn test_history_query_defaults() {
        let query = history_query(&parse_query(Some("page=0&pageSize=abc&project=&search=x")));
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, 20);
        assert_eq!(query.project, None);
        assert_eq!(query.search.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_intercept_without_observer() {
        let fx = fixture(true).await;
        fx.store
            .set_config(&ConfigInput {
                endpoint: "/e".to_string(),
                default_response: "D".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let response = Arc::clone(&fx.front)
            .handle_request(request(Method::POST, "/e", "p"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/xml; charset=utf-8"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"D");

        let page = fx.store.list_events(&HistoryQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].status, CallStatus::AutoResponded);
        assert_eq!(page.data[0].source, LOCAL);
    }

    #[tokio::test]
    async fn test_forwarded_header_sets_source() {
        let fx = fixture(true).await;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/e")
            .header(FORWARDED_HEADER, "10.1.1.1:8080")
            .body(Full::new(Bytes::from_static(b"p")))
            .unwrap();

        let (status, _) = send(&fx.front, req).await;
        assert_eq!(status, StatusCode::OK);

        let page = fx.store.list_events(&HistoryQuery::default()).await.unwrap();
        assert_eq!(page.data[0].source, "10.1.1.1:8080");
    }

    #[tokio::test]
    async fn test_respond_paths() {
        let fx = fixture(true).await;

        let (status, _) = send(&fx.front, request(Method::POST, "/api/respond", "not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &fx.front,
            request(Method::POST, "/api/respond", r#"{"requestId":"missing","responseBody":"x"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("not found"));

        let _slot = fx.interceptor.registry().register("r1", "D");
        let (status, body) = send(
            &fx.front,
            request(Method::POST, "/api/respond", r#"{"requestId":"r1","responseBody":"OK"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Response processed by primary."));
    }

    #[tokio::test]
    async fn test_primary_only_routes_on_secondary() {
        // no heartbeat row for the local address: not primary
        let fx = fixture(false).await;

        let (status, _) = send(
            &fx.front,
            request(Method::POST, "/api/respond", r#"{"requestId":"r1","responseBody":"OK"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&fx.front, request(Method::GET, "/api/events?mode=interactive", "")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = send(&fx.front, request(Method::POST, "/e", "p")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("No primary service available"));
    }

    #[tokio::test]
    async fn test_config_and_rule_admin() {
        let fx = fixture(true).await;

        let (status, _) = send(
            &fx.front,
            request(
                Method::POST,
                "/api/config",
                r#"{"endpoint":"/orders/new","defaultResponse":"D","project":"shop"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&fx.front, request(Method::GET, "/api/config/orders/new", "")).await;
        assert_eq!(status, StatusCode::OK);
        let config: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(config["defaultResponse"], "D");
        let config_id = config["id"].as_i64().unwrap();

        let (status, body) = send(
            &fx.front,
            request(
                Method::POST,
                "/api/rules",
                &format!(r#"{{"configID":{},"keyword":"VIP","response":"R"}}"#, config_id),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let rule_id = serde_json::from_str::<serde_json::Value>(&body).unwrap()["id"]
            .as_i64()
            .unwrap();

        let (_, body) = send(&fx.front, request(Method::POST, "/orders/new", "a VIP order")).await;
        assert_eq!(body, "R");

        let (status, _) = send(
            &fx.front,
            request(Method::PUT, &format!("/api/rules/{}", rule_id), r#"{"keyword":"GOLD","response":"G"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&fx.front, request(Method::POST, "/orders/new", "GOLD")).await;
        assert_eq!(body, "G");

        let (status, _) = send(&fx.front, request(Method::DELETE, &format!("/api/rules/{}", rule_id), "")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&fx.front, request(Method::DELETE, "/api/rules/abc", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&fx.front, request(Method::DELETE, "/api/config/orders/new", "")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&fx.front, request(Method::GET, "/api/config/orders/new", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ssh_config_admin() {
        let fx = fixture(true).await;

        let (status, _) = send(
            &fx.front,
            request(Method::POST, "/api/ssh/config", r#"{"command":"show version","response":"v1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&fx.front, request(Method::GET, "/api/ssh/config/show%20version", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"response\":\"v1\""));

        let (status, _) = send(&fx.front, request(Method::DELETE, "/api/ssh/config/show%20version", "")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&fx.front, request(Method::DELETE, "/api/ssh/config/show%20version", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_forward_event_publishes() {
        let fx = fixture(true).await;
        let mut operator = fx.interceptor.bus().subscribe(ObserverMode::Interactive);

        let notice = Notification::Http(HttpCallNotice {
            request_id: "r7".to_string(),
            payload: "p".to_string(),
            endpoint: "/e".to_string(),
            default_response: "D".to_string(),
            project: String::new(),
            source: "s".to_string(),
        });
        let (status, _) = send(
            &fx.front,
            request(Method::POST, "/api/events/forward", &serde_json::to_string(&notice).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(operator.recv().await.unwrap(), notice);

        let (status, _) = send(&fx.front, request(Method::POST, "/api/events/forward", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_api_and_preflight() {
        let fx = fixture(true).await;

        let (status, _) = send(&fx.front, request(Method::GET, "/api/nope", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let response = Arc::clone(&fx.front)
            .handle_request(request(Method::OPTIONS, "/api/respond", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert!(response.headers().contains_key(ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[tokio::test]
    async fn test_services_lists_primary() {
        let fx = fixture(true).await;
        let (status, body) = send(&fx.front, request(Method::GET, "/api/services", "")).await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["primary"], LOCAL);
        assert_eq!(value["services"][0]["address"], LOCAL);
    }

    #[tokio::test]
    async fn test_observer_stream_frames_and_drain() {
        let fx = fixture(true).await;
        let response = Arc::clone(&fx.front)
            .handle_request(request(Method::GET, "/api/events?mode=interactive", ""))
            .await
            .unwrap();
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/event-stream");

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(&first[..], b"event: connected\ndata: {\"status\": \"ok\"}\n\n");
        assert_eq!(fx.interceptor.bus().interactive_count(), 1);

        fx.interceptor.bus().publish(&Notification::Http(HttpCallNotice {
            request_id: "r1".to_string(),
            payload: "p".to_string(),
            endpoint: "/e".to_string(),
            default_response: "D".to_string(),
            project: String::new(),
            source: LOCAL.to_string(),
        }));
        let frame = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let text = String::from_utf8_lossy(&frame);
        assert!(text.starts_with("event: message\ndata: "));
        assert!(text.contains("\"requestId\":\"r1\""));

        let mut slot = fx.interceptor.registry().register("pending", "D");
        drop(body);

        let resolution = tokio::time::timeout(Duration::from_secs(2), slot.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolution.body(), "D");
        assert_eq!(fx.interceptor.bus().interactive_count(), 0);
    }
}
