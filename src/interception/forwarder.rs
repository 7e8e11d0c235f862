// src/interception/forwarder.rs
//! Relays intercepted calls from a non-primary instance to the primary
//!
//! The original headers are copied and `X-Forwarded-For-Service` is stamped
//! with the local address so the primary records the true origin and does
//! not forward the call again. Failures are never retried here.

use crate::observability::FORWARDED_TOTAL;
use crate::recording::models::ServiceInstance;
use crate::utils::errors::{MockError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use hyper::http::request::Parts;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use std::time::Duration;
use tracing::{debug, error, info};

/// Header naming the instance a call originally reached
pub const FORWARDED_HEADER: &str = "x-forwarded-for-service";

/// HTTP relay towards the current primary
pub struct ForwardingProxy {
    client: Client<HttpConnector, Full<Bytes>>,
    local_address: String,
    timeout: Duration,
}

impl ForwardingProxy {
    /// Create a new forwarding proxy stamping `local_address` as origin
    pub fn new(local_address: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();

        Self {
            client,
            local_address: local_address.into(),
            timeout,
        }
    }

    /// Relay a call to `primary` and hand back its answer. Without a
    /// primary no I/O is performed and `NoPrimary` is returned.
    pub async fn forward(
        &self,
        parts: &Parts,
        body: Bytes,
        primary: Option<&ServiceInstance>,
    ) -> Result<Response<Full<Bytes>>> {
        let Some(primary) = primary else {
            info!("No primary available for {}", parts.uri.path());
            metrics::counter!(FORWARDED_TOTAL, "result" => "no_primary").increment(1);
            return Err(MockError::NoPrimary);
        };

        match tokio::time::timeout(self.timeout, self.relay(parts, body, primary)).await {
            Ok(Ok(response)) => {
                metrics::counter!(FORWARDED_TOTAL, "result" => "ok").increment(1);
                Ok(response)
            }
            Ok(Err(e)) => {
                error!("Failed to forward to primary {}: {}", primary.address, e);
                metrics::counter!(FORWARDED_TOTAL, "result" => "error").increment(1);
                Err(e)
            }
            Err(_) => {
                error!("Forwarding to primary {} timed out after {:?}", primary.address, self.timeout);
                metrics::counter!(FORWARDED_TOTAL, "result" => "timeout").increment(1);
                Err(MockError::ForwardingFailed(format!("timed out after {:?}", self.timeout)))
            }
        }
    }

    async fn relay(&self, parts: &Parts, body: Bytes, primary: &ServiceInstance) -> Result<Response<Full<Bytes>>> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = format!("{}{}", primary.base_url(), path_and_query);
        debug!("Forwarding {} {} to {}", parts.method, parts.uri, target);

        let mut builder = Request::builder().method(parts.method.clone()).uri(&target);
        for (name, value) in parts.headers.iter() {
            if name == HOST || name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION {
                continue;
            }
            builder = builder.header(name, value);
        }

        let origin = HeaderValue::from_str(&self.local_address)
            .map_err(|e| MockError::ForwardingFailed(format!("Invalid origin header: {}", e)))?;
        let request = builder
            .header(FORWARDED_HEADER, origin)
            .body(Full::new(body))
            .map_err(|e| MockError::ForwardingFailed(format!("Request build error: {}", e)))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| MockError::ForwardingFailed(format!("Primary request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| MockError::ForwardingFailed(format!("Response body error: {}", e)))?
            .to_bytes();

        let mut relayed = Response::builder().status(parts.status);
        if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
            relayed = relayed.header(CONTENT_TYPE, content_type);
        }
        relayed
            .body(Full::new(body))
            .map_err(|e| MockError::ForwardingFailed(format!("Response build error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use chrono::Utc;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    fn instance(address: String) -> ServiceInstance {
        ServiceInstance {
            address,
            protocol: "http".to_string(),
            registered_at: Utc::now(),
            last_seen_at: Utc::now(),
        }
    }

    fn parts(uri: &str) -> Parts {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-custom", "kept")
            .header(HOST, "caller.example")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    /// Primary stand-in echoing the origin header, the custom header and the body
    async fn spawn_echo_primary() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| async move {
                        let origin = req
                            .headers()
                            .get(FORWARDED_HEADER)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        let custom = req
                            .headers()
                            .get("x-custom")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        let path = req.uri().to_string();
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        let text = format!("{}|{}|{}|{}", origin, custom, path, String::from_utf8_lossy(&body));

                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::ACCEPTED)
                                .header(CONTENT_TYPE, "text/plain")
                                .body(Full::new(Bytes::from(text)))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_forward_relays_verbatim() {
        let primary = instance(spawn_echo_primary().await);
        let proxy = ForwardingProxy::new("10.0.0.9:8080", Duration::from_secs(5));

        let response = proxy
            .forward(&parts("/e?x=1"), Bytes::from_static(b"payload"), Some(&primary))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"10.0.0.9:8080|kept|/e?x=1|payload");
    }

    #[tokio::test]
    async fn test_forward_without_primary() {
        let proxy = ForwardingProxy::new("10.0.0.9:8080", Duration::from_secs(5));
        let err = proxy.forward(&parts("/e"), Bytes::new(), None).await.unwrap_err();

        assert!(matches!(err, MockError::NoPrimary));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_forward_unreachable_primary() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let proxy = ForwardingProxy::new("10.0.0.9:8080", Duration::from_secs(5));
        let err = proxy
            .forward(&parts("/e"), Bytes::new(), Some(&instance(addr)))
            .await
            .unwrap_err();

        assert!(matches!(err, MockError::ForwardingFailed(_)));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_forward_times_out() {
        // accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = vec![];
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let proxy = ForwardingProxy::new("10.0.0.9:8080", Duration::from_millis(100));
        let err = proxy
            .forward(&parts("/e"), Bytes::new(), Some(&instance(addr)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
