// src/interception/handler.rs
//! Interception handler for HTTP-transport calls
//!
//! Resolves the configured response, then either answers at once (no
//! operator watching) or suspends the call in the pending registry until
//! an operator answers, the wait deadline elapses, the caller goes away or
//! the registry is drained. History is written by the waiting side only,
//! so every call gets exactly one terminal status.

use crate::broker::event_bus::{EventBus, HttpCallNotice, Notification};
use crate::broker::pending::{PendingRegistry, Resolution};
use crate::interception::rules::resolve_response;
use crate::observability::{CALLS_TOTAL, DRAINED_TOTAL};
use crate::recording::models::{CallStatus, NewCallEvent};
use crate::recording::storage::MockStore;
use crate::utils::errors::{MockError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables of the interception handler
#[derive(Debug, Clone)]
pub struct InterceptorSettings {
    /// How long a suspended call waits for an operator
    pub wait_timeout: Duration,

    /// Reply used when no configuration exists for the endpoint
    pub fallback_response: String,

    /// Reject calls with an empty body before any lookup
    pub reject_empty_body: bool,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(3),
            fallback_response: crate::utils::config::GLOBAL_FALLBACK_RESPONSE.to_string(),
            reject_empty_body: false,
        }
    }
}

/// A call that has already been read into memory
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub endpoint: String,
    /// Origin instance label recorded in history
    pub source: String,
    pub payload: String,
}

/// How an intercepted call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptOutcome {
    pub request_id: String,
    pub status: CallStatus,
    /// Reply for the caller; `None` when the caller is already gone
    pub body: Option<String>,
}

/// Status recorded for an operator-supplied answer
pub fn operator_status(body: &str, default_response: &str) -> CallStatus {
    if body == default_response {
        CallStatus::RespondedDefault
    } else {
        CallStatus::RespondedCustom
    }
}

/// Status recorded when the wait deadline elapses
pub fn deadline_status(wait_timeout: Duration) -> CallStatus {
    if wait_timeout.is_zero() {
        CallStatus::AutoResponded
    } else {
        CallStatus::TimedOut
    }
}

/// Status and body for a call whose slot produced `resolution`; `None`
/// means the wait ended without one.
pub fn settle(resolution: Option<Resolution>, default_response: &str, wait_timeout: Duration) -> (CallStatus, String) {
    match resolution {
        Some(Resolution::Operator(body)) => (operator_status(&body, default_response), body),
        Some(Resolution::Drained(body)) => {
            metrics::counter!(DRAINED_TOTAL).increment(1);
            (CallStatus::AutoRespondedDisconnect, body)
        }
        None => (deadline_status(wait_timeout), default_response.to_string()),
    }
}

/// Correlates intercepted calls with operator answers
pub struct Interceptor {
    store: Arc<MockStore>,
    bus: Arc<EventBus>,
    registry: Arc<PendingRegistry>,
    settings: InterceptorSettings,
}

impl Interceptor {
    pub fn new(
        store: Arc<MockStore>,
        bus: Arc<EventBus>,
        registry: Arc<PendingRegistry>,
        settings: InterceptorSettings,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            settings,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<MockStore> {
        &self.store
    }

    /// Handle one call on the primary. `caller_gone` fires when the
    /// caller's connection is severed.
    pub async fn intercept(&self, call: InboundCall, caller_gone: CancellationToken) -> Result<InterceptOutcome> {
        if self.settings.reject_empty_body && call.payload.is_empty() {
            return Err(MockError::BadRequest("Request body cannot be empty".to_string()));
        }

        let config = self
            .store
            .config_for_request(&call.endpoint, &call.source)
            .await?;
        let resolved = resolve_response(config.as_ref(), &call.payload, &self.settings.fallback_response);
        let request_id = ulid::Ulid::new().to_string();
        if let Some(rule_id) = resolved.matched_rule {
            debug!("Rule {} overrides the default for {} {}", rule_id, request_id, call.endpoint);
        }

        if self.bus.interactive_count() == 0 {
            debug!("No operator watching, answering {} from {} immediately", call.endpoint, call.source);
            self.record_new(&request_id, &call, &resolved.project, &resolved.body, CallStatus::AutoResponded)
                .await;
            return Ok(self.finish(request_id, CallStatus::AutoResponded, Some(resolved.body)));
        }

        info!("Operator watching, holding {} {} from {}", request_id, call.endpoint, call.source);
        self.record_new(&request_id, &call, &resolved.project, "", CallStatus::Pending)
            .await;

        let mut slot = self.registry.register(&request_id, &resolved.body);
        self.bus.publish(&Notification::Http(HttpCallNotice {
            request_id: request_id.clone(),
            payload: call.payload.clone(),
            endpoint: call.endpoint.clone(),
            default_response: resolved.body.clone(),
            project: resolved.project.clone(),
            source: call.source.clone(),
        }));

        let (status, body) = tokio::select! {
            biased;
            resolution = slot.recv() => {
                let (status, body) = settle(resolution, &resolved.body, self.settings.wait_timeout);
                (status, Some(body))
            }
            _ = caller_gone.cancelled() => {
                slot.close();
                (CallStatus::Cancelled, None)
            }
            _ = tokio::time::sleep(self.settings.wait_timeout) => {
                // an answer that raced the deadline still counts
                let (status, body) = settle(slot.close(), &resolved.body, self.settings.wait_timeout);
                (status, Some(body))
            }
        };

        self.registry.release(&request_id);

        let recorded = body.as_deref().unwrap_or("");
        if let Err(e) = self.store.update_event(&request_id, recorded, status).await {
            warn!("Failed to update event {}: {}", request_id, e);
        }
        info!("Call {} finished as {}", request_id, status);

        Ok(self.finish(request_id, status, body))
    }

    /// Deliver an operator answer; `false` if the call is not pending
    pub fn resolve(&self, request_id: &str, body: &str) -> bool {
        let accepted = self.registry.resolve(request_id, body);
        if !accepted {
            debug!("Request {} not pending", request_id);
        }
        accepted
    }

    /// Force every pending call to its default
    pub fn drain(&self) -> usize {
        self.registry.drain_all()
    }

    async fn record_new(&self, request_id: &str, call: &InboundCall, project: &str, response: &str, status: CallStatus) {
        let event = NewCallEvent {
            request_id,
            endpoint: &call.endpoint,
            project,
            payload: &call.payload,
            response_body: response,
            status,
            source: &call.source,
        };
        if let Err(e) = self.store.create_event(&event).await {
            warn!("Failed to save event {}: {}", request_id, e);
        }
    }

    fn finish(&self, request_id: String, status: CallStatus, body: Option<String>) -> InterceptOutcome {
        metrics::counter!(CALLS_TOTAL, "outcome" => status.metric_label()).increment(1);
        InterceptOutcome {
            request_id,
            status,
            body,
        }
    }
}
