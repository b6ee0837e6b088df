//! # Call Collaborators
//!
//! Interfaces to the services that sit outside the audio bridge.
//!
//! ## Collaborators:
//! - [`CallEventSink`]: receives lifecycle and function-call notifications
//!   (a webhook publisher, a database writer, or just the log)
//! - [`FunctionExecutor`]: runs the business functions the model calls
//!
//! The shipped binary wires [`TracingEventSink`] and [`UnavailableFunctions`].

use crate::call::session::{CallDirection, CallSession, CallStatus, FunctionInvocation};
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallEventKind {
    #[serde(rename = "call.started")]
    Started,
    #[serde(rename = "call.completed")]
    Completed,
    #[serde(rename = "call.failed")]
    Failed,
}

impl CallEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallEventKind::Started => "call.started",
            CallEventKind::Completed => "call.completed",
            CallEventKind::Failed => "call.failed",
        }
    }
}

/// Lifecycle notification for one call.
#[derive(Debug, Clone, Serialize)]
pub struct CallEvent {
    pub event: CallEventKind,
    pub call_id: String,
    pub stream_sid: String,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub agent_id: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    /// Seconds; absent on `call.started`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionInvocation>,
    pub satisfaction: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl CallEvent {
    pub fn started(session: &CallSession) -> Self {
        Self {
            event: CallEventKind::Started,
            call_id: session.call_id.clone(),
            stream_sid: session.stream_sid.clone(),
            from_number: session.from_number.clone(),
            to_number: session.to_number.clone(),
            agent_id: session.agent_id.clone(),
            direction: session.direction,
            status: session.status(),
            duration: None,
            outcome: None,
            transcript: None,
            function_calls: Vec::new(),
            satisfaction: None,
            timestamp: session.started_at,
        }
    }

    /// Completion notification for a call that has ended.
    pub fn ended(session: &CallSession) -> Self {
        let event = match session.status() {
            CallStatus::Failed => CallEventKind::Failed,
            _ => CallEventKind::Completed,
        };
        Self {
            event,
            duration: Some(session.duration_secs()),
            outcome: session.end_reason().map(str::to_string),
            transcript: Some(session.transcript_text()),
            function_calls: session.function_calls().to_vec(),
            satisfaction: session.satisfaction,
            timestamp: session.ended_at().unwrap_or_else(Utc::now),
            ..Self::started(session)
        }
    }
}

/// Notification that the model invoked a function.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionCalledEvent {
    pub call_id: String,
    pub agent_id: String,
    pub name: String,
    pub args: Value,
    pub result: Value,
    pub success: bool,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl FunctionCalledEvent {
    pub const EVENT: &'static str = "function.called";
}

/// Receives call notifications. Implementations must not block.
pub trait CallEventSink: Send + Sync {
    fn publish(&self, event: CallEvent);

    fn function_called(&self, event: FunctionCalledEvent);

    /// The model finished setup for a call.
    fn model_ready(&self, _call_id: &str) {}
}

/// A function call the model wants executed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRequest {
    pub name: String,
    pub args: Value,
    pub call_id: String,
    pub user_id: Option<String>,
    pub agent_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Milliseconds, as reported by the executor
    #[serde(default)]
    pub execution_time: Option<u64>,
}

impl FunctionResponse {
    /// Payload handed back to the model: the result verbatim on success,
    /// `{error, success:false}` otherwise.
    pub fn model_payload(&self) -> Value {
        if self.success {
            self.result.clone().unwrap_or(Value::Null)
        } else {
            failure_payload(self.error.as_deref().unwrap_or("Function execution failed"))
        }
    }
}

pub fn failure_payload(error: &str) -> Value {
    serde_json::json!({ "error": error, "success": false })
}

#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    async fn execute(&self, request: FunctionRequest) -> BridgeResult<FunctionResponse>;
}

/// Logs every notification through `tracing`.
pub struct TracingEventSink;

impl CallEventSink for TracingEventSink {
    fn publish(&self, event: CallEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = event.event.as_str(), call_id = %event.call_id, %payload, "Call event"),
            Err(err) => warn!(call_id = %event.call_id, "Failed to encode call event: {}", err),
        }
    }

    fn function_called(&self, event: FunctionCalledEvent) {
        info!(
            event = FunctionCalledEvent::EVENT,
            call_id = %event.call_id,
            function = %event.name,
            success = event.success,
            execution_time_ms = event.execution_time_ms,
            "Function called"
        );
    }

    fn model_ready(&self, call_id: &str) {
        info!(call_id, "Model ready for call");
    }
}

/// Executor used when no business backend is configured.
pub struct UnavailableFunctions;

#[async_trait]
impl FunctionExecutor for UnavailableFunctions {
    async fn execute(&self, request: FunctionRequest) -> BridgeResult<FunctionResponse> {
        Err(BridgeError::Function(format!(
            "Function '{}' is not available",
            request.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::session::tests::start_event;
    use serde_json::json;

    #[test]
    fn test_call_events_serialize() {
        let mut session = CallSession::from_start(&start_event(r#"{"from":"+1555"}"#), "default");
        let started = serde_json::to_value(CallEvent::started(&session)).unwrap();
        assert_eq!(started["event"], "call.started");
        assert_eq!(started["from_number"], "+1555");
        assert_eq!(started["direction"], "inbound");
        assert_eq!(started["status"], "active");
        assert!(started.get("duration").is_none());

        session.end(CallStatus::Failed, "model_error");
        let ended = serde_json::to_value(CallEvent::ended(&session)).unwrap();
        assert_eq!(ended["event"], "call.failed");
        assert_eq!(ended["status"], "failed");
        assert_eq!(ended["outcome"], "model_error");
        assert!(ended["duration"].as_f64().unwrap() >= 0.0);
        assert_eq!(ended["satisfaction"], Value::Null);
    }

    #[test]
    fn test_function_response_payloads() {
        let ok: FunctionResponse =
            serde_json::from_value(json!({"success": true, "result": {"slot": "10:00"}, "executionTime": 12}))
                .unwrap();
        assert_eq!(ok.model_payload(), json!({"slot": "10:00"}));
        assert_eq!(ok.execution_time, Some(12));

        let failed: FunctionResponse =
            serde_json::from_value(json!({"success": false, "error": "no slots"})).unwrap();
        assert_eq!(failed.model_payload(), json!({"error": "no slots", "success": false}));
    }

    #[test]
    fn test_function_request_is_camel_case() {
        let request = FunctionRequest {
            name: "book".to_string(),
            args: json!({}),
            call_id: "call-1".to_string(),
            user_id: Some("+1555".to_string()),
            agent_id: "default".to_string(),
        };
        let value = serde_json::to_value(request).unwrap();
        assert_eq!(value["callId"], "call-1");
        assert_eq!(value["userId"], "+1555");
        assert_eq!(value["agentId"], "default");
    }

    #[tokio::test]
    async fn test_unavailable_functions_fail() {
        let request = FunctionRequest {
            name: "book".to_string(),
            args: json!({}),
            call_id: "call-1".to_string(),
            user_id: None,
            agent_id: "default".to_string(),
        };
        let err = UnavailableFunctions.execute(request).await.unwrap_err();
        assert_eq!(err.code(), "function_error");
    }
}
