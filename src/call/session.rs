//! # Call Session
//!
//! The record of one bridged call, kept apart from both transports.
//!
//! ## Session Lifecycle:
//! 1. **Active**: created on telephony `start`
//! 2. **Completed**: either leg closed normally, or the duration limit hit
//! 3. **Failed**: a transport error or the setup watchdog ended the call
//!
//! The transition out of **Active** happens at most once; see [`CallSession::end`].

use crate::telephony::protocol::StartEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    /// Parse a `direction` custom parameter; anything unrecognised is inbound.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v.starts_with("outbound") => CallDirection::Outbound,
            _ => CallDirection::Inbound,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Active,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Active => "active",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
}

impl Speaker {
    fn label(&self) -> &'static str {
        match self {
            Speaker::Caller => "Caller",
            Speaker::Agent => "Agent",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// One function the model asked us to run, with its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionInvocation {
    pub name: String,
    pub args: Value,
    pub result: Value,
    pub success: bool,
    pub execution_time_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    pub stream_sid: String,
    pub call_sid: String,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub direction: CallDirection,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    /// Not computed by the bridge; left for downstream scoring.
    pub satisfaction: Option<f32>,
    ended_at: Option<DateTime<Utc>>,
    status: CallStatus,
    end_reason: Option<String>,
    model_ready_at: Option<DateTime<Utc>>,
    transcript: Vec<TranscriptEntry>,
    turn_closed: bool,
    function_calls: Vec<FunctionInvocation>,
}

impl CallSession {
    /// Start a new call from the telephony `start` event.
    ///
    /// ## Custom parameters read:
    /// - `from` / `to`: caller and callee numbers
    /// - `direction`: `inbound` (default) or `outbound`
    /// - `agentId`: which assistant persona handles the call
    pub fn from_start(event: &StartEvent, default_agent_id: &str) -> Self {
        let params = &event.start.custom_parameters;
        let param = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();

        Self {
            call_id: Uuid::new_v4().to_string(),
            stream_sid: event.stream_sid().to_string(),
            call_sid: event.start.call_sid.clone(),
            from_number: param("from"),
            to_number: param("to"),
            direction: CallDirection::parse(params.get("direction").map(String::as_str)),
            agent_id: param("agentId").unwrap_or_else(|| default_agent_id.to_string()),
            started_at: Utc::now(),
            satisfaction: None,
            ended_at: None,
            status: CallStatus::Active,
            end_reason: None,
            model_ready_at: None,
            transcript: Vec::new(),
            turn_closed: false,
            function_calls: Vec::new(),
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn is_ended(&self) -> bool {
        self.status != CallStatus::Active
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn end_reason(&self) -> Option<&str> {
        self.end_reason.as_deref()
    }

    pub fn mark_model_ready(&mut self) {
        self.model_ready_at.get_or_insert_with(Utc::now);
    }

    pub fn is_model_ready(&self) -> bool {
        self.model_ready_at.is_some()
    }

    /// Append a transcription fragment.
    ///
    /// Fragments from the same speaker within one turn are joined into a
    /// single entry.
    pub fn append_transcript(&mut self, speaker: Speaker, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        match self.transcript.last_mut() {
            Some(last) if last.speaker == speaker && !self.turn_closed => last.text.push_str(text),
            _ => self.transcript.push(TranscriptEntry {
                speaker,
                text: text.to_string(),
                at: Utc::now(),
            }),
        }
        self.turn_closed = false;
    }

    /// The model finished a turn; the next fragment starts a new entry.
    pub fn close_turn(&mut self) {
        self.turn_closed = true;
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Transcript rendered as `Speaker: text` lines.
    pub fn transcript_text(&self) -> String {
        self.transcript
            .iter()
            .map(|entry| format!("{}: {}", entry.speaker.label(), entry.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn record_function_call(&mut self, invocation: FunctionInvocation) {
        self.function_calls.push(invocation);
    }

    pub fn function_calls(&self) -> &[FunctionInvocation] {
        &self.function_calls
    }

    /// End the call. Returns `false` if it had already ended, leaving the
    /// first outcome untouched.
    pub fn end(&mut self, status: CallStatus, reason: &str) -> bool {
        if self.is_ended() || status == CallStatus::Active {
            return false;
        }
        let now = Utc::now();
        self.ended_at = Some(now.max(self.started_at));
        self.status = status;
        self.end_reason = Some(reason.to_string());
        true
    }

    /// Seconds from start to end, or to now while the call is still active.
    pub fn duration_secs(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::telephony::protocol::TelephonyEvent;

    pub(crate) fn start_event(params: &str) -> StartEvent {
        let raw = format!(
            r#"{{"event":"start","sequenceNumber":"1","streamSid":"ST1",
                "start":{{"streamSid":"ST1","callSid":"CA1","customParameters":{}}}}}"#,
            params
        );
        match TelephonyEvent::parse(&raw).unwrap() {
            TelephonyEvent::Start(start) => start,
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_from_start_reads_custom_parameters() {
        let event = start_event(
            r#"{"from":"+15550001111","to":"+15550002222","direction":"outbound-api","agentId":"sales"}"#,
        );
        let session = CallSession::from_start(&event, "default");
        assert_eq!(session.stream_sid, "ST1");
        assert_eq!(session.call_sid, "CA1");
        assert_eq!(session.from_number.as_deref(), Some("+15550001111"));
        assert_eq!(session.to_number.as_deref(), Some("+15550002222"));
        assert_eq!(session.direction, CallDirection::Outbound);
        assert_eq!(session.agent_id, "sales");
        assert_eq!(session.status(), CallStatus::Active);
    }

    #[test]
    fn test_from_start_defaults() {
        let session = CallSession::from_start(&start_event("{}"), "receptionist");
        assert_eq!(session.direction, CallDirection::Inbound);
        assert_eq!(session.agent_id, "receptionist");
        assert!(session.from_number.is_none());
        assert_ne!(
            session.call_id,
            CallSession::from_start(&start_event("{}"), "receptionist").call_id
        );
    }

    #[test]
    fn test_end_is_guarded() {
        let mut session = CallSession::from_start(&start_event("{}"), "default");
        assert!(session.end(CallStatus::Failed, "model_error"));
        assert!(!session.end(CallStatus::Completed, "telephony_closed"));

        assert_eq!(session.status(), CallStatus::Failed);
        assert_eq!(session.end_reason(), Some("model_error"));
        assert!(session.ended_at().unwrap() >= session.started_at);
        assert!(session.duration_secs() >= 0.0);
    }

    #[test]
    fn test_transcript_merges_fragments_per_turn() {
        let mut session = CallSession::from_start(&start_event("{}"), "default");
        session.append_transcript(Speaker::Agent, "Hello,");
        session.append_transcript(Speaker::Agent, " how can I help?");
        session.close_turn();
        session.append_transcript(Speaker::Caller, "I need");
        session.append_transcript(Speaker::Caller, " an appointment.");
        session.append_transcript(Speaker::Caller, "   ");
        session.close_turn();
        session.append_transcript(Speaker::Caller, "Tomorrow please.");

        assert_eq!(session.transcript().len(), 3);
        assert_eq!(
            session.transcript_text(),
            "Agent: Hello, how can I help?\nCaller: I need an appointment.\nCaller: Tomorrow please."
        );
    }
}
