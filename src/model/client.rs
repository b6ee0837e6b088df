//! # Voice Model Client
//!
//! One connection per call to the generative voice model.
//!
//! ## Protocol Sequence:
//! 1. **Connecting**: the setup message is queued as soon as the client exists
//! 2. **Ready**: `setupComplete` arrived; `Ready` is emitted and a greeting turn
//!    is scheduled so the assistant speaks first
//! 3. **Closed**: the transport failed or was closed (terminal, no reconnect)
//!
//! ## Send Gating:
//! Every input operation is a silent no-op unless the client is **Ready**.
//! Nothing is buffered; callers check [`ModelClient::is_ready`] when they care.
//!
//! ## Transport:
//! The client never touches a socket. It pushes [`TransportCommand`]s into a
//! channel drained by a writer task, and the reader task feeds inbound frames
//! back through [`ModelClient::handle_frame`]. Tests drive both ends directly.

use crate::audio::AudioFrame;
use crate::model::protocol::{
    Blob, ClientContent, ClientMessage, Content, FunctionResponsePart, GenerationConfig, Part,
    PrebuiltVoiceConfig, RealtimeInput, ServerContent, ServerMessage, Setup, SpeechConfig, Tool,
    VoiceConfig,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Connection state of a [`ModelClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Connecting,
    Ready,
    Closed,
}

/// Events surfaced to whoever owns the call.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Setup finished; input is now accepted
    Ready,
    /// One streamed chunk of model output
    ServerContent(ServerContent),
    /// The transport failed. Emitted at most once.
    Error(String),
    /// The transport is gone. Emitted at most once.
    Closed,
}

/// Receiver of [`ModelEvent`]s.
pub trait ModelEventSink: Send + Sync {
    fn deliver(&self, event: ModelEvent);
}

impl ModelEventSink for mpsc::UnboundedSender<ModelEvent> {
    fn deliver(&self, event: ModelEvent) {
        // The receiver only disappears once the call is over.
        let _ = self.send(event);
    }
}

/// Instructions for the transport writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Frame(String),
    Close,
}

/// Per-call session parameters for the model.
#[derive(Debug, Clone)]
pub struct ModelSessionOptions {
    pub model: String,
    pub voice: String,
    pub language_code: String,
    pub system_instruction: String,
    pub greeting_prompt: String,
    pub greeting_delay: Duration,
    pub function_declarations: Vec<Value>,
}

impl ModelSessionOptions {
    /// Build the setup payload sent once per connection.
    pub fn setup(&self) -> Setup {
        let system_instruction = (!self.system_instruction.trim().is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(&self.system_instruction)],
        });
        let tools = if self.function_declarations.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: self.function_declarations.clone(),
            }]
        };

        Setup {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                    language_code: self.language_code.clone(),
                },
            },
            system_instruction,
            tools,
            input_audio_transcription: Value::Object(Default::default()),
            output_audio_transcription: Value::Object(Default::default()),
        }
    }
}

/// Handle to one model connection. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ModelClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    call_id: String,
    options: ModelSessionOptions,
    state: Mutex<ModelState>,
    greeting_sent: AtomicBool,
    error_reported: AtomicBool,
    close_reported: AtomicBool,
    transport: mpsc::UnboundedSender<TransportCommand>,
    events: Arc<dyn ModelEventSink>,
}

impl ModelClient {
    /// Create a client in the **Connecting** state and queue its setup message.
    pub fn new(
        call_id: &str,
        options: ModelSessionOptions,
        transport: mpsc::UnboundedSender<TransportCommand>,
        events: Arc<dyn ModelEventSink>,
    ) -> Self {
        let client = Self {
            inner: Arc::new(ClientInner {
                call_id: call_id.to_string(),
                options,
                state: Mutex::new(ModelState::Connecting),
                greeting_sent: AtomicBool::new(false),
                error_reported: AtomicBool::new(false),
                close_reported: AtomicBool::new(false),
                transport,
                events,
            }),
        };

        let setup = ClientMessage::Setup(client.inner.options.setup());
        client.push(&setup);
        client
    }

    pub fn call_id(&self) -> &str {
        &self.inner.call_id
    }

    pub fn state(&self) -> ModelState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ModelState::Ready
    }

    /// Handle one inbound frame from the model transport.
    ///
    /// Must be called from within a tokio runtime: readiness schedules the
    /// deferred greeting on a timer.
    pub fn handle_frame(&self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(call_id = %self.inner.call_id, "Ignoring malformed model frame: {}", err);
                return;
            }
        };

        if message.is_setup_complete() {
            self.mark_ready();
        }

        if let Some(content) = message.server_content {
            self.inner.events.deliver(ModelEvent::ServerContent(content));
        }
    }

    fn mark_ready(&self) {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ModelState::Connecting {
                debug!(call_id = %self.inner.call_id, "Ignoring setupComplete in state {:?}", *state);
                return;
            }
            *state = ModelState::Ready;
        }

        info!(call_id = %self.inner.call_id, "Model session ready");
        self.inner.events.deliver(ModelEvent::Ready);

        let client = self.clone();
        let delay = self.inner.options.greeting_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.send_greeting();
        });
    }

    /// Send the synthetic user turn that makes the assistant open the call.
    fn send_greeting(&self) {
        if !self.is_ready() || self.inner.greeting_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let prompt = self.inner.options.greeting_prompt.clone();
        debug!(call_id = %self.inner.call_id, "Sending greeting turn");
        self.send_client_content(vec![Content::user_text(&prompt)], true);
    }

    /// Stream one linear PCM frame to the model, tagged with its sample rate.
    ///
    /// μ-law frames have no model MIME type and are dropped.
    pub fn send_realtime_audio(&self, frame: &AudioFrame) {
        let Some(mime_type) = frame.encoding().mime_type() else {
            debug!(call_id = %self.inner.call_id, "Dropping audio frame without a PCM encoding");
            return;
        };
        self.send_when_ready(ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: mime_type.to_string(),
                data: BASE64.encode(frame.data()),
            }),
            ..Default::default()
        }));
    }

    /// Stream one encoded video frame (e.g. `image/jpeg`).
    pub fn send_realtime_video(&self, mime_type: &str, data: &[u8]) {
        self.send_when_ready(ClientMessage::RealtimeInput(RealtimeInput {
            video: Some(Blob {
                mime_type: mime_type.to_string(),
                data: BASE64.encode(data),
            }),
            ..Default::default()
        }));
    }

    pub fn send_realtime_text(&self, text: &str) {
        self.send_when_ready(ClientMessage::RealtimeInput(RealtimeInput {
            text: Some(text.to_string()),
            ..Default::default()
        }));
    }

    pub fn send_client_content(&self, turns: Vec<Content>, turn_complete: bool) {
        self.send_when_ready(ClientMessage::ClientContent(ClientContent { turns, turn_complete }));
    }

    /// Return the outcome of a function call to the model as a user turn.
    pub fn send_function_response(&self, id: Option<String>, name: &str, response: Value) {
        let part = Part {
            function_response: Some(FunctionResponsePart {
                id,
                name: name.to_string(),
                response,
            }),
            ..Default::default()
        };
        self.send_client_content(
            vec![Content {
                role: Some("user".to_string()),
                parts: vec![part],
            }],
            true,
        );
    }

    fn send_when_ready(&self, message: ClientMessage) {
        if !self.is_ready() {
            debug!(call_id = %self.inner.call_id, kind = message.kind(), "Model not ready, dropping message");
            return;
        }
        self.push(&message);
    }

    fn push(&self, message: &ClientMessage) {
        match message.to_json() {
            Ok(frame) => {
                // A closed channel means the writer already exited; the close
                // path reports that separately.
                let _ = self.inner.transport.send(TransportCommand::Frame(frame));
            }
            Err(err) => warn!(call_id = %self.inner.call_id, "Failed to encode {}: {}", message.kind(), err),
        }
    }

    /// The transport failed. Clears readiness; emits `Error` at most once.
    pub fn transport_error(&self, reason: &str) {
        self.set_closed();
        if !self.inner.error_reported.swap(true, Ordering::SeqCst) {
            warn!(call_id = %self.inner.call_id, "Model transport error: {}", reason);
            self.inner.events.deliver(ModelEvent::Error(reason.to_string()));
        }
    }

    /// The transport is gone. Clears readiness; emits `Closed` at most once.
    pub fn transport_closed(&self) {
        self.set_closed();
        if !self.inner.close_reported.swap(true, Ordering::SeqCst) {
            info!(call_id = %self.inner.call_id, "Model connection closed");
            self.inner.events.deliver(ModelEvent::Closed);
        }
    }

    /// Close the connection from our side. Idempotent.
    pub fn close(&self) {
        let was_open = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            let was_open = *state != ModelState::Closed;
            *state = ModelState::Closed;
            was_open
        };
        if was_open {
            let _ = self.inner.transport.send(TransportCommand::Close);
        }
    }

    fn set_closed(&self) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = ModelState::Closed;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::AudioEncoding;
    use serde_json::json;

    pub(crate) fn test_options() -> ModelSessionOptions {
        ModelSessionOptions {
            model: "models/test-live".to_string(),
            voice: "Puck".to_string(),
            language_code: "en-US".to_string(),
            system_instruction: "Be brief.".to_string(),
            greeting_prompt: "Say hello.".to_string(),
            greeting_delay: Duration::from_millis(100),
            function_declarations: vec![json!({"name": "lookup_customer"})],
        }
    }

    struct Harness {
        client: ModelClient,
        transport: mpsc::UnboundedReceiver<TransportCommand>,
        events: mpsc::UnboundedReceiver<ModelEvent>,
    }

    fn harness() -> Harness {
        let (transport_tx, transport) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let client = ModelClient::new("call-1", test_options(), transport_tx, Arc::new(events_tx));
        Harness { client, transport, events }
    }

    fn drain_frames(rx: &mut mpsc::UnboundedReceiver<TransportCommand>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(command) = rx.try_recv() {
            if let TransportCommand::Frame(text) = command {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    #[test]
    fn test_setup_is_queued_first() {
        let mut h = harness();
        let frames = drain_frames(&mut h.transport);
        assert_eq!(frames.len(), 1);

        let setup = &frames[0]["setup"];
        assert_eq!(setup["model"], "models/test-live");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(setup["generationConfig"]["speechConfig"]["languageCode"], "en-US");
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "lookup_customer");
        assert_eq!(h.client.state(), ModelState::Connecting);
    }

    #[test]
    fn test_sends_before_ready_are_noops() {
        let mut h = harness();
        drain_frames(&mut h.transport);

        h.client.send_realtime_audio(&AudioFrame::new(AudioEncoding::Linear16k, vec![0, 0, 1, 0]));
        h.client.send_realtime_video("image/jpeg", &[1, 2, 3]);
        h.client.send_realtime_text("hello");
        h.client.send_client_content(vec![Content::user_text("hi")], true);
        h.client.send_function_response(None, "lookup_customer", json!({"ok": true}));

        assert!(h.transport.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_then_single_greeting_after_delay() {
        let mut h = harness();
        drain_frames(&mut h.transport);

        h.client.handle_frame(r#"{"setupComplete":{}}"#);
        assert!(h.client.is_ready());
        assert!(matches!(h.events.try_recv(), Ok(ModelEvent::Ready)));

        // Nothing goes out before the delay elapses.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(drain_frames(&mut h.transport).is_empty());

        // A duplicate setupComplete must not schedule a second greeting.
        h.client.handle_frame(r#"{"setupComplete":{}}"#);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let frames = drain_frames(&mut h.transport);
        assert_eq!(frames.len(), 1);
        let turn = &frames[0]["clientContent"];
        assert_eq!(turn["turnComplete"], true);
        assert_eq!(turn["turns"][0]["role"], "user");
        assert_eq!(turn["turns"][0]["parts"][0]["text"], "Say hello.");
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_skipped_when_closed_first() {
        let mut h = harness();
        drain_frames(&mut h.transport);

        h.client.handle_frame(r#"{"setupComplete":{}}"#);
        h.client.close();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let commands: Vec<_> = std::iter::from_fn(|| h.transport.try_recv().ok()).collect();
        assert_eq!(commands, vec![TransportCommand::Close]);
    }

    #[tokio::test]
    async fn test_ready_client_encodes_inputs() {
        let mut h = harness();
        drain_frames(&mut h.transport);
        h.client.handle_frame(r#"{"setupComplete":{}}"#);

        h.client.send_realtime_audio(&AudioFrame::new(AudioEncoding::Linear16k, vec![1, 0, 2, 0]));
        h.client.send_realtime_audio(&AudioFrame::new(AudioEncoding::Mulaw8k, vec![0xFF; 4]));
        h.client.send_realtime_text("caller pressed 1");
        h.client.send_function_response(Some("fc-1".to_string()), "lookup_customer", json!({"name": "Ada"}));

        let frames = drain_frames(&mut h.transport);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(frames[0]["realtimeInput"]["audio"]["data"], BASE64.encode([1u8, 0, 2, 0]));
        assert_eq!(frames[1]["realtimeInput"]["text"], "caller pressed 1");
        let response = &frames[2]["clientContent"]["turns"][0]["parts"][0]["functionResponse"];
        assert_eq!(response["id"], "fc-1");
        assert_eq!(response["name"], "lookup_customer");
        assert_eq!(response["response"]["name"], "Ada");
    }

    #[tokio::test]
    async fn test_server_content_is_forwarded() {
        let mut h = harness();
        h.client.handle_frame(r#"{"setupComplete":{}}"#);
        h.client.handle_frame(r#"{"serverContent":{"turnComplete":true}}"#);
        h.client.handle_frame("garbage");

        assert!(matches!(h.events.try_recv(), Ok(ModelEvent::Ready)));
        match h.events.try_recv() {
            Ok(ModelEvent::ServerContent(content)) => assert!(content.is_turn_complete()),
            other => panic!("Expected server content, got {:?}", other),
        }
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_and_close_fire_once_and_clear_readiness() {
        let mut h = harness();
        h.client.handle_frame(r#"{"setupComplete":{}}"#);
        assert!(matches!(h.events.try_recv(), Ok(ModelEvent::Ready)));

        h.client.transport_error("connection reset");
        h.client.transport_error("connection reset again");
        h.client.transport_closed();
        h.client.transport_closed();

        assert!(!h.client.is_ready());
        assert!(matches!(h.events.try_recv(), Ok(ModelEvent::Error(reason)) if reason == "connection reset"));
        assert!(matches!(h.events.try_recv(), Ok(ModelEvent::Closed)));
        assert!(h.events.try_recv().is_err());

        drain_frames(&mut h.transport);
        h.client.send_realtime_text("too late");
        assert!(h.transport.try_recv().is_err());
    }
}
