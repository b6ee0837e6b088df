//! # Call Bridge
//!
//! Binds one telephony connection to one voice model connection and relays
//! audio between them for the lifetime of a call.
//!
//! ## Audio Paths:
//! - **Caller → model**: base64 μ-law 8kHz → 16kHz PCM → `realtimeInput`
//! - **Model → caller**: 24kHz PCM parts → μ-law 8kHz → one `media` frame each
//!
//! ## Termination:
//! Whichever leg goes first ends the call and closes the other leg. The
//! registry entry is removed exactly once, so the completion notification
//! fires exactly once however many close paths race.
//!
//! Every method runs on the owning connection's event loop; only function
//! execution leaves it, on a spawned task.

use crate::audio::codec::{downsample_frame, upsample_frame};
use crate::audio::{AudioEncoding, AudioFrame};
use crate::call::events::{
    failure_payload, CallEvent, CallEventSink, FunctionCalledEvent, FunctionExecutor, FunctionRequest,
};
use crate::call::registry::CallRegistry;
use crate::call::session::{CallSession, CallStatus, FunctionInvocation, Speaker};
use crate::config::CallsConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::model::protocol::{FunctionCall, ServerContent};
use crate::model::{ModelClient, ModelConnector, ModelEvent, ModelEventSink};
use crate::telephony::protocol::{
    ConnectedEvent, DtmfEvent, MarkEvent, MediaEvent, MediaTrack, StartEvent, StopEvent,
};
use crate::telephony::session::{send_clear, send_mark, send_media, TelephonyHandler, TelephonyOutbound};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Collaborators and limits shared by every call.
#[derive(Clone)]
pub struct CallServices {
    pub connector: Arc<dyn ModelConnector>,
    pub events: Arc<dyn CallEventSink>,
    pub functions: Arc<dyn FunctionExecutor>,
    pub registry: Arc<CallRegistry>,
    pub calls: CallsConfig,
}

pub struct CallBridge {
    connection_id: String,
    services: CallServices,
    telephony: Arc<dyn TelephonyOutbound>,
    model_events: Arc<dyn ModelEventSink>,
    started: bool,
    call_id: Option<String>,
    stream_sid: Option<String>,
    model: Option<ModelClient>,
    /// Model turns completed so far, used to name playback marks.
    turns: u64,
}

impl CallBridge {
    /// ## Parameters:
    /// - **telephony**: where outbound telephony frames go
    /// - **model_events**: where the model client for this call delivers its
    ///   events; the owner feeds them back through [`CallBridge::on_model_event`]
    pub fn new(
        connection_id: String,
        services: CallServices,
        telephony: Arc<dyn TelephonyOutbound>,
        model_events: Arc<dyn ModelEventSink>,
    ) -> Self {
        Self {
            connection_id,
            services,
            telephony,
            model_events,
            started: false,
            call_id: None,
            stream_sid: None,
            model: None,
            turns: 0,
        }
    }

    fn ready_model(&self) -> Option<&ModelClient> {
        self.model.as_ref().filter(|model| model.is_ready())
    }

    /// Handle one event from this call's model client.
    pub fn on_model_event(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::Ready => {
                let Some(call_id) = self.call_id.clone() else {
                    return;
                };
                self.services
                    .registry
                    .with_call(&self.connection_id, CallSession::mark_model_ready);
                self.services.events.model_ready(&call_id);
            }
            ModelEvent::ServerContent(content) => self.handle_server_content(content),
            ModelEvent::Error(reason) => {
                warn!(call_id = ?self.call_id, "Model connection failed: {}", reason);
                self.finish(CallStatus::Failed, "model_error");
                self.telephony.close();
            }
            ModelEvent::Closed => {
                self.finish(CallStatus::Completed, "model_closed");
                self.telephony.close();
            }
        }
    }

    /// Setup watchdog fired: fail the call unless the model became ready.
    pub fn on_setup_timeout(&mut self) {
        match self
            .services
            .registry
            .with_call(&self.connection_id, |call| call.is_model_ready())
        {
            Some(true) => {}
            Some(false) => {
                warn!(call_id = ?self.call_id, "Model not ready before setup timeout");
                self.teardown(CallStatus::Failed, "setup_timeout");
            }
            None if !self.started => {
                warn!(connection_id = %self.connection_id, "No start event before setup timeout");
                self.telephony.close();
            }
            None => {}
        }
    }

    /// Duration watchdog fired: end a call that is still running.
    pub fn on_duration_limit(&mut self) {
        if self.services.registry.contains(&self.connection_id) {
            info!(call_id = ?self.call_id, "Maximum call duration reached");
            self.teardown(CallStatus::Completed, "max_duration");
        }
    }

    fn handle_server_content(&mut self, content: ServerContent) {
        match self.stream_sid.as_deref() {
            Some(stream_sid) => {
                for payload in content.audio_payloads() {
                    let pcm = match BASE64.decode(payload) {
                        Ok(pcm) => pcm,
                        Err(err) => {
                            warn!(call_id = ?self.call_id, "Dropping undecodable model audio: {}", err);
                            continue;
                        }
                    };
                    let mulaw = downsample_frame(&AudioFrame::new(AudioEncoding::Linear24k, pcm));
                    if mulaw.is_empty() {
                        continue;
                    }
                    debug!(
                        call_id = ?self.call_id,
                        samples = mulaw.sample_count(),
                        duration_ms = mulaw.duration_ms(),
                        "Relaying model audio"
                    );
                    if let Err(err) = send_media(self.telephony.as_ref(), stream_sid, BASE64.encode(mulaw.data())) {
                        warn!(call_id = ?self.call_id, "Failed to frame outbound audio: {}", err);
                    }
                }

                if content.is_interrupted() {
                    debug!(call_id = ?self.call_id, "Model interrupted, clearing playback");
                    if let Err(err) = send_clear(self.telephony.as_ref(), stream_sid) {
                        warn!(call_id = ?self.call_id, "Failed to frame clear: {}", err);
                    }
                }

                if content.is_turn_complete() {
                    self.turns += 1;
                    let name = format!("turn-{}", self.turns);
                    if let Err(err) = send_mark(self.telephony.as_ref(), stream_sid, &name) {
                        warn!(call_id = ?self.call_id, "Failed to frame mark: {}", err);
                    }
                }
            }
            None if content.audio_payloads().next().is_some() => {
                debug!(connection_id = %self.connection_id, "Dropping model audio before stream start");
            }
            None => {}
        }

        self.services.registry.with_call(&self.connection_id, |call| {
            if let Some(text) = content.input_transcription.as_ref().and_then(|t| t.text.as_deref()) {
                call.append_transcript(Speaker::Caller, text);
            }
            if let Some(text) = content.output_transcription.as_ref().and_then(|t| t.text.as_deref()) {
                call.append_transcript(Speaker::Agent, text);
            }
            for text in content.text_parts() {
                call.append_transcript(Speaker::Agent, text);
            }
            if content.is_turn_complete() {
                call.close_turn();
            }
        });

        for call in content.function_calls() {
            self.dispatch_function_call(call.clone());
        }
    }

    fn dispatch_function_call(&self, call: FunctionCall) {
        let (Some(model), Some(call_id)) = (self.model.clone(), self.call_id.clone()) else {
            return;
        };
        let (user_id, agent_id) = self
            .services
            .registry
            .with_call(&self.connection_id, |session| {
                (session.from_number.clone(), session.agent_id.clone())
            })
            .unwrap_or_else(|| (None, self.services.calls.default_agent_id.clone()));

        info!(call_id = %call_id, function = %call.name, "Model requested function call");
        let request = FunctionRequest {
            name: call.name.clone(),
            args: call.args.clone(),
            call_id,
            user_id,
            agent_id,
        };
        tokio::spawn(run_function_call(
            self.services.clone(),
            self.connection_id.clone(),
            model,
            call,
            request,
        ));
    }

    /// End the call if it is still registered and publish the outcome.
    fn finish(&mut self, status: CallStatus, reason: &str) {
        let Some(mut session) = self.services.registry.remove(&self.connection_id) else {
            return;
        };
        if !session.end(status, reason) {
            return;
        }
        info!(
            call_id = %session.call_id,
            call_sid = %session.call_sid,
            status = status.as_str(),
            reason,
            duration_secs = session.duration_secs(),
            transcript_entries = session.transcript().len(),
            "Call ended"
        );
        self.services.events.publish(CallEvent::ended(&session));
    }

    fn teardown(&mut self, status: CallStatus, reason: &str) {
        self.finish(status, reason);
        self.close_model();
        self.telephony.close();
    }

    fn close_model(&self) {
        if let Some(model) = &self.model {
            model.close();
        }
    }
}

/// Execute one function call and report the outcome to the model, the call
/// record and the event sink.
async fn run_function_call(
    services: CallServices,
    connection_id: String,
    model: ModelClient,
    call: FunctionCall,
    request: FunctionRequest,
) {
    let call_id = request.call_id.clone();
    let agent_id = request.agent_id.clone();
    let started = Instant::now();

    let outcome = services.functions.execute(request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let (success, payload, execution_time_ms) = match outcome {
        Ok(response) => (
            response.success,
            response.model_payload(),
            response.execution_time.unwrap_or(elapsed_ms),
        ),
        Err(err) => {
            warn!(call_id = %call_id, function = %call.name, "Function execution failed: {}", err);
            (false, failure_payload(&err.to_string()), elapsed_ms)
        }
    };

    model.send_function_response(call.id.clone(), &call.name, payload.clone());

    let now = Utc::now();
    services.registry.with_call(&connection_id, |session| {
        session.record_function_call(FunctionInvocation {
            name: call.name.clone(),
            args: call.args.clone(),
            result: payload.clone(),
            success,
            execution_time_ms,
            at: now,
        })
    });
    services.events.function_called(FunctionCalledEvent {
        call_id,
        agent_id,
        name: call.name,
        args: call.args,
        result: payload,
        success,
        execution_time_ms,
        timestamp: now,
    });
}

impl TelephonyHandler for CallBridge {
    fn on_connected(&mut self, event: &ConnectedEvent) -> BridgeResult<()> {
        debug!(
            connection_id = %self.connection_id,
            protocol = %event.protocol,
            version = %event.version,
            "Telephony stream connected"
        );
        Ok(())
    }

    fn on_start(&mut self, event: &StartEvent) -> BridgeResult<()> {
        if self.started {
            debug!(connection_id = %self.connection_id, "Ignoring repeated start event");
            return Ok(());
        }
        self.started = true;

        let session = CallSession::from_start(event, &self.services.calls.default_agent_id);
        let call_id = session.call_id.clone();
        let direction = session.direction.as_str();
        let started = CallEvent::started(&session);
        self.services.registry.open(&self.connection_id, session)?;

        self.stream_sid = Some(event.stream_sid().to_string());
        self.call_id = Some(call_id.clone());
        info!(
            call_id = %call_id,
            stream_sid = %event.stream_sid(),
            call_sid = %event.start.call_sid,
            direction,
            "Call started"
        );
        self.services.events.publish(started);

        self.model = Some(self.services.connector.connect(&call_id, self.model_events.clone()));
        Ok(())
    }

    fn on_media(&mut self, event: &MediaEvent) -> BridgeResult<()> {
        if event.media.track != MediaTrack::Inbound || event.media.payload.is_empty() {
            return Ok(());
        }
        let Some(model) = self.ready_model() else {
            return Ok(());
        };

        let inbound = AudioFrame::new(AudioEncoding::Mulaw8k, BASE64.decode(&event.media.payload)?);
        model.send_realtime_audio(&upsample_frame(&inbound));
        Ok(())
    }

    fn on_stop(&mut self, _event: &StopEvent) -> BridgeResult<()> {
        info!(call_id = ?self.call_id, "Telephony stream stopped");
        self.finish(CallStatus::Completed, "telephony_stop");
        self.close_model();
        Ok(())
    }

    fn on_dtmf(&mut self, event: &DtmfEvent) -> BridgeResult<()> {
        debug!(call_id = ?self.call_id, digit = %event.dtmf.digit, "DTMF received");
        if let Some(model) = self.ready_model() {
            model.send_realtime_text(&format!("The caller pressed {} on the keypad.", event.dtmf.digit));
        }
        Ok(())
    }

    fn on_mark(&mut self, event: &MarkEvent) -> BridgeResult<()> {
        debug!(call_id = ?self.call_id, mark = %event.mark.name, "Playback reached mark");
        Ok(())
    }

    fn on_error(&mut self, error: &BridgeError) {
        match error {
            BridgeError::Transport(_) | BridgeError::Capacity(_) => {
                self.teardown(CallStatus::Failed, error.code());
            }
            _ => debug!(call_id = ?self.call_id, "Frame skipped: {}", error),
        }
    }

    fn on_close(&mut self) {
        self.finish(CallStatus::Completed, "telephony_closed");
        self.close_model();
    }
}
