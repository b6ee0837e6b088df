//! # Telephony Session
//!
//! Per-connection protocol state for the media-stream leg. Parses inbound
//! frames, tracks the connection lifecycle, and dispatches typed events to a
//! [`TelephonyHandler`] in arrival order.
//!
//! ## Connection Lifecycle:
//! 1. **Opened**: transport accepted, waiting for `start`
//! 2. **Active**: `start` received, stream identifier known
//! 3. **Closed**: `stop` received or transport closed (terminal)
//!
//! Media, dtmf and mark events outside **Active** are still delivered to the
//! handler. The handler decides what to do with them.

use crate::error::{BridgeError, BridgeResult};
use crate::telephony::protocol::{
    ConnectedEvent, DtmfEvent, MarkEvent, MediaEvent, OutboundFrame, StartEvent, StopEvent,
    TelephonyEvent,
};
use tracing::{debug, warn};

/// Lifecycle state of one telephony connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opened,
    Active,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Opened => "opened",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Callbacks for one telephony connection.
///
/// Every method runs synchronously on the connection's event loop. Returning an
/// error does not stop the connection: the session reports it through
/// [`TelephonyHandler::on_error`] and keeps reading frames.
pub trait TelephonyHandler {
    fn on_connected(&mut self, _event: &ConnectedEvent) -> BridgeResult<()> {
        Ok(())
    }

    fn on_start(&mut self, event: &StartEvent) -> BridgeResult<()>;

    fn on_media(&mut self, event: &MediaEvent) -> BridgeResult<()>;

    fn on_stop(&mut self, event: &StopEvent) -> BridgeResult<()>;

    fn on_dtmf(&mut self, _event: &DtmfEvent) -> BridgeResult<()> {
        Ok(())
    }

    fn on_mark(&mut self, _event: &MarkEvent) -> BridgeResult<()> {
        Ok(())
    }

    /// A handler failed while processing a frame, or the transport reported
    /// a protocol error.
    fn on_error(&mut self, error: &BridgeError);

    /// The transport is gone. Called exactly once per connection.
    fn on_close(&mut self);
}

/// Where outbound telephony frames go.
///
/// Implemented by the WebSocket actor's address in production and by a
/// recording double in tests. Sends are fire-and-forget.
pub trait TelephonyOutbound: Send + Sync {
    fn send_text(&self, frame: String);

    /// Ask the transport to close the connection.
    fn close(&self);
}

/// Send a `media` frame carrying base64 μ-law audio.
pub fn send_media(outbound: &dyn TelephonyOutbound, stream_sid: &str, payload: String) -> BridgeResult<()> {
    outbound.send_text(OutboundFrame::media(stream_sid, payload).to_json()?);
    Ok(())
}

/// Send a `clear` frame, dropping audio the provider has queued for playback.
pub fn send_clear(outbound: &dyn TelephonyOutbound, stream_sid: &str) -> BridgeResult<()> {
    outbound.send_text(OutboundFrame::clear(stream_sid).to_json()?);
    Ok(())
}

/// Send a `mark` frame; the provider echoes it back once playback reaches it.
pub fn send_mark(outbound: &dyn TelephonyOutbound, stream_sid: &str, name: &str) -> BridgeResult<()> {
    outbound.send_text(OutboundFrame::mark(stream_sid, name).to_json()?);
    Ok(())
}

/// Protocol state for one telephony connection, owning its handler.
pub struct TelephonySession<H: TelephonyHandler> {
    state: ConnectionState,
    stream_sid: Option<String>,
    last_sequence: Option<u64>,
    close_notified: bool,
    handler: H,
}

impl<H: TelephonyHandler> TelephonySession<H> {
    pub fn new(handler: H) -> Self {
        Self {
            state: ConnectionState::Opened,
            stream_sid: None,
            last_sequence: None,
            close_notified: false,
            handler,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Handle one inbound text frame.
    ///
    /// ## Dispatch rules:
    /// - Malformed JSON is logged at debug and dropped
    /// - Unknown event names are dropped without touching the handler
    /// - Handler errors are routed to `on_error` and never propagate
    pub fn dispatch(&mut self, text: &str) {
        if self.state == ConnectionState::Closed {
            debug!("Dropping frame received after close");
            return;
        }

        let event = match TelephonyEvent::parse(text) {
            Ok(event) => event,
            Err(err) => {
                debug!("Ignoring malformed telephony frame: {}", err);
                return;
            }
        };

        self.track_sequence(&event);

        let result = match &event {
            TelephonyEvent::Connected(e) => self.handler.on_connected(e),
            TelephonyEvent::Start(e) => {
                if self.state == ConnectionState::Opened {
                    self.state = ConnectionState::Active;
                    self.stream_sid = Some(e.stream_sid().to_string());
                }
                self.handler.on_start(e)
            }
            TelephonyEvent::Media(e) => self.handler.on_media(e),
            TelephonyEvent::Stop(e) => {
                let result = self.handler.on_stop(e);
                self.state = ConnectionState::Closed;
                result
            }
            TelephonyEvent::Dtmf(e) => self.handler.on_dtmf(e),
            TelephonyEvent::Mark(e) => self.handler.on_mark(e),
            TelephonyEvent::Unknown => {
                debug!("Ignoring unknown telephony event");
                Ok(())
            }
        };

        if let Err(err) = result {
            warn!(event = event.name(), "Telephony handler failed: {}", err);
            self.handler.on_error(&err);
        }
    }

    /// Report a transport-level error to the handler.
    pub fn transport_error(&mut self, error: BridgeError) {
        self.handler.on_error(&error);
    }

    /// The transport closed. Fires `on_close` once no matter how often it is called.
    pub fn transport_closed(&mut self) -> bool {
        if self.close_notified {
            return false;
        }
        self.state = ConnectionState::Closed;
        self.close_notified = true;
        self.handler.on_close();
        true
    }

    /// Sequence numbers are recorded but never enforced.
    fn track_sequence(&mut self, event: &TelephonyEvent) {
        let Some(sequence) = event.sequence_number() else {
            return;
        };
        if let Some(previous) = self.last_sequence {
            if previous.checked_add(1) != Some(sequence) {
                debug!(previous, sequence, "Telephony sequence gap or reorder");
            }
        }
        self.last_sequence = Some(sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Handler double that records every callback by name.
    #[derive(Default)]
    struct RecordingHandler {
        calls: Vec<String>,
        fail_media: bool,
    }

    impl TelephonyHandler for RecordingHandler {
        fn on_connected(&mut self, _event: &ConnectedEvent) -> BridgeResult<()> {
            self.calls.push("connected".to_string());
            Ok(())
        }

        fn on_start(&mut self, event: &StartEvent) -> BridgeResult<()> {
            self.calls.push(format!("start:{}", event.stream_sid()));
            Ok(())
        }

        fn on_media(&mut self, event: &MediaEvent) -> BridgeResult<()> {
            if self.fail_media {
                return Err(BridgeError::Transport("boom".to_string()));
            }
            self.calls.push(format!("media:{}", event.media.payload));
            Ok(())
        }

        fn on_stop(&mut self, _event: &StopEvent) -> BridgeResult<()> {
            self.calls.push("stop".to_string());
            Ok(())
        }

        fn on_dtmf(&mut self, event: &DtmfEvent) -> BridgeResult<()> {
            self.calls.push(format!("dtmf:{}", event.dtmf.digit));
            Ok(())
        }

        fn on_error(&mut self, error: &BridgeError) {
            self.calls.push(format!("error:{}", error.code()));
        }

        fn on_close(&mut self) {
            self.calls.push("close".to_string());
        }
    }

    #[derive(Default)]
    struct RecordingOutbound {
        frames: Mutex<Vec<String>>,
    }

    impl TelephonyOutbound for RecordingOutbound {
        fn send_text(&self, frame: String) {
            self.frames.lock().unwrap().push(frame);
        }

        fn close(&self) {}
    }

    fn media_frame(payload: &str) -> String {
        format!(
            r#"{{"event":"media","sequenceNumber":"2","streamSid":"ST1","media":{{"track":"inbound","chunk":"1","timestamp":"0","payload":"{}"}}}}"#,
            payload
        )
    }

    const START: &str = r#"{"event":"start","sequenceNumber":"1","streamSid":"ST1","start":{"streamSid":"ST1","callSid":"CA1"}}"#;

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = TelephonySession::new(RecordingHandler::default());
        assert_eq!(session.state(), ConnectionState::Opened);

        session.dispatch(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#);
        session.dispatch(START);
        assert_eq!(session.state(), ConnectionState::Active);
        assert_eq!(session.stream_sid(), Some("ST1"));

        session.dispatch(r#"{"event":"stop","sequenceNumber":"3","streamSid":"ST1","stop":{"callSid":"CA1"}}"#);
        assert_eq!(session.state(), ConnectionState::Closed);

        assert_eq!(session.handler_mut().calls, vec!["connected", "start:ST1", "stop"]);
    }

    #[test]
    fn test_unknown_event_invokes_no_handler() {
        let mut session = TelephonySession::new(RecordingHandler::default());
        session.dispatch(r#"{"event":"ping"}"#);
        session.dispatch("definitely not json");
        assert!(session.handler_mut().calls.is_empty());
        assert_eq!(session.state(), ConnectionState::Opened);
    }

    #[test]
    fn test_media_before_start_is_still_forwarded() {
        let mut session = TelephonySession::new(RecordingHandler::default());
        session.dispatch(&media_frame("AAA="));
        assert_eq!(session.handler_mut().calls, vec!["media:AAA="]);
    }

    #[test]
    fn test_handler_error_is_reported_not_propagated() {
        let mut session = TelephonySession::new(RecordingHandler {
            fail_media: true,
            ..Default::default()
        });
        session.dispatch(START);
        session.dispatch(&media_frame("AAA="));
        session.dispatch(r#"{"event":"dtmf","streamSid":"ST1","dtmf":{"track":"inbound_track","digit":"5"}}"#);

        assert_eq!(
            session.handler_mut().calls,
            vec!["start:ST1", "error:transport_error", "dtmf:5"]
        );
        assert_eq!(session.state(), ConnectionState::Active);
    }

    #[test]
    fn test_close_fires_once() {
        let mut session = TelephonySession::new(RecordingHandler::default());
        session.dispatch(START);
        assert!(session.transport_closed());
        assert!(!session.transport_closed());
        session.dispatch(&media_frame("AAA="));

        let closes = session.handler_mut().calls.iter().filter(|c| *c == "close").count();
        assert_eq!(closes, 1);
        assert!(!session.handler_mut().calls.iter().any(|c| c.starts_with("media")));
    }

    #[test]
    fn test_out_of_order_sequence_numbers_are_not_rejected() {
        let mut session = TelephonySession::new(RecordingHandler::default());
        session.dispatch(START);
        for (sequence, payload) in [(3, "AAA="), (2, "BBB="), (2, "CCC=")] {
            session.dispatch(&format!(
                r#"{{"event":"media","sequenceNumber":{},"streamSid":"ST1","media":{{"payload":"{}"}}}}"#,
                sequence, payload
            ));
        }

        assert_eq!(
            session.handler_mut().calls,
            vec!["start:ST1", "media:AAA=", "media:BBB=", "media:CCC="]
        );
        assert_eq!(session.last_sequence, Some(2));
    }

    #[test]
    fn test_outbound_helpers_frame_json() {
        let outbound = Arc::new(RecordingOutbound::default());
        send_media(outbound.as_ref(), "ST1", "AAEC".to_string()).unwrap();
        send_clear(outbound.as_ref(), "ST1").unwrap();
        send_mark(outbound.as_ref(), "ST1", "turn-1").unwrap();

        let frames = outbound.frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains(r#""event":"media""#));
        assert!(frames[1].contains(r#""event":"clear""#));
        assert!(frames[2].contains("turn-1"));
    }
}
