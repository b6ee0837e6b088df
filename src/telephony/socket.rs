//! # Media-Stream WebSocket
//!
//! The telephony provider opens one WebSocket per call on `/media-stream`.
//! Each connection is an independent actor owning its [`TelephonySession`]
//! and the call bridge behind it.
//!
//! ## Actor Model:
//! Telephony frames, model events and watchdog timers all arrive through this
//! actor's mailbox, so everything for one call is handled in arrival order
//! without locks.
//!
//! ## Timers:
//! - **Heartbeat**: WebSocket ping every 30s; no traffic for 60s closes the connection
//! - **Setup watchdog**: fails the call if the model is not ready in time
//! - **Duration watchdog**: ends the call once the maximum duration is reached

use crate::call::{CallBridge, CallServices};
use crate::error::BridgeError;
use crate::model::{ModelEvent, ModelEventSink};
use crate::state::AppState;
use crate::telephony::session::{TelephonyOutbound, TelephonySession};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct MediaStreamSocket {
    connection_id: String,
    services: CallServices,
    session: Option<TelephonySession<CallBridge>>,
    last_heartbeat: Instant,
}

impl MediaStreamSocket {
    pub fn new(services: CallServices) -> Self {
        Self {
            connection_id: Uuid::new_v4().to_string(),
            services,
            session: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn with_bridge(&mut self, f: impl FnOnce(&mut CallBridge)) {
        if let Some(session) = self.session.as_mut() {
            f(session.handler_mut());
        }
    }
}

/// Write one text frame to the telephony provider.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

/// Close the connection from our side.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseSocket;

/// Deliver a model event into the call's mailbox.
#[derive(Message)]
#[rtype(result = "()")]
struct ModelEventMessage(ModelEvent);

impl TelephonyOutbound for Addr<MediaStreamSocket> {
    fn send_text(&self, frame: String) {
        self.do_send(SendText(frame));
    }

    fn close(&self) {
        self.do_send(CloseSocket);
    }
}

impl ModelEventSink for Addr<MediaStreamSocket> {
    fn deliver(&self, event: ModelEvent) {
        self.do_send(ModelEventMessage(event));
    }
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "Media stream connected");

        let addr = ctx.address();
        let bridge = CallBridge::new(
            self.connection_id.clone(),
            self.services.clone(),
            Arc::new(addr.clone()),
            Arc::new(addr),
        );
        self.session = Some(TelephonySession::new(bridge));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.connection_id, "Media stream heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        if let Some(timeout) = self.services.calls.setup_timeout() {
            ctx.run_later(timeout, |act, _ctx| act.with_bridge(CallBridge::on_setup_timeout));
        }

        if let Some(limit) = self.services.calls.max_call_duration() {
            ctx.run_later(limit, |act, _ctx| act.with_bridge(CallBridge::on_duration_limit));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let Some(session) = self.session.as_mut() else {
            info!(connection_id = %self.connection_id, "Media stream disconnected");
            return;
        };
        info!(
            connection_id = %self.connection_id,
            stream_sid = session.stream_sid().unwrap_or("-"),
            state = session.state().as_str(),
            "Media stream disconnected"
        );
        session.transport_closed();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => {
                if let Some(session) = self.session.as_mut() {
                    session.dispatch(&text);
                }
            }
            Ok(ws::Message::Binary(data)) => {
                debug!(connection_id = %self.connection_id, bytes = data.len(), "Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, "Media stream closed by peer: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, "Media stream protocol error: {}", err);
                if let Some(session) = self.session.as_mut() {
                    session.transport_error(BridgeError::Transport(err.to_string()));
                }
                ctx.stop();
            }
        }
    }
}

impl Handler<SendText> for MediaStreamSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseSocket> for MediaStreamSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseSocket, ctx: &mut Self::Context) {
        debug!(connection_id = %self.connection_id, "Closing media stream");
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

impl Handler<ModelEventMessage> for MediaStreamSocket {
    type Result = ();

    fn handle(&mut self, msg: ModelEventMessage, _ctx: &mut Self::Context) {
        self.with_bridge(|bridge| bridge.on_model_event(msg.0));
    }
}

/// WebSocket endpoint handler for `/media-stream`.
///
/// ## HTTP to WebSocket Upgrade:
/// Refuses the upgrade with 503 when the call limit is already reached;
/// otherwise hands the connection to a new [`MediaStreamSocket`] actor.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New media stream connection from: {:?}", req.connection_info().peer_addr());

    let registry = &app_state.services.registry;
    if !registry.has_capacity() {
        let summary = registry.summary();
        warn!(
            active_calls = summary.active_calls,
            max_concurrent_calls = summary.max_concurrent_calls,
            "Refusing media stream: call limit reached"
        );
        return Err(BridgeError::Capacity(format!(
            "Maximum concurrent calls ({}) reached",
            summary.max_concurrent_calls
        ))
        .into());
    }

    ws::start(MediaStreamSocket::new(app_state.services.clone()), &req, stream)
}
