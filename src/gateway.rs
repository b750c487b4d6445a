//! # WebSocket Gateway
//!
//! Clients connect to `/ws` and exchange JSON event frames (see
//! [`crate::relay::events`]). Each connection is one `RelaySocket` actor.
//!
//! ## Connection lifecycle:
//! 1. **Upgrade**: the HTTP request is upgraded and the actor started
//! 2. **Register**: the actor gets a fresh connection id, registers its
//!    mailbox with the [`ConnectionHub`] and is told its id via `connected`
//! 3. **Events**: membership and signaling are handled inline; utterances
//!    run as spawned tasks so a slow provider never blocks the socket
//! 4. **Heartbeat**: the server pings periodically and drops clients that
//!    stay silent past the timeout
//! 5. **Close**: the connection leaves its rooms, its rate-limit state is
//!    dropped and it is removed from the hub
//!
//! Events addressed to a connection that has already closed are dropped.
//!
//! ## Frame size:
//! Audio travels as base64 inside a text frame, so the frame limit is derived
//! from `max_audio_bytes` plus room for the JSON envelope. Fragmented messages
//! are reassembled up to the same limit. Anything larger is answered with an
//! `invalid_input` error and the socket is closed with code 1009.

use crate::relay::events::{Connected, InboundEvent, OutboundEvent, SignalKind};
use crate::relay::{EventSink, RelayEngine};
use crate::state::AppState;
use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An outbound event for one connection's actor.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub OutboundEvent);

/// Open connections by id. The relay engine delivers through this.
#[derive(Default)]
pub struct ConnectionHub {
    connections: RwLock<HashMap<String, Recipient<Deliver>>>,
}

impl ConnectionHub {
    pub fn register(&self, connection_id: &str, recipient: Recipient<Deliver>) {
        self.connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(connection_id.to_string(), recipient);
    }

    pub fn unregister(&self, connection_id: &str) {
        self.connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(connection_id);
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl EventSink for ConnectionHub {
    fn deliver(&self, connection_id: &str, event: OutboundEvent) {
        let connections = self.connections.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        match connections.get(connection_id) {
            Some(recipient) => recipient.do_send(Deliver(event)),
            None => debug!(connection_id = %connection_id, "Dropping event for closed connection"),
        }
    }

    fn is_connected(&self, connection_id: &str) -> bool {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(connection_id)
    }
}

/// Envelope allowance on top of the base64-encoded audio.
const FRAME_OVERHEAD_BYTES: usize = 64 * 1024;

/// Largest inbound message accepted, for clips up to `max_audio_bytes`.
pub fn max_frame_size(max_audio_bytes: usize) -> usize {
    max_audio_bytes
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(FRAME_OVERHEAD_BYTES)
}

/// A fragmented message waiting for its final frame.
struct Fragments {
    text: bool,
    buffer: Vec<u8>,
}

/// Parse a text frame, or produce the `invalid_json` error to send back.
fn parse_frame(text: &str) -> Result<InboundEvent, OutboundEvent> {
    serde_json::from_str(text)
        .map_err(|e| OutboundEvent::error("invalid_json", format!("Could not parse event: {}", e)))
}

pub struct RelaySocket {
    connection_id: String,
    state: AppState,
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    max_message_bytes: usize,
    fragments: Option<Fragments>,
}

impl RelaySocket {
    pub fn new(state: AppState) -> Self {
        let heartbeat_interval = Duration::from_secs(state.config.server.heartbeat_interval_secs);
        let client_timeout = Duration::from_secs(state.config.server.client_timeout_secs);
        let max_message_bytes = max_frame_size(state.config.relay.max_audio_bytes);
        Self {
            connection_id: Uuid::new_v4().to_string(),
            state,
            last_heartbeat: Instant::now(),
            heartbeat_interval,
            client_timeout,
            max_message_bytes,
            fragments: None,
        }
    }

    fn engine(&self) -> Arc<RelayEngine> {
        self.state.engine.clone()
    }

    fn send_event(&self, event: &OutboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(connection_id = %self.connection_id, error = %e, "Failed to serialize event"),
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match parse_frame(text) {
            Ok(event) => self.handle_event(event),
            Err(reply) => {
                debug!(connection_id = %self.connection_id, "Rejected malformed frame");
                self.send_event(&reply, ctx);
            }
        }
    }

    fn reject_binary(&self, ctx: &mut ws::WebsocketContext<Self>) {
        self.send_event(
            &OutboundEvent::error("invalid_json", "Binary frames are not supported; send JSON text"),
            ctx,
        );
    }

    fn reject_oversized(&self, ctx: &mut ws::WebsocketContext<Self>) {
        warn!(
            connection_id = %self.connection_id,
            limit = self.max_message_bytes,
            "Inbound message too large, closing connection"
        );
        self.send_event(
            &OutboundEvent::error(
                "invalid_input",
                format!("Message exceeds {} bytes", self.max_message_bytes),
            ),
            ctx,
        );
        ctx.close(Some(ws::CloseCode::Size.into()));
        ctx.stop();
    }

    /// Collect one fragment; the message is dispatched on its last frame.
    fn handle_fragment(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        let (chunk, last) = match item {
            Item::FirstText(chunk) => {
                self.fragments = Some(Fragments { text: true, buffer: Vec::new() });
                (chunk, false)
            }
            Item::FirstBinary(chunk) => {
                self.fragments = Some(Fragments { text: false, buffer: Vec::new() });
                (chunk, false)
            }
            Item::Continue(chunk) => (chunk, false),
            Item::Last(chunk) => (chunk, true),
        };

        let overflow = match self.fragments.as_mut() {
            None => {
                debug!(connection_id = %self.connection_id, "Continuation frame without a first fragment");
                return;
            }
            // Binary content is rejected whole, so only its end matters.
            Some(fragments) if !fragments.text => false,
            Some(fragments) => {
                if fragments.buffer.len() + chunk.len() > self.max_message_bytes {
                    true
                } else {
                    fragments.buffer.extend_from_slice(&chunk);
                    false
                }
            }
        };

        if overflow {
            self.fragments = None;
            self.reject_oversized(ctx);
            return;
        }
        if !last {
            return;
        }

        match self.fragments.take() {
            Some(Fragments { text: true, buffer }) => match String::from_utf8(buffer) {
                Ok(text) => self.handle_text(&text, ctx),
                Err(_) => self.send_event(
                    &OutboundEvent::error("invalid_json", "Fragmented message is not valid UTF-8"),
                    ctx,
                ),
            },
            Some(Fragments { text: false, .. }) => self.reject_binary(ctx),
            None => {}
        }
    }

    fn handle_event(&mut self, event: InboundEvent) {
        let id = self.connection_id.clone();
        match event {
            InboundEvent::JoinRoom(request) => self.state.engine.join(&id, request),
            InboundEvent::LeaveRoom => self.state.engine.leave(&id),
            InboundEvent::Offer(signal) => self.state.engine.relay_signal(&id, SignalKind::Offer, signal),
            InboundEvent::Answer(signal) => self.state.engine.relay_signal(&id, SignalKind::Answer, signal),
            InboundEvent::IceCandidate(signal) => {
                self.state.engine.relay_signal(&id, SignalKind::IceCandidate, signal)
            }
            InboundEvent::SendText(request) => {
                let engine = self.engine();
                tokio::spawn(async move { engine.relay_text(&id, request).await });
            }
            InboundEvent::AudioStream(request) => {
                let engine = self.engine();
                tokio::spawn(async move { engine.relay_audio(&id, request).await });
            }
        }
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection started");

        self.state.hub.register(&self.connection_id, ctx.address().recipient());
        self.state.connection_opened();
        self.send_event(
            &OutboundEvent::Connected(Connected {
                connection_id: self.connection_id.clone(),
            }),
            ctx,
        );

        let client_timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection stopped");

        // Unregister first: utterance tasks still running check the hub after
        // admission and undo their limiter entry.
        self.state.hub.unregister(&self.connection_id);
        self.state.engine.disconnect(&self.connection_id);
        self.state.connection_closed();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => self.reject_binary(ctx),
            Ok(ws::Message::Continuation(item)) => {
                self.last_heartbeat = Instant::now();
                self.handle_fragment(item, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection_id = %self.connection_id, reason = ?reason, "Client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(ws::ProtocolError::Overflow) => self.reject_oversized(ctx),
            Err(e) => {
                error!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<Deliver> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        self.send_event(&msg.0, ctx);
    }
}

/// `GET /ws`: upgrade to a relay connection.
pub async fn relay_socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "New WebSocket connection request");
    let socket = RelaySocket::new(state.get_ref().clone());
    let frame_size = socket.max_message_bytes;
    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(frame_size)
        .start()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::relay::events::Transcription;
    use actix_web::{test, App};
    use std::sync::Mutex;

    struct Collector {
        seen: Arc<Mutex<Vec<OutboundEvent>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<Deliver> for Collector {
        type Result = ();

        fn handle(&mut self, msg: Deliver, _ctx: &mut Self::Context) {
            self.seen.lock().unwrap().push(msg.0);
        }
    }

    /// Answered after every earlier message in the mailbox is handled.
    #[derive(Message)]
    #[rtype(result = "()")]
    struct Flush;

    impl Handler<Flush> for Collector {
        type Result = ();

        fn handle(&mut self, _msg: Flush, _ctx: &mut Self::Context) {}
    }

    fn echo(text: &str) -> OutboundEvent {
        OutboundEvent::Transcription(Transcription {
            text: text.into(),
            language: "English".into(),
        })
    }

    #[actix_web::test]
    async fn test_hub_routes_to_registered_connection() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = Collector { seen: seen.clone() }.start();

        let hub = ConnectionHub::default();
        hub.register("a", addr.clone().recipient());
        hub.deliver("a", echo("one"));
        hub.deliver("ghost", echo("lost"));
        addr.send(Flush).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![echo("one")]);
    }

    #[actix_web::test]
    async fn test_unregistered_connection_receives_nothing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = Collector { seen: seen.clone() }.start();

        let hub = ConnectionHub::default();
        hub.register("a", addr.clone().recipient());
        assert!(hub.is_connected("a"));
        hub.unregister("a");
        assert!(!hub.is_connected("a"));
        assert_eq!(hub.len(), 0);

        hub.deliver("a", echo("late"));
        addr.send(Flush).await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[::core::prelude::v1::test]
    fn test_malformed_frame_yields_invalid_json_error() {
        match parse_frame("{not json") {
            Err(OutboundEvent::Error(payload)) => assert_eq!(payload.code, "invalid_json"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(parse_frame(r#"{"event":"leave-room"}"#).is_ok());
    }

    #[::core::prelude::v1::test]
    fn test_frame_limit_fits_largest_audio_clip() {
        let limit = max_frame_size(10 * 1024 * 1024);
        assert!(limit > 64 * 1024);
        assert!(limit >= 10 * 1024 * 1024 / 3 * 4 + 1024);
        assert_eq!(max_frame_size(3), 4 + FRAME_OVERHEAD_BYTES);
    }

    const TEXT: u8 = 0x1;
    const BINARY: u8 = 0x2;
    const CONTINUATION: u8 = 0x0;

    /// A client frame. Clients must mask; a zero key leaves the payload as is.
    fn client_frame(opcode: u8, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![(if fin { 0x80 } else { 0x00 }) | opcode];
        match payload.len() {
            len if len < 126 => frame.push(0x80 | len as u8),
            len if len <= u16::MAX as usize => {
                frame.push(0x80 | 126);
                frame.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                frame.push(0x80 | 127);
                frame.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(payload);
        frame
    }

    /// Run a socket session over the given client bytes and return everything
    /// the server wrote before the stream ended.
    async fn session(client_bytes: Vec<u8>) -> Vec<u8> {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(AppConfig::default())))
                .route("/ws", web::get().to(relay_socket)),
        )
        .await;

        let request = test::TestRequest::get()
            .uri("/ws")
            .insert_header(("upgrade", "websocket"))
            .insert_header(("connection", "upgrade"))
            .insert_header(("sec-websocket-version", "13"))
            .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
            .set_payload(client_bytes)
            .to_request();

        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), actix_web::http::StatusCode::SWITCHING_PROTOCOLS);
        test::read_body(response).await.to_vec()
    }

    fn occurrences(haystack: &[u8], needle: &str) -> usize {
        haystack
            .windows(needle.len())
            .filter(|window| *window == needle.as_bytes())
            .count()
    }

    #[actix_web::test]
    async fn test_text_frame_larger_than_64k_is_handled() {
        let payload = format!(r#"{{"event":"bogus","pad":"{}"}}"#, "x".repeat(100_000));
        let written = session(client_frame(TEXT, true, payload.as_bytes())).await;

        assert_eq!(occurrences(&written, r#""event":"connected""#), 1);
        assert_eq!(occurrences(&written, "invalid_json"), 1);
    }

    #[actix_web::test]
    async fn test_fragmented_message_is_reassembled() {
        let message = br#"{"event":"leave-room"}"#;
        let mut bytes = client_frame(TEXT, false, &message[..8]);
        bytes.extend(client_frame(CONTINUATION, false, &message[8..15]));
        bytes.extend(client_frame(CONTINUATION, true, &message[15..]));
        bytes.extend(client_frame(TEXT, true, b"{not json"));

        let written = session(bytes).await;

        // Only the unfragmented garbage is rejected.
        assert_eq!(occurrences(&written, "invalid_json"), 1);
        assert_eq!(occurrences(&written, "Could not parse event"), 1);
    }

    #[actix_web::test]
    async fn test_fragmented_binary_message_is_rejected() {
        let mut bytes = client_frame(BINARY, false, &[1, 2, 3]);
        bytes.extend(client_frame(CONTINUATION, true, &[4, 5, 6]));

        let written = session(bytes).await;

        assert_eq!(occurrences(&written, "Binary frames are not supported"), 1);
    }
}
