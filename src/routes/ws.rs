use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse, ResponseError};
use actix_web_actors::ws;
use serde::Deserialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;

use crate::router::events::{ClientEvent, ServerEvent};
use crate::router::{ConnectionHandle, EventRouter, SessionState};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

// Outbound frame pushed into the actor by the registry forwarder.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

/// One WebSocket transport session.
///
/// The session itself does no routing: inbound events go through an
/// unbounded channel into a single worker task, which preserves the order
/// a client sent its events in even though each one awaits storage or bus
/// calls. Outbound frames arrive through the registry's sender and are
/// forwarded to the actor as [`TextMessage`]s.
struct WsSession {
    handle: ConnectionHandle,
    state: SessionState,
    inbound: UnboundedSender<ClientEvent>,
    worker: JoinHandle<()>,
    router: Arc<EventRouter>,
    hb: Instant,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.handle.user_id, "heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.state = SessionState::Authenticated;
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.state = SessionState::Closed;
        self.worker.abort();

        let router = self.router.clone();
        let conn_id = self.handle.id;
        tokio::spawn(async move {
            router.disconnect(conn_id).await;
        });
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                if self.state != SessionState::Authenticated {
                    return;
                }
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        // Queue for the worker; a closed worker means the
                        // session is already tearing down.
                        let _ = self.inbound.send(event);
                    }
                    Err(e) => {
                        tracing::debug!(user_id = %self.handle.user_id, error = %e, "unparseable client event");
                        if let Ok(frame) = (ServerEvent::Error {
                            error: format!("unrecognized event: {e}"),
                        })
                        .to_json()
                        {
                            ctx.text(frame);
                        }
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(user_id = %self.handle.user_id, "binary frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(user_id = %self.handle.user_id, ?reason, "client closed");
                ctx.stop();
            }
            _ => {}
        }
    }
}

fn bearer_token(params: &WsParams, req: &HttpRequest) -> Option<String> {
    params.token.clone().or_else(|| {
        req.headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    })
}

/// WebSocket entry point. The handshake is settled before the actor
/// starts: token validation, registration and room preload all happen
/// here, so a refused connection never upgrades.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let Some(token) = bearer_token(&query.into_inner(), &req) else {
        return Ok(HttpResponse::Unauthorized().finish());
    };

    let (outbound_tx, mut outbound_rx) = unbounded_channel::<String>();
    let handle = match state.router.connect(&token, outbound_tx).await {
        Ok(handle) => handle,
        Err(e) => return Ok(e.error_response()),
    };

    // FIFO dispatch worker: one task per connection, draining inbound
    // events in order. Replies go back through the registry so delivery
    // shares one path with fan-outs.
    let (inbound_tx, mut inbound_rx) = unbounded_channel::<ClientEvent>();
    let router = state.router.clone();
    let worker = tokio::spawn(async move {
        while let Some(event) = inbound_rx.recv().await {
            if let Some(reply) = router.handle_event(handle, event).await {
                match reply.to_json() {
                    Ok(json) => router.connections().send_to_connection(handle.id, &json),
                    Err(e) => tracing::error!(error = %e, "failed to serialize reply"),
                }
            }
        }
    });

    let session = WsSession {
        handle,
        state: SessionState::Connecting,
        inbound: inbound_tx,
        worker,
        router: state.router.clone(),
        hb: Instant::now(),
    };

    // A refused upgrade (bad headers, protocol error) must undo the
    // registration: the user would otherwise stay online with a dead
    // sender. Dropping the session also closes the inbound channel, which
    // ends the worker.
    let (addr, resp) = match ws::WsResponseBuilder::new(session, &req, stream).start_with_addr() {
        Ok(started) => started,
        Err(e) => {
            state.router.disconnect(handle.id).await;
            return Err(e);
        }
    };

    // Bridge the registry's outbound channel to the actor. Ends when the
    // registry drops the sender at unregister time.
    tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            addr.do_send(TextMessage(payload));
        }
    });

    Ok(resp)
}
