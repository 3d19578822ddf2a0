//! WebSocket push channel.
//!
//! Each socket is registered with the [`RoomRegistry`] for its lifetime. A
//! writer task drains the client's outbound queue onto the socket while the
//! connection task reads client frames and applies them to room
//! membership. Forwarded chat messages go out as binary frames holding the
//! wire-exact payload; everything else is a JSON text frame.

use std::ops::ControlFlow;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use chatrelay_shared::constants::{EVENT_CHAT_MESSAGE, EVENT_MY_RESPONSE};

use crate::api::AppState;
use crate::rooms::{Ack, ClientId, RoomRegistry, ServerEvent, Target};

/// Frames accepted from clients: `{"event": <name>, "data": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum ClientEvent {
    Join { room: String },
    Leave { room: String },
    CloseRoom { room: String },
    MyEvent { data: serde_json::Value },
    MyBroadcastEvent { data: serde_json::Value },
    MyRoomEvent { room: String, data: serde_json::Value },
    ConvMessage { id: String, message: String },
    DisconnectRequest,
}

#[derive(Serialize)]
struct PushFrame<'a, T> {
    event: &'a str,
    data: T,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.rooms))
}

async fn handle_socket(socket: WebSocket, rooms: RoomRegistry) {
    let (client, mut outbound) = rooms.connect().await;
    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match to_frame(event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(client = %client, error = %e, "Failed to encode push frame");
                    continue;
                }
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        debug!(client = %client, "Push writer ended");
    });

    let connected = Ack {
        count: Some(0),
        ..Ack::new("Connected")
    };
    rooms
        .emit(&Target::Client(client), ServerEvent::MyResponse(connected))
        .await;

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(client = %client, error = %e, "WebSocket error");
                break;
            }
        };

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(client = %client, error = %e, "Ignoring malformed client frame");
                continue;
            }
        };
        trace!(client = %client, ?event, "Client event");

        if handle_event(&rooms, client, event).await.is_break() {
            info!(client = %client, "Client requested disconnect");
            break;
        }
    }

    // Dropping the registry's sender lets the writer flush and close.
    rooms.disconnect(&client).await;
    let _ = writer.await;
}

fn ack(data: impl Into<serde_json::Value>) -> ServerEvent {
    ServerEvent::MyResponse(Ack::new(data))
}

async fn handle_event(rooms: &RoomRegistry, client: ClientId, event: ClientEvent) -> ControlFlow<()> {
    let sender = Target::Client(client);
    match event {
        ClientEvent::Join { room } => {
            rooms.join(&client, &room).await;
            rooms.emit(&sender, ack(format!("Entered room: {room}"))).await;
        }
        ClientEvent::Leave { room } => {
            rooms.leave(&client, &room).await;
            rooms.emit(&sender, ack(format!("Left room: {room}"))).await;
        }
        ClientEvent::CloseRoom { room } => {
            let notice = ack(format!("Room {room} is closing."));
            rooms.emit(&Target::Room(room.clone()), notice).await;
            rooms.close_room(&room).await;
        }
        ClientEvent::MyEvent { data } => {
            rooms.emit(&sender, ack(data)).await;
        }
        ClientEvent::MyBroadcastEvent { data } => {
            rooms.emit(&Target::Broadcast, ack(data)).await;
        }
        ClientEvent::MyRoomEvent { room, data } => {
            rooms.emit(&Target::Room(room), ack(data)).await;
        }
        ClientEvent::ConvMessage { id, message } => {
            // Not sent upstream.
            info!(conversation = %id, message = %message, "Dropping outgoing conversation message");
        }
        ClientEvent::DisconnectRequest => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

fn to_frame(event: ServerEvent) -> Result<Message, serde_json::Error> {
    match event {
        ServerEvent::ChatMessage(payload) => {
            trace!(event = EVENT_CHAT_MESSAGE, bytes = payload.len(), "Pushing frame");
            Ok(Message::Binary(payload.to_vec()))
        }
        ServerEvent::MyResponse(ack) => {
            let frame = PushFrame {
                event: EVENT_MY_RESPONSE,
                data: ack,
            };
            Ok(Message::Text(serde_json::to_string(&frame)?))
        }
    }
}
