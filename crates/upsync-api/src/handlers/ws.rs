//! WebSocket transport for realtime upload events.
//!
//! One outbox per connection; a sender task drains it into the socket while the
//! receive loop handles `join_room`, `leave_room` and `ping`.

use crate::auth::RequestContext;
use crate::state::AppState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};
use upsync_core::{AppError, ClientMessage, ErrorMetadata, Room, RoomType, ServerEvent};
use upsync_engine::ConnectionHandle;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
) -> Response {
    debug!(user_id = %ctx.user_id, company_id = %ctx.company_id, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, state))
}

async fn handle_socket(socket: WebSocket, ctx: RequestContext, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut subscription) = state.engine.connect();

    info!(
        connection = %connection.id,
        user_id = %ctx.user_id,
        "WebSocket connected"
    );

    let sender_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(event.as_ref()) {
                Ok(json) => {
                    if let Err(e) = sender.send(Message::Text(json.into())).await {
                        debug!(error = %e, "Failed to send WebSocket message");
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, event = event.name(), "Failed to serialize event");
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => {
                    if let Err(e) = handle_client_message(&state, &ctx, connection, message).await
                    {
                        debug!(error = %e, "Client message rejected");
                        let event = ServerEvent::error(e.error_code(), e.client_message());
                        if !state.engine.broadcaster().send_to(&connection, event) {
                            break;
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Failed to parse client message");
                    let event = ServerEvent::error("INVALID_MESSAGE", "Invalid message format");
                    if !state.engine.broadcaster().send_to(&connection, event) {
                        break;
                    }
                }
            },
            Ok(Message::Close(_)) => break,
            // Protocol-level pings are answered by the websocket layer
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.engine.disconnect(&connection);
    sender_task.abort();
    info!(connection = %connection.id, "WebSocket disconnected");
}

async fn handle_client_message(
    state: &AppState,
    ctx: &RequestContext,
    connection: ConnectionHandle,
    message: ClientMessage,
) -> Result<(), AppError> {
    match message {
        ClientMessage::JoinRoom(ack) => {
            let room = ack.room();
            authorize_room(state, ctx, room).await?;
            state.engine.join_room(room, connection).await?;
        }
        ClientMessage::LeaveRoom(ack) => {
            state.engine.leave_room(ack.room(), &connection);
        }
        ClientMessage::Ping => {
            state
                .engine
                .broadcaster()
                .send_to(&connection, ServerEvent::Pong);
        }
    }
    Ok(())
}

/// Session and company rooms are limited to the caller's company. Chat membership is
/// checked by the chat service before it hands out room ids.
async fn authorize_room(state: &AppState, ctx: &RequestContext, room: Room) -> Result<(), AppError> {
    match room.room_type {
        RoomType::UploadSession => {
            state.owned_session(ctx, room.id).await?;
        }
        RoomType::Company if room.id != ctx.company_id => {
            return Err(AppError::InvalidInput(
                "Cannot join another company's room".to_string(),
            ));
        }
        RoomType::Company | RoomType::Chatroom | RoomType::Thread => {}
    }
    Ok(())
}
