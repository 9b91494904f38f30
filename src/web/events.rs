//! Event stream: `/ws/events`
//!
//! Each connection is one bus subscriber. Events are sent as JSON text
//! messages in publish order, with a WebSocket ping every heartbeat
//! interval. A client that reads too slowly loses the oldest events of its
//! own queue and nothing else.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;

use crate::app::AppContext;

pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    let max = ctx.settings.ws_max_msg_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| stream_events(socket, ctx))
}

async fn stream_events(socket: WebSocket, ctx: AppContext) {
    let subscription = match ctx.bus.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(error = %e, "Event stream refused; bus is closed");
            return;
        }
    };
    let id = subscription.id();
    tracing::info!(subscriber = %id, "Event stream opened");

    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(ctx.settings.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                // None: evicted as unresponsive, or the bus shut down
                let Some(event) = event else { break };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize bus event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(subscriber = %id, error = %e, "Event stream error");
                    break;
                }
            },
        }
    }

    ctx.bus.unsubscribe(id).await;
    drop(subscription);
    tracing::info!(subscriber = %id, "Event stream closed");
}
