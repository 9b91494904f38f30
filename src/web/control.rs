//! Control channel: `/ws/control`
//!
//! Every text message is one JSON command and gets exactly one JSON answer.
//! Commands are checked and turned into a [`ControlCommand`] before anything
//! is dispatched; a bad command never closes the connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};

use crate::app::AppContext;
use crate::client::PublishRequest;
use crate::frame::Encoding;

/// Answer to a command the channel could not accept
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("invalid_json")]
    InvalidJson,

    #[error("unknown_action")]
    UnknownAction,

    /// Publish fields failed validation, or the publisher rejected them
    #[error("{0}")]
    InvalidPublish(String),
}

/// A validated control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Ping,
    Publish(PublishRequest),
    /// Accepted and acknowledged; the bus always broadcasts unfiltered
    Subscribe,
    /// Accepted and acknowledged; the bus always broadcasts unfiltered
    SetFilter,
}

impl ControlCommand {
    /// Parse one text message
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ControlError::InvalidJson)?;
        let Value::Object(fields) = value else {
            return Err(ControlError::InvalidJson);
        };

        let action = fields
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();

        match action.as_str() {
            "ping" => Ok(ControlCommand::Ping),
            "publish" => parse_publish(&fields).map(ControlCommand::Publish),
            "subscribe" => Ok(ControlCommand::Subscribe),
            "set_filter" => Ok(ControlCommand::SetFilter),
            _ => Err(ControlError::UnknownAction),
        }
    }
}

fn invalid(message: &str) -> ControlError {
    ControlError::InvalidPublish(message.to_owned())
}

fn parse_publish(fields: &Map<String, Value>) -> Result<PublishRequest, ControlError> {
    let topic = match fields.get("topic") {
        Some(Value::String(topic)) if !topic.is_empty() => topic.clone(),
        _ => return Err(invalid("topic must be a non-empty string")),
    };

    let encoding = match fields.get("encoding") {
        None | Some(Value::Null) => Encoding::Utf8,
        Some(Value::String(s)) if s.is_empty() => Encoding::Utf8,
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| invalid("encoding must be 'utf8' or 'base64'"))?,
        Some(_) => return Err(invalid("encoding must be 'utf8' or 'base64'")),
    };

    let multipart = match fields.get("multipart") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid("multipart must be an array of base64 strings"))?,
        ),
        Some(_) => return Err(invalid("multipart must be an array of base64 strings")),
    };

    let payload = match fields.get("payload") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(invalid("payload must be a string")),
    };

    Ok(PublishRequest {
        topic,
        payload,
        encoding,
        multipart,
    })
}

fn failure(error: &ControlError) -> Value {
    json!({ "ok": false, "error": error.to_string() })
}

/// Execute one command and build its answer
pub async fn answer(ctx: &AppContext, text: &str) -> Value {
    let command = match ControlCommand::parse(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected control message");
            return failure(&e);
        }
    };

    match command {
        ControlCommand::Ping => json!({
            "action": "pong",
            "ts": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        }),
        ControlCommand::Publish(request) => match ctx.hub.publish(request).await {
            Ok(_) => json!({ "ok": true }),
            Err(e) => failure(&ControlError::InvalidPublish(e.to_string())),
        },
        ControlCommand::Subscribe | ControlCommand::SetFilter => json!({ "ok": true }),
    }
}

pub async fn control_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    let max = ctx.settings.ws_max_msg_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| serve_control(socket, ctx))
}

async fn serve_control(socket: WebSocket, ctx: AppContext) {
    tracing::debug!("Control connection opened");
    let (mut sender, mut receiver) = socket.split();

    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Control connection error");
                break;
            }
        };

        let reply = answer(&ctx, &text).await;
        if sender.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }

    tracing::debug!("Control connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bus::EventBus;
    use crate::config::Settings;

    fn parse_err(text: &str) -> String {
        ControlCommand::parse(text).unwrap_err().to_string()
    }

    #[test]
    fn test_parse_basic_actions() {
        assert_eq!(
            ControlCommand::parse(r#"{"action":"ping"}"#).unwrap(),
            ControlCommand::Ping
        );
        assert_eq!(
            ControlCommand::parse(r#"{"action":"PING"}"#).unwrap(),
            ControlCommand::Ping
        );
        assert_eq!(
            ControlCommand::parse(r#"{"action":"set_filter","topic":"x"}"#).unwrap(),
            ControlCommand::SetFilter
        );
        assert_eq!(
            ControlCommand::parse(r#"{"action":"subscribe"}"#).unwrap(),
            ControlCommand::Subscribe
        );
    }

    #[test]
    fn test_invalid_json() {
        assert_eq!(parse_err("{not json"), "invalid_json");
        assert_eq!(parse_err("[1,2]"), "invalid_json");
    }

    #[test]
    fn test_unknown_action() {
        assert_eq!(parse_err(r#"{"action":"explode"}"#), "unknown_action");
        assert_eq!(parse_err(r#"{}"#), "unknown_action");
        assert_eq!(parse_err(r#"{"action":5}"#), "unknown_action");
    }

    #[test]
    fn test_publish_defaults() {
        let command =
            ControlCommand::parse(r#"{"action":"publish","topic":"demo","payload":"hello"}"#)
                .unwrap();
        assert_eq!(
            command,
            ControlCommand::Publish(PublishRequest::text("demo", Some("hello")))
        );
    }

    #[test]
    fn test_publish_validation_order() {
        assert_eq!(
            parse_err(r#"{"action":"publish","topic":""}"#),
            "topic must be a non-empty string"
        );
        assert_eq!(
            parse_err(r#"{"action":"publish","topic":7,"encoding":"hex"}"#),
            "topic must be a non-empty string"
        );
        assert_eq!(
            parse_err(r#"{"action":"publish","topic":"t","encoding":"hex","multipart":5}"#),
            "encoding must be 'utf8' or 'base64'"
        );
        assert_eq!(
            parse_err(r#"{"action":"publish","topic":"t","multipart":["a",1]}"#),
            "multipart must be an array of base64 strings"
        );
        assert_eq!(
            parse_err(r#"{"action":"publish","topic":"t","payload":{"a":1}}"#),
            "payload must be a string"
        );
    }

    #[test]
    fn test_publish_encoding_case_insensitive() {
        let command = ControlCommand::parse(
            r#"{"action":"publish","topic":"t","payload":"AAE=","encoding":"BASE64"}"#,
        )
        .unwrap();
        match command {
            ControlCommand::Publish(request) => assert_eq!(request.encoding, Encoding::Base64),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_answers() {
        let (bus, _task) = EventBus::new(4).spawn(4);
        let ctx = AppContext::new(Arc::new(Settings::default()), bus);

        let pong = answer(&ctx, r#"{"action":"ping"}"#).await;
        assert_eq!(pong["action"], "pong");
        assert!(pong["ts"].as_str().unwrap().ends_with("+00:00"));

        let rejected = answer(&ctx, r#"{"action":"publish","topic":""}"#).await;
        assert_eq!(rejected["ok"], false);
        assert_eq!(rejected["error"], "topic must be a non-empty string");

        let bad_base64 = answer(
            &ctx,
            r#"{"action":"publish","topic":"t","payload":"***","encoding":"base64"}"#,
        )
        .await;
        assert_eq!(bad_base64["ok"], false);
        assert!(bad_base64["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid base64"));

        // fire-and-forget: accepted even though nothing is running
        let accepted = answer(&ctx, r#"{"action":"publish","topic":"t"}"#).await;
        assert_eq!(accepted, json!({ "ok": true }));

        let noop = answer(&ctx, r#"{"action":"set_filter"}"#).await;
        assert_eq!(noop, json!({ "ok": true }));
    }
}
