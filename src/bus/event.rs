//! Bus events
//!
//! Events are built once by the component that observed something and are
//! shared immutably (`Arc`) by every subscriber queue. They only become JSON
//! at the web boundary:
//!
//! ```text
//! {"ts": "...", "kind": "bus"|"monitor", "source": "ingress"|"egress"|"inject",
//!  "topic": str|null, "payload": null|str|[str], "meta": {...}}
//! ```

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::frame::{self, Encoding, TextFrame};
use crate::socket::{event_name, MonitorRecord};

/// Which part of the broker produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Producer-facing endpoint
    Ingress,
    /// Consumer-facing endpoint
    Egress,
    /// Injection publisher
    Inject,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Ingress => "ingress",
            EventSource::Egress => "egress",
            EventSource::Inject => "inject",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observed message, rendered frame by frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traffic {
    pub topic: TextFrame,
    pub payload: Vec<TextFrame>,
    /// Byte size of every frame, topic first
    pub sizes: Vec<usize>,
    /// Message was injected from the web surface
    pub ui_originated: bool,
}

impl Traffic {
    pub fn from_frames(frames: &[Bytes]) -> Self {
        let (topic, parts) = frame::split(frames);
        Self {
            topic: frame::encode(topic.map(|t| &t[..]).unwrap_or_default()),
            payload: parts.iter().map(|p| frame::encode(p)).collect(),
            sizes: frames.iter().map(|f| f.len()).collect(),
            ui_originated: false,
        }
    }

    /// Number of frames including the topic
    pub fn parts(&self) -> usize {
        self.sizes.len()
    }
}

/// A socket lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorNotice {
    /// Lower-case event name, or the decimal code when unknown
    pub event: String,
    pub value: u32,
    /// Endpoint as text (base64 when not UTF-8)
    pub endpoint: String,
    pub errno: Option<i32>,
}

impl MonitorNotice {
    pub fn from_record(record: &MonitorRecord) -> Self {
        Self {
            event: event_name(record.event),
            value: record.value,
            endpoint: frame::encode(&record.endpoint).text,
            errno: record.error,
        }
    }
}

/// Event body per kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    Traffic(Traffic),
    Monitor(MonitorNotice),
}

/// One immutable event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub ts: DateTime<Utc>,
    pub source: EventSource,
    pub body: EventBody,
}

impl BusEvent {
    /// Forwarded traffic seen at `source`
    pub fn traffic(source: EventSource, frames: &[Bytes]) -> Self {
        Self {
            ts: Utc::now(),
            source,
            body: EventBody::Traffic(Traffic::from_frames(frames)),
        }
    }

    /// Traffic sent by the injection publisher
    pub fn injected(frames: &[Bytes]) -> Self {
        let mut traffic = Traffic::from_frames(frames);
        traffic.ui_originated = true;
        Self {
            ts: Utc::now(),
            source: EventSource::Inject,
            body: EventBody::Traffic(traffic),
        }
    }

    /// Lifecycle record read from a socket monitor
    pub fn monitor(source: EventSource, record: &MonitorRecord) -> Self {
        Self {
            ts: Utc::now(),
            source,
            body: EventBody::Monitor(MonitorNotice::from_record(record)),
        }
    }

    /// `"bus"` for traffic, `"monitor"` for lifecycle events
    pub fn kind(&self) -> &'static str {
        match self.body {
            EventBody::Traffic(_) => "bus",
            EventBody::Monitor(_) => "monitor",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadRepr<'a> {
    Single(&'a str),
    Multi(Vec<&'a str>),
}

#[derive(Serialize)]
#[serde(untagged)]
enum MetaRepr<'a> {
    Traffic {
        topic_encoding: Encoding,
        payload_encodings: Vec<Encoding>,
        parts: usize,
        sizes: &'a [usize],
        #[serde(skip_serializing_if = "is_false")]
        ui_originated: bool,
    },
    Monitor {
        event: &'a str,
        value: u32,
        endpoint: &'a str,
        errno: Option<i32>,
    },
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Serialize)]
struct EventRepr<'a> {
    ts: String,
    kind: &'static str,
    source: EventSource,
    topic: Option<&'a str>,
    payload: Option<PayloadRepr<'a>>,
    meta: MetaRepr<'a>,
}

impl Serialize for BusEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (topic, payload, meta) = match &self.body {
            EventBody::Traffic(t) => {
                let payload = match t.payload.as_slice() {
                    [] => None,
                    [single] => Some(PayloadRepr::Single(&single.text)),
                    many => Some(PayloadRepr::Multi(
                        many.iter().map(|p| p.text.as_str()).collect(),
                    )),
                };
                let meta = MetaRepr::Traffic {
                    topic_encoding: t.topic.encoding,
                    payload_encodings: t.payload.iter().map(|p| p.encoding).collect(),
                    parts: t.parts(),
                    sizes: &t.sizes,
                    ui_originated: t.ui_originated,
                };
                (Some(t.topic.text.as_str()), payload, meta)
            }
            EventBody::Monitor(m) => (
                None,
                None,
                MetaRepr::Monitor {
                    event: &m.event,
                    value: m.value,
                    endpoint: &m.endpoint,
                    errno: m.errno,
                },
            ),
        };

        EventRepr {
            ts: self.ts.to_rfc3339_opts(SecondsFormat::Micros, false),
            kind: self.kind(),
            source: self.source,
            topic,
            payload,
            meta,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use crate::socket::SocketEvent;

    fn to_value(event: &BusEvent) -> Value {
        serde_json::to_value(event).unwrap()
    }

    #[test]
    fn test_single_payload() {
        let frames = vec![Bytes::from_static(b"demo"), Bytes::from_static(b"hello")];
        let value = to_value(&BusEvent::traffic(EventSource::Ingress, &frames));

        assert_eq!(value["kind"], "bus");
        assert_eq!(value["source"], "ingress");
        assert_eq!(value["topic"], "demo");
        assert_eq!(value["payload"], "hello");
        assert_eq!(
            value["meta"],
            json!({
                "topic_encoding": "utf8",
                "payload_encodings": ["utf8"],
                "parts": 2,
                "sizes": [4, 5],
            })
        );
    }

    #[test]
    fn test_topic_only_has_null_payload() {
        let frames = vec![Bytes::from_static(b"tick")];
        let value = to_value(&BusEvent::traffic(EventSource::Ingress, &frames));
        assert!(value["payload"].is_null());
        assert_eq!(value["meta"]["parts"], 1);
        assert_eq!(value["meta"]["payload_encodings"], json!([]));
    }

    #[test]
    fn test_multipart_control_bytes_stay_utf8() {
        // NUL and SOH are valid UTF-8
        let frames = vec![
            Bytes::from_static(b"demo"),
            Bytes::from_static(b"\x00\x01"),
            Bytes::from_static(b"text"),
        ];
        let value = to_value(&BusEvent::traffic(EventSource::Ingress, &frames));
        assert_eq!(value["payload"], json!(["\u{0000}\u{0001}", "text"]));
        assert_eq!(value["meta"]["payload_encodings"], json!(["utf8", "utf8"]));
        assert_eq!(value["meta"]["sizes"], json!([4, 2, 4]));
    }

    #[test]
    fn test_multipart_payload_mixed_encodings() {
        let frames = vec![
            Bytes::from_static(b"demo"),
            Bytes::from_static(b"\xff\x00"),
            Bytes::from_static(b"text"),
        ];
        let value = to_value(&BusEvent::traffic(EventSource::Ingress, &frames));
        assert_eq!(value["payload"], json!(["/wA=", "text"]));
        assert_eq!(value["meta"]["payload_encodings"], json!(["base64", "utf8"]));
        assert_eq!(value["meta"]["sizes"], json!([4, 2, 4]));
    }

    #[test]
    fn test_injected_event_is_flagged() {
        let frames = vec![Bytes::from_static(b"demo"), Bytes::from_static(b"x")];
        let event = BusEvent::injected(&frames);
        let value = to_value(&event);
        assert_eq!(value["source"], "inject");
        assert_eq!(value["meta"]["ui_originated"], true);

        let organic = to_value(&BusEvent::traffic(EventSource::Ingress, &frames));
        assert!(organic["meta"].get("ui_originated").is_none());
    }

    #[test]
    fn test_monitor_event() {
        let record = MonitorRecord::new(SocketEvent::Accepted, 3, "tcp://127.0.0.1:40000");
        let value = to_value(&BusEvent::monitor(EventSource::Ingress, &record));

        assert_eq!(value["kind"], "monitor");
        assert!(value["topic"].is_null());
        assert!(value["payload"].is_null());
        assert_eq!(
            value["meta"],
            json!({
                "event": "accepted",
                "value": 3,
                "endpoint": "tcp://127.0.0.1:40000",
                "errno": null,
            })
        );
    }

    #[test]
    fn test_monitor_unknown_code_and_binary_endpoint() {
        let record = MonitorRecord {
            event: 0x8000,
            value: 0,
            endpoint: Bytes::from_static(b"\xff\xfe"),
            error: Some(98),
        };
        let notice = MonitorNotice::from_record(&record);
        assert_eq!(notice.event, "32768");
        assert_eq!(notice.endpoint, "//4=");
        assert_eq!(notice.errno, Some(98));
    }

    #[test]
    fn test_timestamp_is_rfc3339_utc() {
        let event = BusEvent::traffic(EventSource::Egress, &[Bytes::from_static(b"t")]);
        let value = to_value(&event);
        let ts = value["ts"].as_str().unwrap();
        assert!(ts.ends_with("+00:00"));
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
