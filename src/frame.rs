//! Frames and their JSON-safe text representation
//!
//! A frame is an opaque byte string; a message is an ordered list of frames
//! where the first one is the topic. For display on the web surface every
//! frame is rendered either as UTF-8 text or, when it is not valid UTF-8,
//! as standard base64. The pair `(text, encoding)` always decodes back to
//! the exact original bytes.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One multipart message: topic frame followed by payload frames
pub type Multipart = Vec<Bytes>;

/// Encoding tag of a [`TextFrame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Frame bytes were valid UTF-8 and are carried verbatim
    Utf8,
    /// Frame bytes are carried as standard base64
    Base64,
}

impl Encoding {
    /// Wire name of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Base64 => "base64",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" => Ok(Encoding::Utf8),
            "base64" => Ok(Encoding::Base64),
            _ => Err(Error::InvalidArgument(
                "encoding must be 'utf8' or 'base64'".into(),
            )),
        }
    }
}

/// A frame rendered as text plus the tag needed to recover its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame {
    pub text: String,
    pub encoding: Encoding,
}

impl TextFrame {
    /// Recover the original frame bytes
    pub fn decode(&self) -> Result<Bytes> {
        decode(&self.text, self.encoding)
    }
}

/// Render a frame as UTF-8 when possible, base64 otherwise
pub fn encode(frame: &[u8]) -> TextFrame {
    match std::str::from_utf8(frame) {
        Ok(text) => TextFrame {
            text: text.to_owned(),
            encoding: Encoding::Utf8,
        },
        Err(_) => TextFrame {
            text: STANDARD.encode(frame),
            encoding: Encoding::Base64,
        },
    }
}

/// Turn a text representation back into frame bytes
pub fn decode(text: &str, encoding: Encoding) -> Result<Bytes> {
    match encoding {
        Encoding::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
        Encoding::Base64 => STANDARD
            .decode(text)
            .map(Bytes::from)
            .map_err(|e| Error::InvalidArgument(format!("invalid base64: {}", e))),
    }
}

/// Build a flat frame sequence from a topic and its payload parts
pub fn assemble<I>(topic: Bytes, parts: I) -> Multipart
where
    I: IntoIterator<Item = Bytes>,
{
    let parts = parts.into_iter();
    let mut frames = Vec::with_capacity(1 + parts.size_hint().0);
    frames.push(topic);
    frames.extend(parts);
    frames
}

/// Split a frame sequence into its topic and payload parts
///
/// An empty sequence has no topic and no parts.
pub fn split(frames: &[Bytes]) -> (Option<&Bytes>, &[Bytes]) {
    match frames.split_first() {
        Some((topic, parts)) => (Some(topic), parts),
        None => (None, &[]),
    }
}
