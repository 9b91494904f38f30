//! ZMTP frame codec
//!
//! Every frame on the wire is:
//!
//! ```text
//! +-------+----------------------+----------------+
//! | flags | size (1 or 8 octets) | body           |
//! +-------+----------------------+----------------+
//!   bit0 MORE, bit1 LONG, bit2 COMMAND
//! ```
//!
//! The codec only deals with single frames. [`MessageAssembler`] glues
//! MORE-chained data frames back into a [`Multipart`] message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ProtocolError};
use crate::frame::Multipart;

use super::constants::*;

/// A single decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpFrame {
    /// More frames of the same message follow
    pub more: bool,
    /// Frame is a command rather than message data
    pub command: bool,
    /// Frame body
    pub body: Bytes,
}

impl ZmtpFrame {
    /// Data frame
    pub fn data(body: Bytes, more: bool) -> Self {
        Self {
            more,
            command: false,
            body,
        }
    }

    /// Command frame (never multipart)
    pub fn command(body: Bytes) -> Self {
        Self {
            more: false,
            command: true,
            body,
        }
    }

    /// Split a multipart message into data frames with MORE set on all but the last
    pub fn from_message(message: Multipart) -> impl Iterator<Item = ZmtpFrame> {
        let last = message.len().saturating_sub(1);
        message
            .into_iter()
            .enumerate()
            .map(move |(i, body)| ZmtpFrame::data(body, i < last))
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.more {
            flags |= FLAG_MORE;
        }
        if self.command {
            flags |= FLAG_COMMAND;
        }
        if self.body.len() > MAX_SHORT_SIZE {
            flags |= FLAG_LONG;
        }
        flags
    }
}

/// Frame codec for use with `tokio_util::codec::Framed`
#[derive(Debug, Clone)]
pub struct ZmtpCodec {
    max_frame_size: usize,
}

impl ZmtpCodec {
    /// Create a codec rejecting frames larger than `max_frame_size`
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for ZmtpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for ZmtpCodec {
    type Item = ZmtpFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ZmtpFrame>, Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let flags = src[0];
        if flags & FLAG_RESERVED != 0 {
            return Err(ProtocolError::InvalidFlags(flags).into());
        }
        let command = flags & FLAG_COMMAND != 0;
        let more = flags & FLAG_MORE != 0;
        if command && more {
            return Err(ProtocolError::MultipartCommand.into());
        }

        let (header_len, size) = if flags & FLAG_LONG != 0 {
            if src.len() < 9 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&src[1..9]);
            (9, u64::from_be_bytes(raw))
        } else {
            (2, src[1] as u64)
        };

        if size > self.max_frame_size as u64 {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }
            .into());
        }

        let size = size as usize;
        if src.len() < header_len + size {
            src.reserve(header_len + size - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let body = src.split_to(size).freeze();

        Ok(Some(ZmtpFrame {
            more,
            command,
            body,
        }))
    }
}

impl Encoder<ZmtpFrame> for ZmtpCodec {
    type Error = Error;

    fn encode(&mut self, frame: ZmtpFrame, dst: &mut BytesMut) -> Result<(), Error> {
        let flags = frame.flags();
        let len = frame.body.len();

        if flags & FLAG_LONG != 0 {
            dst.reserve(9 + len);
            dst.put_u8(flags);
            dst.put_u64(len as u64);
        } else {
            dst.reserve(2 + len);
            dst.put_u8(flags);
            dst.put_u8(len as u8);
        }
        dst.put_slice(&frame.body);
        Ok(())
    }
}

/// Reassembles data frames into complete messages
#[derive(Debug, Default)]
pub struct MessageAssembler {
    parts: Multipart,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a data frame; returns the message once its last frame arrives
    pub fn push(&mut self, frame: ZmtpFrame) -> Option<Multipart> {
        self.parts.push(frame.body);
        if frame.more {
            None
        } else {
            Some(std::mem::take(&mut self.parts))
        }
    }

    /// Whether a partial message is buffered
    pub fn is_partial(&self) -> bool {
        !self.parts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(frames: Vec<ZmtpFrame>) -> BytesMut {
        let mut codec = ZmtpCodec::default();
        let mut buf = BytesMut::new();
        for frame in frames {
            codec.encode(frame, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_short_frame_layout() {
        let buf = encode_all(vec![ZmtpFrame::data(Bytes::from_static(b"abc"), true)]);
        assert_eq!(&buf[..], &[FLAG_MORE, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_long_frame_layout() {
        let body = Bytes::from(vec![7u8; 300]);
        let buf = encode_all(vec![ZmtpFrame::data(body.clone(), false)]);
        assert_eq!(buf[0], FLAG_LONG);
        assert_eq!(&buf[1..9], &300u64.to_be_bytes());
        assert_eq!(&buf[9..], &body[..]);
    }

    #[test]
    fn test_decode_partial_input() {
        let mut codec = ZmtpCodec::default();
        let full = encode_all(vec![ZmtpFrame::data(Bytes::from(vec![1u8; 300]), false)]);

        let mut partial = BytesMut::from(&full[..5]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[5..]);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.body.len(), 300);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_command_frame() {
        let mut codec = ZmtpCodec::default();
        let mut buf = encode_all(vec![ZmtpFrame::command(Bytes::from_static(b"\x04PING"))]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.command);
        assert!(!frame.more);
    }

    #[test]
    fn test_reserved_flags_rejected() {
        let mut codec = ZmtpCodec::default();
        let mut buf = BytesMut::from(&[0x80u8, 0][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidFlags(0x80))));
    }

    #[test]
    fn test_multipart_command_rejected() {
        let mut codec = ZmtpCodec::default();
        let mut buf = BytesMut::from(&[FLAG_COMMAND | FLAG_MORE, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = ZmtpCodec::new(16);
        let mut buf = encode_all(vec![ZmtpFrame::data(Bytes::from(vec![0u8; 17]), false)]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::FrameTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn test_message_frames_and_reassembly() {
        let message = vec![
            Bytes::from_static(b"topic"),
            Bytes::new(),
            Bytes::from_static(b"\x00\xff"),
        ];
        let frames: Vec<_> = ZmtpFrame::from_message(message.clone()).collect();
        assert!(frames[0].more && frames[1].more && !frames[2].more);

        let mut buf = encode_all(frames);
        let mut codec = ZmtpCodec::default();
        let mut assembler = MessageAssembler::new();
        let mut out = None;
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out = assembler.push(frame);
        }
        assert_eq!(out.unwrap(), message);
        assert!(!assembler.is_partial());
    }
}
