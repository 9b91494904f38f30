//! In-band subscription control frames
//!
//! A SUB/XSUB peer declares interest with a single-frame message whose first
//! octet is `1` (subscribe) or `0` (unsubscribe) followed by a topic prefix.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::{SUBSCRIBE_PREFIX, UNSUBSCRIBE_PREFIX};

/// A parsed subscription control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFrame {
    Subscribe(Bytes),
    Unsubscribe(Bytes),
}

impl SubscriptionFrame {
    /// Parse a frame; returns `None` for anything that is not a control frame
    pub fn parse(frame: &Bytes) -> Option<Self> {
        match frame.first() {
            Some(&SUBSCRIBE_PREFIX) => Some(SubscriptionFrame::Subscribe(frame.slice(1..))),
            Some(&UNSUBSCRIBE_PREFIX) => Some(SubscriptionFrame::Unsubscribe(frame.slice(1..))),
            _ => None,
        }
    }

    /// Parse a whole message; control messages are always single-frame
    pub fn from_message(message: &[Bytes]) -> Option<Self> {
        match message {
            [frame] => Self::parse(frame),
            _ => None,
        }
    }

    /// Topic prefix carried by the frame
    pub fn prefix(&self) -> &Bytes {
        match self {
            SubscriptionFrame::Subscribe(p) | SubscriptionFrame::Unsubscribe(p) => p,
        }
    }

    pub fn encode(&self) -> Bytes {
        let (marker, prefix) = match self {
            SubscriptionFrame::Subscribe(p) => (SUBSCRIBE_PREFIX, p),
            SubscriptionFrame::Unsubscribe(p) => (UNSUBSCRIBE_PREFIX, p),
        };
        let mut buf = BytesMut::with_capacity(1 + prefix.len());
        buf.put_u8(marker);
        buf.put_slice(prefix);
        buf.freeze()
    }
}

/// Multiset of subscribed topic prefixes
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    prefixes: HashMap<Bytes, usize>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a control frame. Unsubscribing an unknown prefix is a no-op.
    pub fn apply(&mut self, frame: &SubscriptionFrame) {
        match frame {
            SubscriptionFrame::Subscribe(prefix) => {
                *self.prefixes.entry(prefix.clone()).or_insert(0) += 1;
            }
            SubscriptionFrame::Unsubscribe(prefix) => {
                if let Some(count) = self.prefixes.get_mut(prefix) {
                    *count -= 1;
                    if *count == 0 {
                        self.prefixes.remove(prefix);
                    }
                }
            }
        }
    }

    /// Whether any subscribed prefix matches `topic`
    pub fn matches(&self, topic: &[u8]) -> bool {
        self.prefixes.keys().any(|prefix| topic.starts_with(prefix))
    }

    /// Number of distinct prefixes
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// One unsubscribe frame per held subscription, undoing the whole set
    pub fn cancellations(&self) -> impl Iterator<Item = SubscriptionFrame> + '_ {
        self.prefixes.iter().flat_map(|(prefix, count)| {
            std::iter::repeat(SubscriptionFrame::Unsubscribe(prefix.clone())).take(*count)
        })
    }

    /// One subscribe frame per distinct prefix, for replay to a new peer
    pub fn replay(&self) -> impl Iterator<Item = SubscriptionFrame> + '_ {
        self.prefixes
            .keys()
            .map(|prefix| SubscriptionFrame::Subscribe(prefix.clone()))
    }
}
