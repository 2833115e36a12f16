//! Outgoing message model and wire encoding.

use serde::Serialize;
use serde_json::Value;

use crate::{
    error::{RtmError, RtmResult},
    timestamp::TimeString,
    types::MessageId,
};

/// Service limit on outgoing message text, in characters.
pub const MAX_MESSAGE_TEXT_LENGTH: usize = 4000;

/// A message a caller wants delivered over the live connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutgoingMessage {
    /// Message type tag (`"message"`, `"typing"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Target channel identifier.
    pub channel: String,
    /// Message body.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Parent message timestamp when replying in a thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<TimeString>,
    /// Structured attachments, passed through verbatim.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Value>,
}

impl OutgoingMessage {
    /// A plain chat message.
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            channel: channel.into(),
            text: text.into(),
            thread_ts: None,
            attachments: Vec::new(),
        }
    }

    /// A typing indicator for `channel`.
    pub fn typing(channel: impl Into<String>) -> Self {
        Self {
            kind: "typing".to_string(),
            ..Self::new(channel, "")
        }
    }

    /// Reply inside the thread rooted at `thread_ts`.
    #[must_use]
    pub fn in_thread(mut self, thread_ts: impl Into<TimeString>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }

    /// Append a structured attachment.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Value) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Text length in Unicode scalar values.
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Check the message against the text limit and basic shape.
    pub fn validate(&self, max_text_len: usize) -> RtmResult<()> {
        if self.channel.is_empty() {
            return Err(RtmError::invalid_message("channel must not be empty"));
        }
        if self.kind.is_empty() {
            return Err(RtmError::invalid_message("message type must not be empty"));
        }
        let length = self.text_len();
        if length > max_text_len {
            return Err(RtmError::MessageTooLong {
                length,
                max: max_text_len,
            });
        }
        Ok(())
    }

    /// Serialize with an identifier, ready for the wire.
    pub fn encode(&self, id: MessageId) -> RtmResult<String> {
        Ok(serde_json::to_string(&WireMessage { id, body: self })?)
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    id: MessageId,
    #[serde(flatten)]
    body: &'a OutgoingMessage,
}

#[derive(Serialize)]
struct Ping {
    id: MessageId,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Encode a liveness probe.
pub fn ping_frame(id: MessageId) -> RtmResult<String> {
    Ok(serde_json::to_string(&Ping { id, kind: "ping" })?)
}

/// An encoded message sitting in the outbound queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct QueuedMessage {
    pub(crate) id: MessageId,
    pub(crate) payload: String,
}
