//! Inbound envelope routing.
//!
//! Every text frame is a JSON object with an optional `type` tag. Replies to
//! our own messages carry `reply_to` (and `ok` for message acks); everything
//! else is a typed event handed to the [`EventDecoder`].

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::{
    decoder::EventDecoder,
    error::RtmError,
    events::{InboundEvent, RtmEvent},
    probe::ProbeTracker,
    timestamp::TimeString,
    types::MessageId,
};

const HELLO: &str = "hello";
const PONG: &str = "pong";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    type_tag: Option<String>,
    reply_to: Option<MessageId>,
    ok: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    ts: Option<TimeString>,
    #[serde(default, deserialize_with = "lenient")]
    text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    error: Option<ErrorBody>,
}

/// Event payloads reuse these field names with other shapes; a mismatch
/// means "absent" rather than a malformed envelope.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

/// What the reader should do with one inbound text frame.
#[derive(Debug)]
pub(crate) enum Routed<E> {
    /// The protocol handshake completed.
    Hello,
    /// Hand this to consumers.
    Publish(RtmEvent<E>),
    /// Nothing to report.
    Ignore,
}

fn decode_error<E>(type_tag: Option<String>, raw: &str, error: RtmError) -> Routed<E> {
    Routed::Publish(RtmEvent::DecodeError {
        type_tag,
        raw: raw.to_string(),
        error,
    })
}

pub(crate) fn route<D: EventDecoder>(
    raw: &str,
    probes: &ProbeTracker,
    decoder: &D,
) -> Routed<D::Event> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(error = %err, "Unparseable inbound frame");
            return decode_error(None, raw, RtmError::decode(err.to_string()));
        }
    };

    let untyped_or_pong = envelope.type_tag.as_deref().is_none_or(|tag| tag == PONG);

    if let Some(reply_to) = envelope.reply_to {
        if untyped_or_pong && let Some(sent_at) = probes.resolve(reply_to) {
            return Routed::Publish(RtmEvent::LatencyReport {
                latency: sent_at.elapsed(),
            });
        }

        match envelope.ok {
            Some(true) => {
                return Routed::Publish(RtmEvent::Ack {
                    reply_to,
                    timestamp: envelope.ts,
                    text: envelope.text,
                });
            }
            Some(false) => {
                let error = envelope.error.unwrap_or_default();
                return Routed::Publish(RtmEvent::AckError {
                    reply_to,
                    code: error.code,
                    message: error.msg,
                });
            }
            None if untyped_or_pong => {
                debug!(id = %reply_to, "Reply for unknown or expired identifier");
                return Routed::Ignore;
            }
            None => {}
        }
    }

    let Some(type_tag) = envelope.type_tag else {
        return decode_error(None, raw, RtmError::decode("envelope has no type"));
    };

    match type_tag.as_str() {
        HELLO => Routed::Hello,
        PONG => {
            debug!("Pong without reply_to");
            Routed::Ignore
        }
        _ => match decoder.decode(&type_tag, raw) {
            Ok(data) => Routed::Publish(RtmEvent::Event(InboundEvent {
                type_tag,
                timestamp: envelope.ts,
                data,
            })),
            Err(error) => {
                debug!(type_tag = %type_tag, error = %error, "Failed to decode event");
                decode_error(Some(type_tag), raw, error)
            }
        },
    }
}
