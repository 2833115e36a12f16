//! Inbound event decoding.

use std::fmt::Debug;

use serde_json::Value;

use crate::error::{RtmError, RtmResult};

/// Turns a typed inbound envelope into a domain event record.
///
/// Called on the reader task for every envelope that is not handled by the
/// connection itself (`hello`, pongs, acknowledgements). A decode error is
/// reported as an event and never ends the connection.
pub trait EventDecoder: Send + Sync + 'static {
    type Event: Debug + Send + 'static;

    fn decode(&self, type_tag: &str, raw: &str) -> RtmResult<Self::Event>;
}

/// Default decoder: yields the envelope as untyped JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl EventDecoder for JsonDecoder {
    type Event = Value;

    fn decode(&self, _type_tag: &str, raw: &str) -> RtmResult<Value> {
        serde_json::from_str(raw).map_err(|e| RtmError::decode(e.to_string()))
    }
}
