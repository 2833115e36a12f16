//! # hpx-rtm
//!
//! Managed real-time messaging connection.
//!
//! This crate keeps one persistent full-duplex connection to a messaging
//! service alive and observable: it bootstraps a session, dials the socket,
//! multiplexes inbound protocol events to consumers, serializes outbound
//! messages onto the wire in order, and probes liveness periodically.
//!
//! ## Features
//!
//! - **Explicit lifecycle**: `connect` / `disconnect` / `reconnect`, safe to call
//!   from any task while I/O is in flight
//! - **Ordered channels**: bounded inbound and outbound queues with
//!   backpressure instead of drops
//! - **Liveness probes**: unanswered probes tear the connection down
//! - **Pluggable collaborators**: session bootstrap, transport and event
//!   decoding are traits
//!
//! The `testing` cargo feature exposes `wire::memory`, an in-process wire
//! with a scriptable peer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hpx_rtm::{RtmClient, RtmConfig, RtmEvent, SessionInfo, StaticSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = StaticSession::new(SessionInfo {
//!         url: "wss://rtm.example.com/websocket".to_string(),
//!         ..Default::default()
//!     });
//!     let client = RtmClient::tungstenite(RtmConfig::default(), session)?;
//!     client.connect().await?;
//!
//!     let events = client.events();
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             RtmEvent::Event(event) => println!("{}: {}", event.type_tag, event.data),
//!             RtmEvent::Disconnected { .. } => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod decoder;
mod envelope;
pub mod error;
pub mod events;
mod link;
pub mod message;
pub mod probe;
pub mod sequencer;
pub mod session;
pub mod state;
pub mod timestamp;
pub mod types;
pub mod wire;

pub use client::RtmClient;
pub use config::RtmConfig;
pub use decoder::{EventDecoder, JsonDecoder};
pub use error::{RtmError, RtmResult};
pub use events::{EventStream, InboundEvent, RtmEvent};
pub use message::{MAX_MESSAGE_TEXT_LENGTH, OutgoingMessage};
pub use probe::ProbeTracker;
pub use sequencer::Sequencer;
pub use session::{SessionInfo, SessionProvider, SessionStart, StaticSession, TeamDetails, UserDetails};
pub use state::{ConnectionPhase, ConnectionSnapshot};
pub use timestamp::TimeString;
pub use types::{ConnectionEpoch, MessageId};
pub use wire::{BoxWire, Dialer, Frame, WireStream};
#[cfg(feature = "tungstenite")]
pub use wire::{TungsteniteDialer, TungsteniteWire};
