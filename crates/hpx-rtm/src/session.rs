//! Session bootstrap contract.
//!
//! Before dialing, the client asks a [`SessionProvider`] (normally the
//! authenticated API client) for the socket endpoint and the metadata that
//! describes who is connecting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RtmResult;

/// The authenticated user behind the connection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDetails {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub manual_presence: String,
}

/// The workspace the user belongs to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamDetails {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub domain: String,
}

/// Metadata returned when a session starts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Socket endpoint for this session.
    pub url: String,
    #[serde(rename = "self")]
    pub user: UserDetails,
    pub team: TeamDetails,
}

/// Result of [`SessionProvider::start_session`].
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStart {
    pub endpoint: String,
    pub info: SessionInfo,
}

impl From<SessionInfo> for SessionStart {
    fn from(info: SessionInfo) -> Self {
        Self {
            endpoint: info.url.clone(),
            info,
        }
    }
}

/// Supplies the endpoint and identity for each new connection.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    async fn start_session(&self) -> RtmResult<SessionStart>;
}

/// A provider that always returns the same session.
#[derive(Clone, Debug)]
pub struct StaticSession {
    start: SessionStart,
}

impl StaticSession {
    pub fn new(info: SessionInfo) -> Self {
        Self { start: info.into() }
    }

    /// Use `endpoint` instead of `info.url` for dialing.
    pub fn with_endpoint(endpoint: impl Into<String>, info: SessionInfo) -> Self {
        Self {
            start: SessionStart {
                endpoint: endpoint.into(),
                info,
            },
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn start_session(&self) -> RtmResult<SessionStart> {
        Ok(self.start.clone())
    }
}
