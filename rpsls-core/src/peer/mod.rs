//! Point-to-point channel between the two players.
//!
//! A host allocates a session id and waits for exactly one joiner. Both sides
//! then exchange [`PeerMessage`]s over a [`PeerChannel`] and observe the
//! connection through an ordered stream of [`PeerEvent`]s.

pub mod channel;
pub mod memory;
pub mod message;
pub mod tcp;

pub use channel::PeerChannel;
pub use memory::MemoryHub;
pub use message::PeerMessage;
pub use tcp::TcpTransport;

use crate::error::{Result, RpslsError};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use url::Url;

const SESSION_PREFIX: &str = "RPSLS-";
const TOKEN_LEN: usize = 21;
// URL-safe token alphabet
const TOKEN_ALPHABET: &[u8; 64] =
    b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";
const LINK_SCHEME: &str = "rpsls";
const LOCAL_HOST: &str = "local";

/// Human-shareable session identifier, `RPSLS-` plus a 21 character token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let token: String = (0..TOKEN_LEN)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        Self(format!("{}{}", SESSION_PREFIX, token))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let valid = s
            .strip_prefix(SESSION_PREFIX)
            .map(|token| {
                token.len() == TOKEN_LEN && token.bytes().all(|b| TOKEN_ALPHABET.contains(&b))
            })
            .unwrap_or(false);
        if !valid {
            return Err(RpslsError::connection(format!("Invalid session id '{}'", s)));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = RpslsError;

    fn try_from(s: String) -> Result<Self> {
        SessionId::parse(&s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> String {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a joiner needs to reach a host: the session id and, for network
/// transports, the host's endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub session_id: SessionId,
    pub endpoint: Option<String>,
}

impl SessionTicket {
    pub fn local(session_id: SessionId) -> Self {
        Self {
            session_id,
            endpoint: None,
        }
    }

    /// `rpsls://<endpoint>/?peerId=<id>`.
    pub fn share_url(&self) -> String {
        format!(
            "{}://{}/?peerId={}",
            LINK_SCHEME,
            self.endpoint.as_deref().unwrap_or(LOCAL_HOST),
            self.session_id
        )
    }

    /// Accepts a share link or a bare session id.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if !input.contains("://") {
            return Ok(Self::local(SessionId::parse(input)?));
        }

        let url = Url::parse(input)
            .map_err(|e| RpslsError::connection(format!("Invalid share link: {}", e)))?;
        let peer_id = url
            .query_pairs()
            .find(|(key, _)| key == "peerId")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| RpslsError::connection("Share link has no peerId"))?;

        let endpoint = match url.host_str() {
            None | Some(LOCAL_HOST) => None,
            Some(host) => Some(match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            }),
        };

        Ok(Self {
            session_id: SessionId::parse(&peer_id)?,
            endpoint,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    ConnectionEstablished,
    Message(PeerMessage),
    Error(String),
    Disconnected,
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

pub struct HostedSession {
    pub ticket: SessionTicket,
    pub channel: PeerChannel,
    pub events: PeerEvents,
}

pub struct JoinedSession {
    pub channel: PeerChannel,
    pub events: PeerEvents,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Opens a session and waits for one joiner in the background.
    async fn create_host(&self) -> Result<HostedSession>;

    /// Fails with a connection error when the session is unknown or taken.
    async fn connect_to(&self, ticket: &SessionTicket) -> Result<JoinedSession>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_id_shape() {
        let id = SessionId::generate();
        assert!(id.as_str().starts_with("RPSLS-"));
        assert_eq!(id.as_str().len(), 6 + 21);
        assert_eq!(SessionId::parse(id.as_str()).unwrap(), id);

        let ids: HashSet<_> = (0..1000).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_session_id_rejects_garbage() {
        assert!(SessionId::parse("RPSLS-short").is_err());
        assert!(SessionId::parse("GAME-aaaaaaaaaaaaaaaaaaaaa").is_err());
        assert!(SessionId::parse("RPSLS-aaaaaaaaaaaaaaaaaaa!!").is_err());
    }

    #[test]
    fn test_share_link_roundtrip() {
        let ticket = SessionTicket {
            session_id: SessionId::generate(),
            endpoint: Some("127.0.0.1:9470".to_string()),
        };
        let url = ticket.share_url();
        assert!(url.starts_with("rpsls://127.0.0.1:9470/?peerId=RPSLS-"));
        assert_eq!(SessionTicket::parse(&url).unwrap(), ticket);

        let local = SessionTicket::local(SessionId::generate());
        assert_eq!(SessionTicket::parse(&local.share_url()).unwrap(), local);
    }

    #[test]
    fn test_ticket_from_bare_id() {
        let id = SessionId::generate();
        let ticket = SessionTicket::parse(&format!("  {}  ", id)).unwrap();
        assert_eq!(ticket.session_id, id);
        assert_eq!(ticket.endpoint, None);

        assert!(SessionTicket::parse("rpsls://local/").is_err());
    }
}
