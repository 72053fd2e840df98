use crate::error::{Result, RpslsError};
use crate::peer::{
    ConnectionState, HostedSession, JoinedSession, PeerChannel, PeerEvent, PeerTransport,
    SessionId, SessionTicket,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};

struct HostSlot {
    channel: PeerChannel,
    inbox: UnboundedSender<PeerEvent>,
}

/// In-process rendezvous for sessions hosted and joined within one process.
#[derive(Clone, Default)]
pub struct MemoryHub {
    sessions: Arc<Mutex<HashMap<SessionId, HostSlot>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerTransport for MemoryHub {
    async fn create_host(&self) -> Result<HostedSession> {
        let session_id = SessionId::generate();
        let (inbox, events) = mpsc::unbounded_channel();
        let channel = PeerChannel::new(ConnectionState::Connecting);

        self.sessions.lock().insert(
            session_id.clone(),
            HostSlot {
                channel: channel.clone(),
                inbox,
            },
        );
        tracing::info!("Hosting in-process session {}", session_id);

        Ok(HostedSession {
            ticket: SessionTicket::local(session_id),
            channel,
            events,
        })
    }

    async fn connect_to(&self, ticket: &SessionTicket) -> Result<JoinedSession> {
        let sessions = self.sessions.lock();
        let host = sessions.get(&ticket.session_id).ok_or_else(|| {
            RpslsError::connection(format!("Unknown session {}", ticket.session_id))
        })?;
        if host.inbox.is_closed() {
            return Err(RpslsError::connection(format!(
                "Session {} is no longer hosted",
                ticket.session_id
            )));
        }
        if host.channel.has_peer() {
            return Err(RpslsError::connection(format!(
                "Session {} already has a peer",
                ticket.session_id
            )));
        }

        let (inbox, events) = mpsc::unbounded_channel();
        let channel = PeerChannel::new(ConnectionState::Connecting);
        if !PeerChannel::pair(&host.channel, host.inbox.clone(), &channel, inbox.clone()) {
            return Err(RpslsError::connection("Failed to attach to host"));
        }

        let _ = host.inbox.send(PeerEvent::ConnectionEstablished);
        let _ = inbox.send(PeerEvent::ConnectionEstablished);
        tracing::info!("Joined in-process session {}", ticket.session_id);

        Ok(JoinedSession { channel, events })
    }
}
