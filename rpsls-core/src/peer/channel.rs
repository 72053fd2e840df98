use crate::error::Result;
use crate::peer::{ConnectionState, PeerEvent, PeerMessage};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedSender;

pub(crate) enum Link {
    /// In-process peer: frames are decoded straight into its inbox.
    Memory {
        inbox: UnboundedSender<PeerEvent>,
        peer: Weak<Mutex<ChannelInner>>,
    },
    /// Socket peer: frames go to the writer task.
    Wire(UnboundedSender<String>),
}

pub(crate) struct ChannelInner {
    state: ConnectionState,
    link: Option<Link>,
    attached: bool,
}

/// Sending half of a peer session. Cheap to clone; all clones share the link.
#[derive(Clone)]
pub struct PeerChannel {
    inner: Arc<Mutex<ChannelInner>>,
}

impl PeerChannel {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                state,
                link: None,
                attached: false,
            })),
        }
    }

    /// Joins two in-process channels to each other.
    pub(crate) fn pair(
        a: &PeerChannel,
        a_inbox: UnboundedSender<PeerEvent>,
        b: &PeerChannel,
        b_inbox: UnboundedSender<PeerEvent>,
    ) -> bool {
        let to_b = Link::Memory {
            inbox: b_inbox,
            peer: Arc::downgrade(&b.inner),
        };
        let to_a = Link::Memory {
            inbox: a_inbox,
            peer: Arc::downgrade(&a.inner),
        };
        a.attach(to_b) && b.attach(to_a)
    }

    /// Installs the link. Fails once a peer has ever been attached.
    pub(crate) fn attach(&self, link: Link) -> bool {
        let mut inner = self.inner.lock();
        if inner.attached {
            return false;
        }
        inner.attached = true;
        inner.link = Some(link);
        inner.state = ConnectionState::Connected;
        true
    }

    pub(crate) fn has_peer(&self) -> bool {
        self.inner.lock().attached
    }

    pub(crate) fn mark_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.link = None;
        inner.state = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Sends a message in order. Dropped silently while not connected.
    pub fn send(&self, message: &PeerMessage) -> Result<()> {
        let frame = message.encode()?;
        if !self.send_raw(frame) {
            tracing::debug!("Dropped {} while not connected", message.tag());
        }
        Ok(())
    }

    /// Sends an untyped frame; returns whether it was handed to the link.
    pub fn send_raw(&self, frame: String) -> bool {
        let inner = self.inner.lock();
        match &inner.link {
            Some(Link::Memory { inbox, .. }) => {
                if let Some(event) = inbound_event(&frame) {
                    return inbox.send(event).is_ok();
                }
                true
            }
            Some(Link::Wire(outbox)) => outbox.send(frame).is_ok(),
            None => false,
        }
    }

    /// Tears the link down and tells the peer.
    pub fn close(&self) {
        let link = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Disconnected;
            inner.link.take()
        };

        // dropping a wire outbox ends the writer, which shuts the socket
        if let Some(Link::Memory { inbox, peer }) = link {
            if let Some(peer) = peer.upgrade() {
                let mut peer = peer.lock();
                peer.state = ConnectionState::Disconnected;
                peer.link = None;
            }
            let _ = inbox.send(PeerEvent::Disconnected);
        }
    }
}

/// Turns a received frame into an event, dropping what cannot be used.
pub(crate) fn inbound_event(frame: &str) -> Option<PeerEvent> {
    match PeerMessage::decode(frame) {
        Ok(Some(message)) => Some(PeerEvent::Message(message)),
        Ok(None) => {
            tracing::debug!("Ignoring unrecognised peer frame");
            None
        }
        Err(e) => {
            tracing::warn!("Dropping malformed peer message: {}", e);
            None
        }
    }
}
