//! Newline-delimited JSON over TCP.
//!
//! A joiner opens with a `Hello` naming the session; the host answers
//! `Accept` or `Reject`. After that every line is one [`PeerMessage`] frame.
//! Lines longer than [`MAX_FRAME_LEN`] drop the connection.

use crate::error::{Result, RpslsError};
use crate::peer::channel::{inbound_event, Link};
use crate::peer::{
    ConnectionState, HostedSession, JoinedSession, PeerChannel, PeerEvent, PeerTransport,
    SessionId, SessionTicket,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest accepted frame, newline excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_type")]
enum Handshake {
    Hello { session_id: SessionId },
    Accept,
    Reject { reason: String },
}

struct FrameReader {
    inner: BufReader<OwnedReadHalf>,
    line: String,
}

impl FrameReader {
    fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read_half),
            line: String::new(),
        }
    }

    /// Next frame without its line terminator; `None` at end of stream.
    async fn next_frame(&mut self) -> std::io::Result<Option<String>> {
        self.line.clear();
        let read = (&mut self.inner)
            .take(MAX_FRAME_LEN as u64 + 1)
            .read_line(&mut self.line)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if !self.line.ends_with('\n') && read > MAX_FRAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame exceeds {} bytes", MAX_FRAME_LEN),
            ));
        }

        let frame = self.line.strip_suffix('\n').unwrap_or(&self.line);
        let frame = frame.strip_suffix('\r').unwrap_or(frame);
        Ok(Some(frame.to_string()))
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn read_handshake(reader: &mut FrameReader) -> Result<Handshake> {
    let line = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.next_frame())
        .await
        .map_err(|_| RpslsError::connection("Handshake timed out"))??
        .ok_or_else(|| RpslsError::connection("Peer closed during handshake"))?;
    Ok(serde_json::from_str(&line)?)
}

async fn send_handshake(writer: &mut OwnedWriteHalf, handshake: &Handshake) -> Result<()> {
    write_line(writer, &serde_json::to_string(handshake)?).await?;
    Ok(())
}

/// Starts the reader and writer tasks for an accepted connection.
/// `ConnectionEstablished` is queued before any frame the peer sends.
fn spawn_link(
    mut reader: FrameReader,
    mut writer: OwnedWriteHalf,
    channel: PeerChannel,
    events: UnboundedSender<PeerEvent>,
) -> bool {
    let (outbox, mut frames) = mpsc::unbounded_channel::<String>();
    if !channel.attach(Link::Wire(outbox)) {
        return false;
    }
    let _ = events.send(PeerEvent::ConnectionEstablished);

    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = write_line(&mut writer, &frame).await {
                tracing::warn!("Peer write failed: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    tokio::spawn(async move {
        loop {
            match reader.next_frame().await {
                Ok(Some(line)) => {
                    if let Some(event) = inbound_event(&line) {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    channel.mark_disconnected();
                    let _ = events.send(PeerEvent::Disconnected);
                    break;
                }
                Err(e) => {
                    channel.mark_disconnected();
                    let _ = events.send(PeerEvent::Error(e.to_string()));
                    let _ = events.send(PeerEvent::Disconnected);
                    break;
                }
            }
        }
    });

    true
}

/// Peer transport over plain TCP sockets.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    listen_addr: String,
    public_host: Option<String>,
}

impl TcpTransport {
    pub fn new(listen_addr: impl Into<String>, public_host: Option<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            public_host,
        }
    }

    async fn admit(
        stream: TcpStream,
        session_id: &SessionId,
        channel: &PeerChannel,
        events: &UnboundedSender<PeerEvent>,
    ) -> Result<()> {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = FrameReader::new(read_half);

        let requested = match read_handshake(&mut reader).await? {
            Handshake::Hello { session_id } => session_id,
            other => {
                return Err(RpslsError::connection(format!(
                    "Expected hello, got {:?}",
                    other
                )))
            }
        };

        let refusal = if &requested != session_id {
            Some(format!("Unknown session {}", requested))
        } else if channel.has_peer() {
            Some(format!("Session {} already has a peer", session_id))
        } else {
            None
        };
        if let Some(reason) = refusal {
            send_handshake(&mut writer, &Handshake::Reject { reason: reason.clone() }).await?;
            return Err(RpslsError::connection(reason));
        }

        send_handshake(&mut writer, &Handshake::Accept).await?;
        if !spawn_link(reader, writer, channel.clone(), events.clone()) {
            return Err(RpslsError::connection("Session already has a peer"));
        }
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        session_id: SessionId,
        channel: PeerChannel,
        events: UnboundedSender<PeerEvent>,
    ) {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = events.closed() => break,
            };

            match accepted {
                Ok((stream, remote)) => {
                    match Self::admit(stream, &session_id, &channel, &events).await {
                        Ok(()) => tracing::info!("Peer {} joined session {}", remote, session_id),
                        Err(e) => tracing::warn!("Refused peer {}: {}", remote, e),
                    }
                }
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    let _ = events.send(PeerEvent::Error(e.to_string()));
                    break;
                }
            }
        }
        tracing::debug!("Listener for {} stopped", session_id);
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn create_host(&self) -> Result<HostedSession> {
        let listener = TcpListener::bind(&self.listen_addr).await.map_err(|e| {
            RpslsError::connection(format!("Cannot listen on {}: {}", self.listen_addr, e))
        })?;
        let local = listener.local_addr()?;
        let endpoint = self
            .public_host
            .clone()
            .unwrap_or_else(|| local.to_string());

        let session_id = SessionId::generate();
        let (inbox, events) = mpsc::unbounded_channel();
        let channel = PeerChannel::new(ConnectionState::Connecting);
        tokio::spawn(Self::accept_loop(
            listener,
            session_id.clone(),
            channel.clone(),
            inbox,
        ));
        tracing::info!("Hosting session {} on {}", session_id, local);

        Ok(HostedSession {
            ticket: SessionTicket {
                session_id,
                endpoint: Some(endpoint),
            },
            channel,
            events,
        })
    }

    async fn connect_to(&self, ticket: &SessionTicket) -> Result<JoinedSession> {
        let endpoint = ticket
            .endpoint
            .as_deref()
            .ok_or_else(|| RpslsError::connection("Share link has no host address"))?;
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| RpslsError::connection(format!("Cannot reach {}: {}", endpoint, e)))?;

        let (read_half, mut writer) = stream.into_split();
        let mut reader = FrameReader::new(read_half);
        send_handshake(
            &mut writer,
            &Handshake::Hello {
                session_id: ticket.session_id.clone(),
            },
        )
        .await?;

        match read_handshake(&mut reader).await? {
            Handshake::Accept => {}
            Handshake::Reject { reason } => return Err(RpslsError::connection(reason)),
            Handshake::Hello { .. } => {
                return Err(RpslsError::connection("Unexpected hello from host"))
            }
        }

        let (inbox, events) = mpsc::unbounded_channel();
        let channel = PeerChannel::new(ConnectionState::Connecting);
        spawn_link(reader, writer, channel.clone(), inbox);
        tracing::info!("Joined session {} at {}", ticket.session_id, endpoint);

        Ok(JoinedSession { channel, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerMessage;
    use crate::types::Winner;

    fn transport() -> TcpTransport {
        TcpTransport::new("127.0.0.1:0", None)
    }

    #[tokio::test]
    async fn test_tcp_session_exchanges_messages() {
        let mut host = transport().create_host().await.unwrap();
        let mut joined = transport().connect_to(&host.ticket).await.unwrap();

        assert_eq!(joined.events.recv().await, Some(PeerEvent::ConnectionEstablished));
        assert_eq!(host.events.recv().await, Some(PeerEvent::ConnectionEstablished));

        host.channel.send_raw("\"Hello from the host\"".to_string());
        host.channel
            .send(&PeerMessage::Winner {
                player: Winner::Player1,
            })
            .unwrap();
        joined.channel.send(&PeerMessage::Player2Responded).unwrap();

        assert_eq!(
            joined.events.recv().await,
            Some(PeerEvent::Message(PeerMessage::Winner {
                player: Winner::Player1
            }))
        );
        assert_eq!(
            host.events.recv().await,
            Some(PeerEvent::Message(PeerMessage::Player2Responded))
        );

        joined.channel.close();
        assert_eq!(host.events.recv().await, Some(PeerEvent::Disconnected));
        assert!(!host.channel.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_rejects_wrong_session_and_second_peer() {
        let host = transport().create_host().await.unwrap();

        let wrong = SessionTicket {
            session_id: SessionId::generate(),
            endpoint: host.ticket.endpoint.clone(),
        };
        let err = transport().connect_to(&wrong).await.err().unwrap();
        assert!(matches!(err, RpslsError::Connection(_)));

        let _first = transport().connect_to(&host.ticket).await.unwrap();
        let err = transport().connect_to(&host.ticket).await.err().unwrap();
        assert!(matches!(err, RpslsError::Connection(_)));
    }

    #[tokio::test]
    async fn test_connect_without_endpoint_fails() {
        let err = transport()
            .connect_to(&SessionTicket::local(SessionId::generate()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RpslsError::Connection(_)));
    }

    #[tokio::test]
    async fn test_host_sees_connection_before_first_frame() {
        for _ in 0..20 {
            let mut host = transport().create_host().await.unwrap();
            let joined = transport().connect_to(&host.ticket).await.unwrap();
            joined.channel.send(&PeerMessage::Connected).unwrap();

            assert_eq!(host.events.recv().await, Some(PeerEvent::ConnectionEstablished));
            assert_eq!(
                host.events.recv().await,
                Some(PeerEvent::Message(PeerMessage::Connected))
            );
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_drops_peer() {
        let mut host = transport().create_host().await.unwrap();
        let endpoint = host.ticket.endpoint.clone().unwrap();

        let stream = TcpStream::connect(endpoint).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = FrameReader::new(read_half);
        let hello = Handshake::Hello {
            session_id: host.ticket.session_id.clone(),
        };
        send_handshake(&mut writer, &hello).await.unwrap();
        assert!(matches!(
            read_handshake(&mut reader).await.unwrap(),
            Handshake::Accept
        ));
        assert_eq!(host.events.recv().await, Some(PeerEvent::ConnectionEstablished));

        let oversized = "a".repeat(MAX_FRAME_LEN + 16);
        writer.write_all(oversized.as_bytes()).await.unwrap();
        writer.flush().await.unwrap();

        assert!(matches!(host.events.recv().await, Some(PeerEvent::Error(_))));
        assert_eq!(host.events.recv().await, Some(PeerEvent::Disconnected));
        assert!(!host.channel.is_connected());
    }

    #[tokio::test]
    async fn test_frame_at_limit_is_delivered() {
        let mut host = transport().create_host().await.unwrap();
        let joined = transport().connect_to(&host.ticket).await.unwrap();
        assert_eq!(host.events.recv().await, Some(PeerEvent::ConnectionEstablished));

        let padded = format!("{{\"_type\":\"Connected\",\"pad\":\"{}\"}}", "x".repeat(MAX_FRAME_LEN - 40));
        assert!(padded.len() <= MAX_FRAME_LEN);
        joined.channel.send_raw(padded);
        assert_eq!(
            host.events.recv().await,
            Some(PeerEvent::Message(PeerMessage::Connected))
        );
    }
}
