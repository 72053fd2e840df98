use rpsls_core::RpslsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GameError>;

#[derive(Error, Debug)]
pub enum GameError {
    #[error(transparent)]
    Core(#[from] RpslsError),

    #[error("Invalid game state: {0}")]
    InvalidState(String),

    #[error("No peer is connected")]
    NotConnected,

    #[error("Peer disconnected: {0}")]
    PeerDisconnected(String),

    #[error("Opponent has not timed out yet")]
    TimeoutNotExpired,

    #[error("No move commitment is held for this game")]
    MissingCommitment,
}

impl GameError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Whether the session can carry on after reporting this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            GameError::PeerDisconnected(_) | GameError::Core(RpslsError::Connection(_))
        )
    }
}
