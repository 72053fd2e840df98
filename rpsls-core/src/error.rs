use thiserror::Error;

pub type Result<T> = std::result::Result<T, RpslsError>;

#[derive(Error, Debug)]
pub enum RpslsError {
    #[error("Failed to create game: {0}")]
    Deploy(String),

    #[error("Transaction {tx} failed: {reason}")]
    TransactionFailed { tx: String, reason: String },

    #[error("Transient read error: {0}")]
    TransientRead(String),

    #[error("Peer connection error: {0}")]
    Connection(String),

    #[error("Stake mismatch: game requires {required} ETH, offered {offered} ETH")]
    StakeMismatch { required: String, offered: String },

    #[error("Invalid move code: {0}")]
    InvalidMove(u8),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpslsError {
    pub fn deploy(msg: impl Into<String>) -> Self {
        Self::Deploy(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientRead(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn reverted(msg: impl Into<String>) -> Self {
        Self::Reverted(msg.into())
    }

    /// RPC and load-balancer hiccups that are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientRead(_) | Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
