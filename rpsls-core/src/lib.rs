//! RPSLS core - building blocks for a two-party commit-reveal wager
//!
//! This crate holds everything the session controllers need but that has no
//! protocol state of its own: the domain types, the move commitment codec,
//! the ledger gateway over a wallet/RPC client, and the point-to-point peer
//! channel with its transports.

pub mod commitment;
pub mod config;
pub mod error;
pub mod ledger;
pub mod peer;
pub mod types;

pub use commitment::{commit, fresh_salt, CommitmentHash, MoveSecret, Salt};
pub use config::GameConfig;
pub use error::{Result, RpslsError};
pub use ledger::{
    ChainClient, LedgerGateway, LedgerState, NodeClient, PendingTx, Receipt, ReceiptStatus, TxKind,
};
pub use peer::{
    ConnectionState, HostedSession, JoinedSession, MemoryHub, PeerChannel, PeerEvent, PeerEvents,
    PeerMessage, PeerTransport, SessionId, SessionTicket, TcpTransport,
};
pub use types::{parse_address, Address, Role, TxHash, Weapon, Wei, Winner, U256};
