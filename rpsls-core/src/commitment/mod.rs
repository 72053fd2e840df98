pub mod secret;

pub use secret::{fresh_salt, MoveSecret, Salt};

use crate::error::{Result, RpslsError};
use crate::types::Weapon;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Keccak-256 of `uint8 move ‖ uint256 salt`, as the wager contract stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitmentHash(pub [u8; 32]);

impl CommitmentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for CommitmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Packed encoding: one byte of move code followed by the 32-byte big-endian salt.
pub fn commit(choice: Weapon, salt: &Salt) -> Result<CommitmentHash> {
    if !choice.is_playable() {
        return Err(RpslsError::InvalidMove(choice.code()));
    }

    let mut hasher = Keccak256::new();
    hasher.update([choice.code()]);
    hasher.update(salt.to_be_bytes());
    Ok(CommitmentHash(hasher.finalize().into()))
}

/// Recomputes the commitment; used where the ledger's own check is modelled.
pub fn verify(hash: &CommitmentHash, choice: Weapon, salt: &Salt) -> bool {
    commit(choice, salt).map_or(false, |computed| computed == *hash)
}
