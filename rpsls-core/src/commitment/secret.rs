use crate::commitment::{commit, CommitmentHash};
use crate::error::{Result, RpslsError};
use crate::types::Weapon;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 256-bit salt, held as big-endian bytes. Wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Salt([u8; 32]);

impl Salt {
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_be_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Salt(..)")
    }
}

/// Draws a fresh salt from the operating system CSPRNG.
pub fn fresh_salt() -> Salt {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let salt = Salt(bytes);
    bytes.zeroize();
    salt
}

/// Player One's unhashed move and salt for a single game.
pub struct MoveSecret {
    choice: Weapon,
    salt: Salt,
    commitment: CommitmentHash,
}

impl MoveSecret {
    /// Binds `choice` to a freshly drawn salt.
    pub fn new(choice: Weapon) -> Result<Self> {
        if !choice.is_playable() {
            return Err(RpslsError::InvalidMove(choice.code()));
        }
        let salt = fresh_salt();
        let commitment = commit(choice, &salt)?;
        Ok(Self {
            choice,
            salt,
            commitment,
        })
    }

    pub fn choice(&self) -> Weapon {
        self.choice
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    pub fn commitment(&self) -> CommitmentHash {
        self.commitment
    }
}

impl Drop for MoveSecret {
    fn drop(&mut self) {
        self.choice = Weapon::Null;
    }
}

impl fmt::Debug for MoveSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MoveSecret")
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}
