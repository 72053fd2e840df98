use crate::Result;
use rpsls_core::{RpslsError, Weapon, Winner};

/// Equal moves draw. Moves of the same parity: the lower code wins.
/// Otherwise the higher code wins.
pub fn decide_winner(p1: Weapon, p2: Weapon) -> Result<Winner> {
    for weapon in [p1, p2] {
        if !weapon.is_playable() {
            return Err(RpslsError::InvalidMove(weapon.code()).into());
        }
    }

    let (a, b) = (p1.code(), p2.code());
    if a == b {
        return Ok(Winner::Draw);
    }
    let p1_wins = if a % 2 == b % 2 { a < b } else { a > b };

    Ok(if p1_wins {
        Winner::Player1
    } else {
        Winner::Player2
    })
}
