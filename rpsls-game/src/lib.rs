//! RPSLS session controllers
//!
//! Two state machines, one per role, drive a single commit-reveal wager from
//! peer handshake to settlement. Each owns its view of the game and
//! publishes it as a [`SessionSnapshot`] on every change.

pub mod confirmation;
pub mod countdown;
pub mod error;
pub mod player_one;
pub mod player_two;
pub mod rules;
pub mod session;

pub use confirmation::Confirmation;
pub use countdown::{compute_deadline, Countdown, CountdownExpired, CountdownState};
pub use error::{GameError, Result};
pub use player_one::{PlayerOne, PlayerOneCommand, PlayerOnePhase};
pub use player_two::{PlayerTwo, PlayerTwoCommand, PlayerTwoPhase};
pub use rules::decide_winner;
pub use session::{MoveInfo, SessionInputs, SessionPhase, SessionSnapshot};
