use crate::confirmation::{Confirmation, Confirmations};
use crate::countdown::{Countdown, CountdownExpired};
use crate::player_one::PlayerOnePhase;
use crate::player_two::PlayerTwoPhase;
use chrono::{DateTime, Utc};
use rpsls_core::{
    Address, ConnectionState, LedgerState, PeerChannel, PeerEvents, PeerMessage, Role, RpslsError,
    SessionId, TxHash, Weapon, Wei, Winner,
};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MoveInfo {
    pub moved: bool,
    pub choice: Weapon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    One(PlayerOnePhase),
    Two(PlayerTwoPhase),
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        match self {
            SessionPhase::One(phase) => phase.is_terminal(),
            SessionPhase::Two(phase) => phase.is_terminal(),
        }
    }
}

/// Read-only view of a session, published on every change.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub share_link: Option<String>,
    pub role: Role,
    pub phase: SessionPhase,
    pub peer_state: ConnectionState,
    pub account: Address,
    pub opponent_address: Option<Address>,
    pub ledger_address: Option<Address>,
    pub stake: Option<Wei>,
    pub local_move: Weapon,
    pub opponent_move: MoveInfo,
    pub winner: Winner,
    pub deadline: Option<DateTime<Utc>>,
    pub deadline_expired: bool,
    pub can_claim_timeout: bool,
    /// Our own ledger write still waiting for a receipt.
    pub pending_tx: Option<TxHash>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Time left before the opponent can be declared in default.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.deadline_expired {
            return Some(Duration::ZERO);
        }
        self.deadline
            .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Event sources a controller's run loop selects over.
pub struct SessionInputs {
    pub events: PeerEvents,
    pub expiries: UnboundedReceiver<CountdownExpired>,
    pub confirmations: UnboundedReceiver<Confirmation>,
}

/// State shared by both roles: identity, what is known about the opponent
/// and the ledger, the countdown and the snapshot publisher.
pub(crate) struct GameSession {
    pub(crate) session_id: SessionId,
    pub(crate) share_link: Option<String>,
    pub(crate) role: Role,
    pub(crate) account: Address,
    pub(crate) channel: PeerChannel,
    pub(crate) opponent_address: Option<Address>,
    pub(crate) ledger_address: Option<Address>,
    pub(crate) stake: Option<Wei>,
    pub(crate) local_move: Weapon,
    pub(crate) countdown: Countdown,
    pub(crate) confirmations: Confirmations,
    opponent_move: MoveInfo,
    winner: Winner,
    last_action: Option<i64>,
    last_error: Option<String>,
    updates: watch::Sender<SessionSnapshot>,
}

impl GameSession {
    pub(crate) fn new(
        session_id: SessionId,
        share_link: Option<String>,
        role: Role,
        account: Address,
        channel: PeerChannel,
        countdown: Countdown,
        confirmations: Confirmations,
        phase: SessionPhase,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let initial = SessionSnapshot {
            session_id: session_id.clone(),
            share_link: share_link.clone(),
            role,
            phase,
            peer_state: channel.state(),
            account,
            opponent_address: None,
            ledger_address: None,
            stake: None,
            local_move: Weapon::Null,
            opponent_move: MoveInfo::default(),
            winner: Winner::Null,
            deadline: None,
            deadline_expired: false,
            can_claim_timeout: false,
            pending_tx: None,
            last_error: None,
        };
        let (updates, rx) = watch::channel(initial);

        (
            Self {
                session_id,
                share_link,
                role,
                account,
                channel,
                opponent_address: None,
                ledger_address: None,
                stake: None,
                local_move: Weapon::Null,
                countdown,
                confirmations,
                opponent_move: MoveInfo::default(),
                winner: Winner::Null,
                last_action: None,
                last_error: None,
                updates,
            },
            rx,
        )
    }

    pub(crate) fn opponent_move(&self) -> MoveInfo {
        self.opponent_move
    }

    pub(crate) fn winner(&self) -> Winner {
        self.winner
    }

    /// Records the opponent's move. The flag only ever goes from unset to
    /// set; returns true on that transition.
    pub(crate) fn observe_opponent_move(&mut self, choice: Weapon) -> bool {
        if self.opponent_move.moved || !choice.is_playable() {
            return false;
        }
        self.opponent_move = MoveInfo {
            moved: true,
            choice,
        };
        true
    }

    /// Sets the winner once; later calls are ignored.
    pub(crate) fn set_winner(&mut self, winner: Winner) -> bool {
        if self.winner.is_decided() || !winner.is_decided() {
            return false;
        }
        self.winner = winner;
        true
    }

    /// Re-arms the countdown when the ledger reports a new last action.
    /// Timing that yields no usable deadline keeps the current countdown.
    pub(crate) fn refresh_deadline(
        &mut self,
        state: &LedgerState,
        now: DateTime<Utc>,
    ) -> rpsls_core::Result<()> {
        if self.last_action == Some(state.last_action) {
            self.countdown.observe(now);
            return Ok(());
        }
        self.countdown
            .arm(state.last_action, state.timeout_window, now)
            .ok_or_else(|| {
                RpslsError::transient(format!(
                    "ledger timing out of range (lastAction {}, TIMEOUT {:?})",
                    state.last_action, state.timeout_window
                ))
            })?;
        self.last_action = Some(state.last_action);
        Ok(())
    }

    pub(crate) fn send(&self, message: PeerMessage) {
        if let Err(e) = self.channel.send(&message) {
            tracing::warn!("Failed to encode {}: {}", message.tag(), e);
        }
    }

    pub(crate) fn record_error(&mut self, error: &impl std::fmt::Display) {
        tracing::warn!("{} session {}: {}", self.role, self.session_id, error);
        self.last_error = Some(error.to_string());
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub(crate) fn snapshot(&self, phase: SessionPhase, can_claim_timeout: bool) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            share_link: self.share_link.clone(),
            role: self.role,
            phase,
            peer_state: self.channel.state(),
            account: self.account,
            opponent_address: self.opponent_address,
            ledger_address: self.ledger_address,
            stake: self.stake,
            local_move: self.local_move,
            opponent_move: self.opponent_move,
            winner: self.winner,
            deadline: self.countdown.deadline(),
            deadline_expired: self.countdown.is_expired(),
            can_claim_timeout,
            pending_tx: self.confirmations.outstanding_hash(),
            last_error: self.last_error.clone(),
        }
    }

    pub(crate) fn publish(&self, phase: SessionPhase, can_claim_timeout: bool) {
        self.updates
            .send_replace(self.snapshot(phase, can_claim_timeout));
    }

    /// Stops timers and receipt waits and drops the peer link.
    pub(crate) fn teardown(&mut self) {
        self.countdown.cancel();
        self.confirmations.abort();
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpsls_core::ledger::{MockChain, RetryPolicy};
    use rpsls_core::{LedgerGateway, MemoryHub, PeerTransport};
    use std::sync::Arc;

    async fn session() -> (GameSession, watch::Receiver<SessionSnapshot>) {
        let hosted = MemoryHub::new().create_host().await.unwrap();
        let (countdown, _expiries) = Countdown::new();
        let gateway = LedgerGateway::new(Arc::new(MockChain::new()), RetryPolicy::default());
        let (confirmations, _results) = Confirmations::new(Arc::new(gateway));
        GameSession::new(
            hosted.ticket.session_id.clone(),
            Some(hosted.ticket.share_url()),
            Role::Player1,
            Address::zero(),
            hosted.channel,
            countdown,
            confirmations,
            SessionPhase::One(PlayerOnePhase::AwaitingPeer),
        )
    }

    #[tokio::test]
    async fn test_opponent_move_flag_is_monotonic() {
        let (mut session, _rx) = session().await;
        assert!(!session.observe_opponent_move(Weapon::Null));
        assert!(session.observe_opponent_move(Weapon::Spock));
        assert!(!session.observe_opponent_move(Weapon::Spock));
        assert!(!session.observe_opponent_move(Weapon::Rock));
        assert_eq!(session.opponent_move().choice, Weapon::Spock);
    }

    #[tokio::test]
    async fn test_winner_is_set_once() {
        let (mut session, _rx) = session().await;
        assert!(!session.set_winner(Winner::Null));
        assert!(session.set_winner(Winner::Draw));
        assert!(!session.set_winner(Winner::Player1));
        assert_eq!(session.winner(), Winner::Draw);
    }

    #[tokio::test]
    async fn test_publish_reaches_watchers() {
        let (mut session, rx) = session().await;
        session.local_move = Weapon::Paper;
        session.record_error(&"stake must be greater than 0");
        session.publish(
            SessionPhase::One(PlayerOnePhase::AwaitingMoveAndStake),
            false,
        );

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.local_move, Weapon::Paper);
        assert_eq!(
            snapshot.phase,
            SessionPhase::One(PlayerOnePhase::AwaitingMoveAndStake)
        );
        assert!(snapshot.last_error.is_some());
        assert!(snapshot.share_link.unwrap().contains("peerId=RPSLS-"));
    }

    #[tokio::test]
    async fn test_refresh_deadline_rearms_only_on_new_action() {
        let (mut session, _rx) = session().await;
        let now = Utc::now();
        let mut state = LedgerState {
            p1_committed: true,
            p2_move: Weapon::Null,
            required_stake: Wei::from_wei(1u64),
            last_action: now.timestamp(),
            timeout_window: Duration::from_secs(300),
        };

        session.refresh_deadline(&state, now).unwrap();
        let first = session.countdown.deadline().unwrap();
        session.refresh_deadline(&state, now).unwrap();
        assert_eq!(session.countdown.deadline(), Some(first));

        state.last_action += 60;
        session.refresh_deadline(&state, now).unwrap();
        assert_eq!(
            session.countdown.deadline(),
            Some(first + chrono::Duration::seconds(60))
        );
    }

    #[tokio::test]
    async fn test_refresh_deadline_rejects_unusable_timing() {
        let (mut session, _rx) = session().await;
        let now = Utc::now();
        let mut state = LedgerState {
            p1_committed: true,
            p2_move: Weapon::Null,
            required_stake: Wei::from_wei(1u64),
            last_action: now.timestamp(),
            timeout_window: Duration::from_secs(300),
        };
        session.refresh_deadline(&state, now).unwrap();
        let armed = session.countdown.deadline();

        state.last_action = i64::MAX;
        let err = session.refresh_deadline(&state, now).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(session.countdown.deadline(), armed);

        // once sane timing comes back the countdown follows it again
        state.last_action = now.timestamp() + 60;
        session.refresh_deadline(&state, now).unwrap();
        assert_ne!(session.countdown.deadline(), armed);
    }
}
