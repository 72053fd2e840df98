use crate::confirmation::{Confirmation, Confirmations};
use crate::countdown::{Countdown, CountdownExpired};
use crate::rules::decide_winner;
use crate::session::{GameSession, SessionInputs, SessionPhase, SessionSnapshot};
use crate::{GameError, Result};
use chrono::Utc;
use rpsls_core::{
    Address, GameConfig, LedgerGateway, PeerEvent, PeerMessage, PeerTransport, PendingTx, Role,
    RpslsError, SessionTicket, TxKind, Weapon, Wei, Winner,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerTwoPhase {
    Connecting,
    AwaitingLedgerAddress,
    AwaitingOwnMove,
    AwaitingReveal,
    Resolved(Winner),
    /// We claimed the pot after Player One never revealed.
    TimedOut,
    /// Player One claimed its stake back before we moved.
    OpponentClaimedTimeout,
}

impl PlayerTwoPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayerTwoPhase::Resolved(_)
                | PlayerTwoPhase::TimedOut
                | PlayerTwoPhase::OpponentClaimedTimeout
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerTwoCommand {
    SelectMove(Weapon),
    /// Overrides the stake announced by Player One.
    SetStake(String),
    SubmitMove,
    ClaimTimeout,
    Quit,
}

/// Joiner: matches the stake, plays a move and waits for the reveal.
pub struct PlayerTwo {
    session: GameSession,
    phase: PlayerTwoPhase,
    gateway: Arc<LedgerGateway>,
    poll_interval: Duration,
    /// Ledger stake went to zero after our move.
    settled: bool,
    peer_left: bool,
}

impl PlayerTwo {
    /// Joins Player One's session and introduces ourselves.
    pub async fn join(
        transport: &dyn PeerTransport,
        ticket: &SessionTicket,
        gateway: Arc<LedgerGateway>,
        account: Address,
        config: &GameConfig,
    ) -> Result<(Self, SessionInputs, watch::Receiver<SessionSnapshot>)> {
        let joined = transport.connect_to(ticket).await?;
        let (countdown, expiries) = Countdown::new();
        let (confirmations, receipts) = Confirmations::new(gateway.clone());

        let (session, updates) = GameSession::new(
            ticket.session_id.clone(),
            None,
            Role::Player2,
            account,
            joined.channel,
            countdown,
            confirmations,
            SessionPhase::Two(PlayerTwoPhase::Connecting),
        );

        let mut player = Self {
            session,
            phase: PlayerTwoPhase::Connecting,
            gateway,
            poll_interval: config.poll_interval,
            settled: false,
            peer_left: false,
        };
        player.session.send(PeerMessage::Connected);
        player
            .session
            .send(PeerMessage::Player2Address { address: account });
        player.set_phase(PlayerTwoPhase::AwaitingLedgerAddress);
        player.publish();

        Ok((
            player,
            SessionInputs {
                events: joined.events,
                expiries,
                confirmations: receipts,
            },
            updates,
        ))
    }

    pub fn phase(&self) -> PlayerTwoPhase {
        self.phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session
            .snapshot(SessionPhase::Two(self.phase), self.can_claim_timeout())
    }

    fn set_phase(&mut self, phase: PlayerTwoPhase) {
        if self.phase != phase {
            tracing::info!("Player Two: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn publish(&self) {
        self.session
            .publish(SessionPhase::Two(self.phase), self.can_claim_timeout());
    }

    /// A resolved game still waits for Player One's revealed move unless the
    /// peer is already gone.
    fn finished(&self) -> bool {
        match self.phase {
            PlayerTwoPhase::Resolved(_) => self.session.opponent_move().moved || self.peer_left,
            phase => phase.is_terminal(),
        }
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::ConnectionEstablished => tracing::info!("Connected to Player One"),
            PeerEvent::Message(message) => self.handle_message(message).await?,
            PeerEvent::Error(reason) => self.session.record_error(&reason),
            PeerEvent::Disconnected => {
                self.peer_left = true;
                if !self.phase.is_terminal() {
                    return Err(GameError::PeerDisconnected(
                        "Player One left the session".to_string(),
                    ));
                }
            }
        }
        self.publish();
        Ok(())
    }

    async fn handle_message(&mut self, message: PeerMessage) -> Result<()> {
        match message {
            PeerMessage::Player1Address { address } => {
                tracing::info!("Player One's address: {:?}", address);
                self.session.opponent_address = Some(address);
            }
            PeerMessage::ContractAddress { address } => {
                if self.session.ledger_address.is_none() {
                    tracing::info!("Game contract at {:?}", address);
                    self.session.ledger_address = Some(address);
                    if self.phase == PlayerTwoPhase::AwaitingLedgerAddress {
                        self.set_phase(PlayerTwoPhase::AwaitingOwnMove);
                    }
                    self.poll_ledger().await?;
                }
            }
            PeerMessage::RequiredStake { amount_staked } => {
                let stake = Wei::parse_ether(&amount_staked)?;
                tracing::info!("Player One staked {} ETH", stake);
                self.session.stake = Some(stake);
            }
            PeerMessage::Winner { player } => self.adopt_winner(player),
            PeerMessage::Player1Choice { choice } => self.adopt_reveal(choice),
            PeerMessage::PeerTimedOut => {
                if !self.phase.is_terminal() {
                    tracing::warn!("Player One reclaimed the stake after our timeout");
                    self.session.countdown.cancel();
                    self.session.confirmations.abort();
                    self.set_phase(PlayerTwoPhase::OpponentClaimedTimeout);
                }
            }
            other => tracing::debug!("Player Two ignores {}", other.tag()),
        }
        Ok(())
    }

    fn adopt_winner(&mut self, winner: Winner) {
        if !winner.is_decided() || self.phase.is_terminal() {
            return;
        }
        self.session.set_winner(winner);
        self.session.countdown.cancel();
        self.set_phase(PlayerTwoPhase::Resolved(winner));
        tracing::info!("Player One announced the result: {}", winner);
    }

    fn adopt_reveal(&mut self, choice: Weapon) {
        if !self.session.observe_opponent_move(choice) {
            return;
        }
        let local = self.session.local_move;
        if !local.is_playable() {
            return;
        }

        match decide_winner(choice, local) {
            Ok(computed) if self.session.winner().is_decided() => {
                if computed != self.session.winner() {
                    tracing::warn!(
                        "Announced winner {} disagrees with revealed moves ({})",
                        self.session.winner(),
                        computed
                    );
                }
            }
            Ok(computed) => self.adopt_winner(computed),
            Err(e) => self.session.record_error(&e),
        }
    }

    fn ensure_before_move(&self) -> Result<()> {
        if let Some(pending) = self.session.confirmations.outstanding() {
            return Err(GameError::invalid_state(format!(
                "Waiting for {:?} to confirm",
                pending.hash
            )));
        }
        match self.phase {
            PlayerTwoPhase::Connecting
            | PlayerTwoPhase::AwaitingLedgerAddress
            | PlayerTwoPhase::AwaitingOwnMove => Ok(()),
            phase => Err(GameError::invalid_state(format!(
                "Move already submitted ({:?})",
                phase
            ))),
        }
    }

    pub fn select_move(&mut self, choice: Weapon) -> Result<()> {
        self.ensure_before_move()?;
        if !choice.is_playable() {
            return Err(RpslsError::InvalidMove(choice.code()).into());
        }
        self.session.local_move = choice;
        self.session.clear_error();
        self.publish();
        Ok(())
    }

    pub fn set_stake(&mut self, input: &str) -> Result<()> {
        self.ensure_before_move()?;
        self.session.stake = Some(Wei::parse_ether(input.trim())?);
        self.publish();
        Ok(())
    }

    /// Plays the selected move on-chain, matching Player One's stake.
    ///
    /// The receipt arrives later through [`PlayerTwo::handle_confirmation`].
    pub async fn send_p2_choice(&mut self) -> Result<PendingTx> {
        if self.phase != PlayerTwoPhase::AwaitingOwnMove {
            return Err(GameError::invalid_state(format!(
                "Cannot move while {:?}",
                self.phase
            )));
        }
        self.ensure_before_move()?;
        let choice = self.session.local_move;
        if !choice.is_playable() {
            return Err(GameError::invalid_state("Select a move first"));
        }
        let ledger = self
            .session
            .ledger_address
            .ok_or_else(|| GameError::invalid_state("No game contract yet"))?;
        let stake = self
            .session
            .stake
            .ok_or_else(|| GameError::invalid_state("Required stake is unknown"))?;

        let submitted = self
            .gateway
            .submit_move(&self.session.account, &ledger, choice, stake)
            .await;
        match submitted {
            Ok(pending) => {
                self.session.confirmations.track(pending);
                self.session.clear_error();
                self.publish();
                Ok(pending)
            }
            Err(e) => {
                self.session.record_error(&e);
                self.publish();
                Err(e.into())
            }
        }
    }

    /// Applies the result of a receipt wait for one of our own writes.
    pub async fn handle_confirmation(&mut self, confirmation: Confirmation) -> Result<()> {
        let Some(Confirmation { pending, result }) =
            self.session.confirmations.accept(confirmation)
        else {
            return Ok(());
        };
        if self.phase.is_terminal() {
            return Ok(());
        }

        let outcome = match result {
            Err(e) if e.is_transient() => {
                // kept outstanding; the next tick resumes the wait
                self.session.record_error(&e);
                Ok(())
            }
            Ok(_) => match pending.kind {
                TxKind::SubmitMove => self.on_moved().await,
                TxKind::ClaimTimeout => {
                    self.on_claimed();
                    Ok(())
                }
                TxKind::CreateGame | TxKind::Reveal => Ok(()),
            },
            Err(e) => {
                self.session.record_error(&e);
                Err(e.into())
            }
        };
        self.publish();
        outcome
    }

    async fn on_moved(&mut self) -> Result<()> {
        let ledger = self
            .session
            .ledger_address
            .ok_or_else(|| GameError::invalid_state("No game contract"))?;
        tracing::info!("Move submitted to {:?}", ledger);
        self.session.clear_error();
        match self.gateway.poll_state(&ledger).await {
            Ok(state) => {
                if let Err(e) = self.session.refresh_deadline(&state, Utc::now()) {
                    self.session.record_error(&e);
                }
            }
            Err(e) => self.session.record_error(&e),
        }
        self.session.send(PeerMessage::Player2Responded);
        self.set_phase(PlayerTwoPhase::AwaitingReveal);
        Ok(())
    }

    /// Reads the ledger. While waiting for the reveal this keeps the deadline
    /// current and notices settlement. Also resumes receipt waits that gave
    /// up earlier.
    pub async fn poll_ledger(&mut self) -> Result<()> {
        if self.phase.is_terminal() {
            return Ok(());
        }
        if self.session.confirmations.resume() {
            self.publish();
        }
        let Some(ledger) = self.session.ledger_address else {
            return Ok(());
        };
        if self.settled {
            return Ok(());
        }

        let state = match self.gateway.poll_state(&ledger).await {
            Ok(state) => state,
            Err(e) if e.is_transient() => {
                self.session.record_error(&e);
                self.publish();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("Polled {:?}: {:?}", ledger, state);

        match self.phase {
            PlayerTwoPhase::AwaitingOwnMove => {
                if self.session.stake.is_none() && !state.required_stake.is_zero() {
                    self.session.stake = Some(state.required_stake);
                }
            }
            PlayerTwoPhase::AwaitingReveal => {
                if let Err(e) = self.session.refresh_deadline(&state, Utc::now()) {
                    self.session.record_error(&e);
                }
                if state.required_stake.is_zero() && self.session.confirmations.is_idle() {
                    tracing::info!("Game settled on-chain, waiting for the announcement");
                    self.settled = true;
                    self.session.countdown.cancel();
                }
            }
            _ => {}
        }
        self.publish();
        Ok(())
    }

    pub fn handle_countdown(&mut self, expired: CountdownExpired) {
        if self.session.countdown.on_expired(expired) {
            tracing::info!("Player One's time to reveal has run out");
            self.publish();
        }
    }

    pub fn can_claim_timeout(&self) -> bool {
        self.phase == PlayerTwoPhase::AwaitingReveal
            && self.session.countdown.is_expired()
            && self.session.confirmations.is_idle()
            && !self.session.winner().is_decided()
            && !self.settled
    }

    /// Submits the claim for the whole pot after Player One failed to reveal
    /// in time.
    pub async fn claim_opponent_timeout(&mut self) -> Result<PendingTx> {
        if !self.can_claim_timeout() {
            return Err(GameError::TimeoutNotExpired);
        }
        let ledger = self
            .session
            .ledger_address
            .ok_or_else(|| GameError::invalid_state("No game contract"))?;

        let submitted = self
            .gateway
            .claim_opponent_timeout(&self.session.account, &ledger, Role::Player2)
            .await;
        match submitted {
            Ok(pending) => {
                self.session.confirmations.track(pending);
                self.publish();
                Ok(pending)
            }
            Err(e) => {
                self.session.record_error(&e);
                self.publish();
                Err(e.into())
            }
        }
    }

    fn on_claimed(&mut self) {
        self.session.send(PeerMessage::PeerTimedOut);
        self.session.countdown.cancel();
        self.session.clear_error();
        self.set_phase(PlayerTwoPhase::TimedOut);
    }

    async fn handle_command(&mut self, command: PlayerTwoCommand) -> Result<bool> {
        match command {
            PlayerTwoCommand::SelectMove(choice) => self.select_move(choice)?,
            PlayerTwoCommand::SetStake(input) => self.set_stake(&input)?,
            PlayerTwoCommand::SubmitMove => {
                self.send_p2_choice().await?;
            }
            PlayerTwoCommand::ClaimTimeout => {
                self.claim_opponent_timeout().await?;
            }
            PlayerTwoCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Drives the session until the result is known, the player quits or
    /// Player One disconnects mid-game.
    pub async fn run(
        mut self,
        mut inputs: SessionInputs,
        mut commands: mpsc::UnboundedReceiver<PlayerTwoCommand>,
    ) -> Result<SessionSnapshot> {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.publish();

        while !self.finished() {
            let outcome = tokio::select! {
                Some(event) = inputs.events.recv() => self.handle_peer_event(event).await,
                Some(expired) = inputs.expiries.recv() => {
                    self.handle_countdown(expired);
                    Ok(())
                }
                Some(confirmation) = inputs.confirmations.recv() => {
                    self.handle_confirmation(confirmation).await
                }
                command = commands.recv() => match command {
                    Some(command) => match self.handle_command(command).await {
                        Ok(true) => Ok(()),
                        Ok(false) => break,
                        Err(e) => Err(e),
                    },
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.phase == PlayerTwoPhase::AwaitingReveal
                        || self.session.confirmations.outstanding().is_some()
                    {
                        self.poll_ledger().await
                    } else {
                        Ok(())
                    }
                }
            };

            if let Err(e) = outcome {
                self.session.record_error(&e);
                if !e.is_recoverable() {
                    tracing::error!("Player Two session ended: {}", e);
                    self.session.teardown();
                    self.publish();
                    return Err(e);
                }
                self.publish();
            }
        }

        self.session.teardown();
        self.publish();
        Ok(self.snapshot())
    }
}
