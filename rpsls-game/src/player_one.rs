use crate::confirmation::{Confirmation, Confirmations};
use crate::countdown::{Countdown, CountdownExpired};
use crate::rules::decide_winner;
use crate::session::{GameSession, SessionInputs, SessionPhase, SessionSnapshot};
use crate::{GameError, Result};
use chrono::Utc;
use rpsls_core::{
    Address, GameConfig, LedgerGateway, MoveSecret, PeerEvent, PeerMessage, PeerTransport,
    PendingTx, Receipt, Role, RpslsError, SessionTicket, TxKind, Weapon, Wei, Winner,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

const GREETING: &str = "Connection with Player One established";

/// Player One's protocol position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerOnePhase {
    AwaitingPeer,
    AwaitingOpponentAddress,
    AwaitingMoveAndStake,
    AwaitingLedgerConfirmation,
    AwaitingOpponentMove,
    Resolving,
    Resolved(Winner),
    /// We claimed the stake after Player Two never moved.
    ClaimedTimeout,
    /// Player Two claimed the stake after we never revealed.
    OpponentClaimedTimeout,
}

impl PlayerOnePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayerOnePhase::Resolved(_)
                | PlayerOnePhase::ClaimedTimeout
                | PlayerOnePhase::OpponentClaimedTimeout
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerOneCommand {
    SelectMove(Weapon),
    /// Decimal ether; empty selects the configured default.
    SetStake(String),
    CreateGame,
    ClaimTimeout,
    Quit,
}

/// Game creator: commits to a move, deploys the wager and reveals once
/// Player Two has moved.
pub struct PlayerOne {
    session: GameSession,
    phase: PlayerOnePhase,
    gateway: Arc<LedgerGateway>,
    ticket: SessionTicket,
    poll_interval: Duration,
    default_stake: Wei,
    stake_input: Option<Wei>,
    secret: Option<MoveSecret>,
}

impl PlayerOne {
    /// Opens a hosted session and waits for Player Two in the background.
    pub async fn host(
        transport: &dyn PeerTransport,
        gateway: Arc<LedgerGateway>,
        account: Address,
        config: &GameConfig,
    ) -> Result<(Self, SessionInputs, watch::Receiver<SessionSnapshot>)> {
        let default_stake = config.default_stake()?;
        let hosted = transport.create_host().await?;
        let (countdown, expiries) = Countdown::new();
        let (confirmations, receipts) = Confirmations::new(gateway.clone());

        let (session, updates) = GameSession::new(
            hosted.ticket.session_id.clone(),
            Some(hosted.ticket.share_url()),
            Role::Player1,
            account,
            hosted.channel,
            countdown,
            confirmations,
            SessionPhase::One(PlayerOnePhase::AwaitingPeer),
        );
        tracing::info!(
            "Hosting game session {}, share {}",
            hosted.ticket.session_id,
            hosted.ticket.share_url()
        );

        Ok((
            Self {
                session,
                phase: PlayerOnePhase::AwaitingPeer,
                gateway,
                ticket: hosted.ticket,
                poll_interval: config.poll_interval,
                default_stake,
                stake_input: None,
                secret: None,
            },
            SessionInputs {
                events: hosted.events,
                expiries,
                confirmations: receipts,
            },
            updates,
        ))
    }

    pub fn phase(&self) -> PlayerOnePhase {
        self.phase
    }

    pub fn ticket(&self) -> &SessionTicket {
        &self.ticket
    }

    pub fn ledger_address(&self) -> Option<Address> {
        self.session.ledger_address
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session
            .snapshot(SessionPhase::One(self.phase), self.can_claim_timeout())
    }

    fn set_phase(&mut self, phase: PlayerOnePhase) {
        if self.phase != phase {
            tracing::info!("Player One: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn publish(&self) {
        self.session
            .publish(SessionPhase::One(self.phase), self.can_claim_timeout());
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::ConnectionEstablished => {
                if self.phase == PlayerOnePhase::AwaitingPeer {
                    self.session.channel.send_raw(format!("\"{}\"", GREETING));
                    self.session.send(PeerMessage::Player1Address {
                        address: self.session.account,
                    });
                    self.set_phase(PlayerOnePhase::AwaitingOpponentAddress);
                }
            }
            PeerEvent::Message(message) => self.handle_message(message).await?,
            PeerEvent::Error(reason) => self.session.record_error(&reason),
            PeerEvent::Disconnected => {
                if !self.phase.is_terminal() {
                    return Err(GameError::PeerDisconnected(
                        "Player Two left the session".to_string(),
                    ));
                }
            }
        }
        self.publish();
        Ok(())
    }

    async fn handle_message(&mut self, message: PeerMessage) -> Result<()> {
        match message {
            PeerMessage::Connected => tracing::info!("Player Two has connected"),
            PeerMessage::Player2Address { address } => {
                if self.phase == PlayerOnePhase::AwaitingOpponentAddress {
                    tracing::info!("Player Two's address: {:?}", address);
                    self.session.opponent_address = Some(address);
                    self.set_phase(PlayerOnePhase::AwaitingMoveAndStake);
                } else {
                    tracing::debug!("Ignoring repeated Player2Address");
                }
            }
            PeerMessage::Player2Responded => {
                if self.phase == PlayerOnePhase::AwaitingOpponentMove {
                    self.poll_ledger().await?;
                }
            }
            PeerMessage::PeerTimedOut => {
                if !self.phase.is_terminal() {
                    tracing::warn!("Player Two claimed the stake after our timeout");
                    self.secret = None;
                    self.session.countdown.cancel();
                    self.session.confirmations.abort();
                    self.set_phase(PlayerOnePhase::OpponentClaimedTimeout);
                }
            }
            other => tracing::debug!("Player One ignores {}", other.tag()),
        }
        Ok(())
    }

    fn ensure_before_creation(&self) -> Result<()> {
        match self.phase {
            PlayerOnePhase::AwaitingPeer
            | PlayerOnePhase::AwaitingOpponentAddress
            | PlayerOnePhase::AwaitingMoveAndStake => Ok(()),
            phase => Err(GameError::invalid_state(format!(
                "Game already created ({:?})",
                phase
            ))),
        }
    }

    pub fn select_move(&mut self, choice: Weapon) -> Result<()> {
        self.ensure_before_creation()?;
        if !choice.is_playable() {
            return Err(RpslsError::InvalidMove(choice.code()).into());
        }
        self.session.local_move = choice;
        self.session.clear_error();
        self.publish();
        Ok(())
    }

    /// Accepts a decimal ether amount. An empty entry falls back to the default stake.
    pub fn set_stake(&mut self, input: &str) -> Result<()> {
        self.ensure_before_creation()?;
        let input = input.trim();
        self.stake_input = if input.is_empty() {
            None
        } else {
            Some(Wei::parse_ether(input)?)
        };
        self.session.stake = Some(self.stake_input.unwrap_or(self.default_stake));
        self.publish();
        Ok(())
    }

    /// Commits to the selected move and submits the wager contract deployment.
    ///
    /// The receipt arrives later through [`PlayerOne::handle_confirmation`].
    /// A deployment that cannot be submitted leaves the session where it was
    /// so the player can adjust the stake and try again.
    pub async fn create_game(&mut self) -> Result<PendingTx> {
        if self.phase != PlayerOnePhase::AwaitingMoveAndStake {
            return Err(GameError::invalid_state(format!(
                "Cannot create a game while {:?}",
                self.phase
            )));
        }
        let choice = self.session.local_move;
        if !choice.is_playable() {
            return Err(GameError::invalid_state("Select a move first"));
        }
        let opponent = self
            .session
            .opponent_address
            .ok_or_else(|| GameError::invalid_state("Player Two's address is unknown"))?;
        let stake = self.stake_input.unwrap_or(self.default_stake);

        let secret = MoveSecret::new(choice)?;
        self.session.stake = Some(stake);
        self.set_phase(PlayerOnePhase::AwaitingLedgerConfirmation);
        self.publish();

        let submitted = self
            .gateway
            .create_game(
                &self.session.account,
                secret.commitment(),
                &format!("{:?}", opponent),
                stake,
            )
            .await;
        match submitted {
            Ok(pending) => {
                // the deployment may be mined even if we never see its receipt
                self.secret = Some(secret);
                self.session.confirmations.track(pending);
                self.publish();
                Ok(pending)
            }
            Err(e) => {
                self.set_phase(PlayerOnePhase::AwaitingMoveAndStake);
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
            Ok(receipt) => match pending.kind {
                TxKind::CreateGame => self.on_deployed(receipt).await,
                TxKind::Reveal => self.on_revealed(),
                TxKind::ClaimTimeout => self.on_claimed(),
                TxKind::SubmitMove => Ok(()),
            },
            Err(e) => {
                match pending.kind {
                    TxKind::CreateGame => {
                        self.secret = None;
                        self.set_phase(PlayerOnePhase::AwaitingMoveAndStake);
                    }
                    // stays resolvable: the next poll submits the reveal again
                    TxKind::Reveal => self.set_phase(PlayerOnePhase::AwaitingOpponentMove),
                    TxKind::ClaimTimeout | TxKind::SubmitMove => {}
                }
                self.session.record_error(&e);
                Err(e.into())
            }
        };
        self.publish();
        outcome
    }

    async fn on_deployed(&mut self, receipt: Receipt) -> Result<()> {
        let Some(ledger) = receipt.contract_address else {
            self.secret = None;
            self.set_phase(PlayerOnePhase::AwaitingMoveAndStake);
            let e = RpslsError::deploy("receipt carries no contract address");
            self.session.record_error(&e);
            return Err(e.into());
        };
        let stake = self.session.stake.unwrap_or(self.default_stake);

        self.session.ledger_address = Some(ledger);
        self.session.clear_error();
        tracing::info!("Game contract deployed at {:?}", ledger);

        match self.gateway.poll_state(&ledger).await {
            Ok(state) => {
                if let Err(e) = self.session.refresh_deadline(&state, Utc::now()) {
                    self.session.record_error(&e);
                }
            }
            Err(e) => self.session.record_error(&e),
        }
        self.session
            .send(PeerMessage::ContractAddress { address: ledger });
        self.session.send(PeerMessage::RequiredStake {
            amount_staked: stake.to_ether_string(),
        });
        self.set_phase(PlayerOnePhase::AwaitingOpponentMove);
        Ok(())
    }

    /// Reads the ledger, refreshes the deadline and reveals once Player Two's
    /// move shows up. Also resumes receipt waits that gave up earlier.
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

        if let Err(e) = self.session.refresh_deadline(&state, Utc::now()) {
            self.session.record_error(&e);
        }
        if self.session.observe_opponent_move(state.p2_move) {
            tracing::info!("Player Two has moved");
        }

        if self.session.opponent_move().moved
            && self.phase == PlayerOnePhase::AwaitingOpponentMove
            && self.session.confirmations.is_idle()
        {
            self.resolve().await?;
        }
        self.publish();
        Ok(())
    }

    /// Submits the reveal of the committed move.
    async fn resolve(&mut self) -> Result<()> {
        let ledger = self
            .session
            .ledger_address
            .ok_or_else(|| GameError::invalid_state("No game contract"))?;
        let (choice, salt) = match &self.secret {
            Some(secret) => (secret.choice(), secret.salt().clone()),
            None => return Err(GameError::MissingCommitment),
        };

        self.set_phase(PlayerOnePhase::Resolving);
        self.publish();

        match self
            .gateway
            .reveal(&self.session.account, &ledger, choice, &salt)
            .await
        {
            Ok(pending) => {
                self.session.confirmations.track(pending);
                Ok(())
            }
            Err(e) => {
                self.set_phase(PlayerOnePhase::AwaitingOpponentMove);
                self.session.record_error(&e);
                Err(e.into())
            }
        }
    }

    /// The reveal is mined: announce the result.
    fn on_revealed(&mut self) -> Result<()> {
        let choice = self
            .secret
            .as_ref()
            .map(|secret| secret.choice())
            .ok_or(GameError::MissingCommitment)?;
        let winner = decide_winner(choice, self.session.opponent_move().choice)?;
        self.session.set_winner(winner);
        self.session.send(PeerMessage::Winner { player: winner });
        self.session.send(PeerMessage::Player1Choice { choice });

        self.secret = None;
        self.session.countdown.cancel();
        self.session.clear_error();
        self.set_phase(PlayerOnePhase::Resolved(winner));
        tracing::info!("Game settled: {}", winner);
        Ok(())
    }

    pub fn handle_countdown(&mut self, expired: CountdownExpired) {
        if self.session.countdown.on_expired(expired) {
            tracing::info!("Player Two's time to move has run out");
            self.publish();
        }
    }

    pub fn can_claim_timeout(&self) -> bool {
        self.phase == PlayerOnePhase::AwaitingOpponentMove
            && self.session.countdown.is_expired()
            && self.session.confirmations.is_idle()
            && !self.session.winner().is_decided()
            && !self.session.opponent_move().moved
    }

    /// Submits the claim to take the stake back after Player Two failed to
    /// move in time.
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
            .claim_opponent_timeout(&self.session.account, &ledger, Role::Player1)
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

    fn on_claimed(&mut self) -> Result<()> {
        self.session.send(PeerMessage::PeerTimedOut);
        self.secret = None;
        self.session.countdown.cancel();
        self.session.clear_error();
        self.set_phase(PlayerOnePhase::ClaimedTimeout);
        Ok(())
    }

    async fn handle_command(&mut self, command: PlayerOneCommand) -> Result<bool> {
        match command {
            PlayerOneCommand::SelectMove(choice) => self.select_move(choice)?,
            PlayerOneCommand::SetStake(input) => self.set_stake(&input)?,
            PlayerOneCommand::CreateGame => {
                self.create_game().await?;
            }
            PlayerOneCommand::ClaimTimeout => {
                self.claim_opponent_timeout().await?;
            }
            PlayerOneCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn teardown(&mut self) {
        self.secret = None;
        self.session.teardown();
        self.publish();
    }

    /// Drives the session until it ends, the player quits or Player Two
    /// disconnects.
    pub async fn run(
        mut self,
        mut inputs: SessionInputs,
        mut commands: mpsc::UnboundedReceiver<PlayerOneCommand>,
    ) -> Result<SessionSnapshot> {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.publish();

        while !self.phase.is_terminal() {
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
                _ = ticker.tick() => self.poll_ledger().await,
            };

            if let Err(e) = outcome {
                if !e.is_recoverable() {
                    tracing::error!("Player One session ended: {}", e);
                    self.session.record_error(&e);
                    self.teardown();
                    return Err(e);
                }
                self.session.record_error(&e);
                self.publish();
            }
        }

        self.teardown();
        Ok(self.snapshot())
    }
}
