use super::connect_ledger;
use crate::ui;
use rpsls_core::{GameConfig, SessionTicket, TcpTransport};
use rpsls_game::{
    PlayerOne, PlayerOneCommand, PlayerOnePhase, PlayerTwo, PlayerTwoCommand, PlayerTwoPhase,
    SessionPhase, SessionSnapshot,
};
use tokio::sync::{mpsc, watch};

/// What the player has been asked for so far, so each prompt is shown once
/// per attempt.
#[derive(Default)]
struct Prompts {
    move_sent: bool,
    claim_offered: bool,
    last_phase: Option<SessionPhase>,
    last_error: Option<String>,
}

impl Prompts {
    /// Prints phase changes and new errors.
    fn report(&mut self, snapshot: &SessionSnapshot) {
        if snapshot.last_error != self.last_error {
            if let Some(error) = &snapshot.last_error {
                println!("! {}", error);
            }
            self.last_error = snapshot.last_error.clone();
        }

        if self.last_phase == Some(snapshot.phase) {
            return;
        }
        self.last_phase = Some(snapshot.phase);
        if !snapshot.is_terminal() {
            println!("> {}", ui::describe_phase(snapshot.phase));
            if let Some(deadline) = snapshot.deadline {
                println!("  Opponent deadline: {}", deadline.format("%H:%M:%S UTC"));
            }
            if let Some(tx) = snapshot.pending_tx {
                println!("  Waiting for transaction {:#x}", tx);
            }
        }
    }
}

pub async fn host_game(mut config: GameConfig, listen: Option<String>) -> anyhow::Result<()> {
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    let gateway = connect_ledger(&config)?;
    let account = gateway.request_account().await?;
    let transport = TcpTransport::new(config.listen_addr.clone(), config.public_host.clone());

    let (player, inputs, mut updates) =
        PlayerOne::host(&transport, gateway, account, &config).await?;
    let link = player.ticket().share_url();
    println!("Hosting as {:?}", account);
    println!("Share this command with your opponent:");
    println!("rpsls join '{}'", link);
    println!();

    let (commands, rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(player.run(inputs, rx));
    let mut prompts = Prompts::default();

    loop {
        let snapshot = updates.borrow_and_update().clone();
        prompts.report(&snapshot);
        if snapshot.is_terminal() {
            break;
        }

        match snapshot.phase {
            SessionPhase::One(PlayerOnePhase::AwaitingMoveAndStake) => {
                // a failed deployment lands back here with the error recorded
                if prompts.move_sent && snapshot.last_error.is_some() && snapshot.pending_tx.is_none()
                {
                    prompts.move_sent = false;
                }
                if !prompts.move_sent {
                    let choice = ui::prompt_move().await?;
                    let stake = ui::prompt_stake(
                        format!("Stake in ETH (empty for {})", config.default_stake),
                        None,
                        true,
                    )
                    .await?;
                    commands.send(PlayerOneCommand::SelectMove(choice))?;
                    commands.send(PlayerOneCommand::SetStake(stake))?;
                    commands.send(PlayerOneCommand::CreateGame)?;
                    prompts.move_sent = true;
                }
            }
            SessionPhase::One(PlayerOnePhase::AwaitingOpponentMove)
                if snapshot.can_claim_timeout && !prompts.claim_offered =>
            {
                prompts.claim_offered = true;
                let claim = ui::confirm(
                    "Player Two did not move in time. Reclaim your stake?".to_string(),
                    true,
                )
                .await?;
                if claim {
                    commands.send(PlayerOneCommand::ClaimTimeout)?;
                }
            }
            _ => {}
        }

        match wait_for_change(&mut updates).await {
            Wake::Changed => {}
            Wake::Ended => break,
            Wake::Interrupted => {
                let _ = commands.send(PlayerOneCommand::Quit);
                break;
            }
        }
    }

    let outcome = session.await??;
    ui::print_outcome(&outcome);
    Ok(())
}

pub async fn join_game(config: GameConfig, link: &str) -> anyhow::Result<()> {
    let ticket = SessionTicket::parse(link)?;
    let gateway = connect_ledger(&config)?;
    let account = gateway.request_account().await?;
    let transport = TcpTransport::new(config.listen_addr.clone(), config.public_host.clone());

    let (player, inputs, mut updates) =
        PlayerTwo::join(&transport, &ticket, gateway, account, &config).await?;
    println!("Joined session {} as {:?}", ticket.session_id, account);
    println!();

    let (commands, rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(player.run(inputs, rx));
    let mut prompts = Prompts::default();

    loop {
        let snapshot = updates.borrow_and_update().clone();
        prompts.report(&snapshot);
        if snapshot.is_terminal() {
            break;
        }

        match (snapshot.phase, snapshot.stake) {
            (SessionPhase::Two(PlayerTwoPhase::AwaitingOwnMove), Some(required)) => {
                // a stake mismatch or failed transaction keeps us here
                if prompts.move_sent && snapshot.last_error.is_some() && snapshot.pending_tx.is_none()
                {
                    prompts.move_sent = false;
                }
                if !prompts.move_sent {
                    println!("Player One staked {} ETH.", required);
                    let choice = ui::prompt_move().await?;
                    let stake = ui::prompt_stake(
                        "Stake in ETH".to_string(),
                        Some(required.to_string()),
                        false,
                    )
                    .await?;
                    commands.send(PlayerTwoCommand::SelectMove(choice))?;
                    commands.send(PlayerTwoCommand::SetStake(stake))?;
                    commands.send(PlayerTwoCommand::SubmitMove)?;
                    prompts.move_sent = true;
                }
            }
            (SessionPhase::Two(PlayerTwoPhase::AwaitingReveal), _)
                if snapshot.can_claim_timeout && !prompts.claim_offered =>
            {
                prompts.claim_offered = true;
                let claim = ui::confirm(
                    "Player One did not reveal in time. Claim the whole pot?".to_string(),
                    true,
                )
                .await?;
                if claim {
                    commands.send(PlayerTwoCommand::ClaimTimeout)?;
                }
            }
            _ => {}
        }

        match wait_for_change(&mut updates).await {
            Wake::Changed => {}
            Wake::Ended => break,
            Wake::Interrupted => {
                let _ = commands.send(PlayerTwoCommand::Quit);
                break;
            }
        }
    }

    let outcome = session.await??;
    ui::print_outcome(&outcome);
    Ok(())
}

enum Wake {
    Changed,
    /// The run loop returned; its result is in the join handle.
    Ended,
    Interrupted,
}

async fn wait_for_change(updates: &mut watch::Receiver<SessionSnapshot>) -> Wake {
    tokio::select! {
        changed = updates.changed() => match changed {
            Ok(()) => Wake::Changed,
            Err(_) => Wake::Ended,
        },
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("Leaving the session...");
            Wake::Interrupted
        }
    }
}
