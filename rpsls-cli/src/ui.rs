use chrono::Utc;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::{Confirm, Input, Select};
use rpsls_core::{Role, Weapon, Wei, Winner};
use rpsls_game::{PlayerOnePhase, PlayerTwoPhase, SessionPhase, SessionSnapshot};

/// Runs a blocking terminal prompt off the async workers.
async fn blocking<T, F>(prompt: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> dialoguer::Result<T> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(prompt).await??)
}

pub async fn prompt_move() -> anyhow::Result<Weapon> {
    let names: Vec<&'static str> = Weapon::PLAYABLE.iter().map(|w| w.name()).collect();
    let index = blocking(move || {
        Select::new()
            .with_prompt("Choose your weapon")
            .items(&names)
            .default(0)
            .interact()
    })
    .await?;
    Ok(Weapon::PLAYABLE[index])
}

/// Asks for a stake in ether. `initial` is offered as the editable answer;
/// an empty answer is allowed when `allow_empty` is set.
pub async fn prompt_stake(prompt: String, initial: Option<String>, allow_empty: bool) -> anyhow::Result<String> {
    blocking(move || {
        let mut input = Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(allow_empty)
            .validate_with(move |value: &String| -> Result<(), String> {
                let value = value.trim();
                if value.is_empty() && allow_empty {
                    return Ok(());
                }
                Wei::parse_ether(value).map(|_| ()).map_err(|e| e.to_string())
            });
        if let Some(initial) = initial {
            input = input.with_initial_text(initial);
        }
        input.interact_text()
    })
    .await
}

pub async fn confirm(prompt: String, default: bool) -> anyhow::Result<bool> {
    blocking(move || Confirm::new().with_prompt(prompt).default(default).interact()).await
}

pub fn describe_phase(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::One(phase) => match phase {
            PlayerOnePhase::AwaitingPeer => "Waiting for an opponent to join",
            PlayerOnePhase::AwaitingOpponentAddress => "Opponent connected, exchanging addresses",
            PlayerOnePhase::AwaitingMoveAndStake => "Pick your move and stake",
            PlayerOnePhase::AwaitingLedgerConfirmation => "Creating the game contract",
            PlayerOnePhase::AwaitingOpponentMove => "Waiting for Player Two to move",
            PlayerOnePhase::Resolving => "Revealing your move",
            PlayerOnePhase::Resolved(_) => "Game finished",
            PlayerOnePhase::ClaimedTimeout => "Stake reclaimed after Player Two's timeout",
            PlayerOnePhase::OpponentClaimedTimeout => "Player Two claimed the pot",
        },
        SessionPhase::Two(phase) => match phase {
            PlayerTwoPhase::Connecting => "Connecting to Player One",
            PlayerTwoPhase::AwaitingLedgerAddress => "Waiting for Player One to create the game",
            PlayerTwoPhase::AwaitingOwnMove => "Pick your move",
            PlayerTwoPhase::AwaitingReveal => "Waiting for Player One to reveal",
            PlayerTwoPhase::Resolved(_) => "Game finished",
            PlayerTwoPhase::TimedOut => "Pot claimed after Player One's timeout",
            PlayerTwoPhase::OpponentClaimedTimeout => "Player One reclaimed the stake",
        },
    }
}

fn format_remaining(snapshot: &SessionSnapshot) -> String {
    match snapshot.remaining(Utc::now()) {
        None => "-".to_string(),
        Some(left) if left.is_zero() => "expired".to_string(),
        Some(left) => {
            let secs = left.as_secs();
            format!("{}:{:02}", secs / 60, secs % 60)
        }
    }
}

pub fn status_table(snapshot: &SessionSnapshot) -> Table {
    let opponent_move = if snapshot.opponent_move.choice.is_playable() {
        snapshot.opponent_move.choice.to_string()
    } else if snapshot.opponent_move.moved {
        "moved (hidden)".to_string()
    } else {
        "not yet".to_string()
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Session", snapshot.session_id.as_str()]);
    table.add_row(vec!["Role".to_string(), snapshot.role.to_string()]);
    table.add_row(vec![
        "Status".to_string(),
        describe_phase(snapshot.phase).to_string(),
    ]);
    table.add_row(vec![
        "Peer".to_string(),
        format!("{:?}", snapshot.peer_state),
    ]);
    table.add_row(vec!["Account".to_string(), format!("{:?}", snapshot.account)]);
    table.add_row(vec![
        "Opponent".to_string(),
        snapshot
            .opponent_address
            .map(|a| format!("{:?}", a))
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec![
        "Contract".to_string(),
        snapshot
            .ledger_address
            .map(|a| format!("{:?}", a))
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec![
        "Stake".to_string(),
        snapshot
            .stake
            .map(|s| format!("{} ETH", s))
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec![
        "Your move".to_string(),
        if snapshot.local_move.is_playable() {
            snapshot.local_move.to_string()
        } else {
            "-".to_string()
        },
    ]);
    table.add_row(vec!["Opponent move".to_string(), opponent_move]);
    table.add_row(vec!["Time left".to_string(), format_remaining(snapshot)]);
    if let Some(tx) = snapshot.pending_tx {
        table.add_row(vec!["Confirming".to_string(), format!("{:#x}", tx)]);
    }
    if let Some(error) = &snapshot.last_error {
        table.add_row(vec!["Last error".to_string(), error.clone()]);
    }
    table
}

/// Final report in terms of what happened to the stakes.
pub fn print_outcome(snapshot: &SessionSnapshot) {
    let stake = snapshot.stake.unwrap_or(Wei::ZERO);
    let pot = stake
        .checked_mul(2)
        .map(|p| p.to_string())
        .unwrap_or_else(|| "twice the stake".to_string());

    println!();
    match snapshot.phase {
        SessionPhase::One(PlayerOnePhase::ClaimedTimeout) => {
            println!("Player Two never moved. Your stake of {} ETH was returned.", stake);
        }
        SessionPhase::Two(PlayerTwoPhase::TimedOut) => {
            println!("Player One never revealed. You took the pot of {} ETH.", pot);
        }
        SessionPhase::One(PlayerOnePhase::OpponentClaimedTimeout) => {
            println!("You did not reveal in time. Player Two took the pot of {} ETH.", pot);
        }
        SessionPhase::Two(PlayerTwoPhase::OpponentClaimedTimeout) => {
            println!("You did not move in time. Player One reclaimed the stake.");
        }
        _ => match (snapshot.winner, snapshot.role) {
            (Winner::Draw, _) => {
                println!(
                    "It's a draw! {} against {}. Your stake of {} ETH was returned.",
                    snapshot.local_move, snapshot.opponent_move.choice, stake
                );
            }
            (Winner::Player1, Role::Player1) | (Winner::Player2, Role::Player2) => {
                println!(
                    "You won! {} beats {}. {} ETH paid to your account.",
                    snapshot.local_move, snapshot.opponent_move.choice, pot
                );
            }
            (Winner::Player1, Role::Player2) | (Winner::Player2, Role::Player1) => {
                println!(
                    "You lost. {} beats {}. Your stake of {} ETH went to your opponent.",
                    snapshot.opponent_move.choice, snapshot.local_move, stake
                );
            }
            (Winner::Null, _) => {
                println!("The game ended without a result.");
            }
        },
    }
    println!("{}", status_table(snapshot));
}
