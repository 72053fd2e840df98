//! Deadline tracking for the opponent's next action.
//!
//! The ledger lets either side settle unilaterally once `TIMEOUT` seconds
//! pass after the last confirmed action. The countdown mirrors that clock
//! locally so the player can be offered the claim as soon as it is valid.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Idle,
    Running { deadline: DateTime<Utc> },
    Expired,
}

/// Timer notification tagged with the arming it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownExpired {
    pub epoch: u64,
}

/// `now + (window - (now - last_action))`, or `None` when the ledger values
/// fall outside what a calendar date can represent.
pub fn compute_deadline(
    last_action: i64,
    window: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let window = i64::try_from(window.as_secs())
        .ok()
        .and_then(chrono::Duration::try_seconds)?;
    let elapsed = now
        .timestamp()
        .checked_sub(last_action)
        .and_then(chrono::Duration::try_seconds)?;
    now.checked_add_signed(window.checked_sub(&elapsed)?)
}

pub struct Countdown {
    state: CountdownState,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
    expiries: UnboundedSender<CountdownExpired>,
}

impl Countdown {
    pub fn new() -> (Self, UnboundedReceiver<CountdownExpired>) {
        let (expiries, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: CountdownState::Idle,
                epoch: 0,
                timer: None,
                expiries,
            },
            rx,
        )
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self.state {
            CountdownState::Running { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state != CountdownState::Idle
    }

    pub fn is_expired(&self) -> bool {
        self.state == CountdownState::Expired
    }

    /// Arms, or re-arms, from ledger timing. Any expiry pending from an
    /// earlier arming is cancelled. Timing with no representable deadline
    /// leaves the countdown untouched and returns `None`.
    pub fn arm(
        &mut self,
        last_action: i64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Option<CountdownState> {
        let deadline = compute_deadline(last_action, window, now)?;
        self.abort_timer();
        self.epoch += 1;
        self.state = CountdownState::Running { deadline };

        let delay = (deadline - now).to_std().unwrap_or(Duration::ZERO);
        let expiries = self.expiries.clone();
        let epoch = self.epoch;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = expiries.send(CountdownExpired { epoch });
        }));

        tracing::debug!("Countdown armed, deadline {}", deadline);
        Some(self.state)
    }

    /// Applies a timer notification. Returns true on the transition to expired.
    pub fn on_expired(&mut self, expired: CountdownExpired) -> bool {
        if expired.epoch != self.epoch {
            return false;
        }
        self.expire()
    }

    /// Expires the countdown if `now` is past the deadline.
    pub fn observe(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CountdownState::Running { deadline } if now >= deadline => self.expire(),
            _ => false,
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.state {
            CountdownState::Running { deadline } => {
                Some((deadline - now).to_std().unwrap_or(Duration::ZERO))
            }
            CountdownState::Expired => Some(Duration::ZERO),
            CountdownState::Idle => None,
        }
    }

    pub fn cancel(&mut self) {
        self.abort_timer();
        self.epoch += 1;
        self.state = CountdownState::Idle;
    }

    fn expire(&mut self) -> bool {
        if !matches!(self.state, CountdownState::Running { .. }) {
            return false;
        }
        self.abort_timer();
        self.state = CountdownState::Expired;
        true
    }

    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.abort_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const T: i64 = 1_700_000_000;
    const W: Duration = Duration::from_secs(300);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_deadline_from_ledger_timing() {
        let now = at(T + 300 - 5);
        let deadline = compute_deadline(T, W, now);
        assert_eq!(deadline, Some(now + chrono::Duration::seconds(5)));
        assert_eq!(compute_deadline(T, W, at(T)), Some(at(T + 300)));
    }

    #[test]
    fn test_unrepresentable_timing_has_no_deadline() {
        let now = Utc::now();
        let huge = Duration::from_secs(100_000_000_000_000_000);
        assert_eq!(compute_deadline(now.timestamp(), huge, now), None);
        assert_eq!(compute_deadline(i64::MAX, W, now), None);
        assert_eq!(compute_deadline(i64::MIN, W, now), None);
        assert_eq!(compute_deadline(now.timestamp(), Duration::from_secs(u64::MAX), now), None);
    }

    #[tokio::test]
    async fn test_arm_ignores_unrepresentable_timing() {
        let (mut countdown, _rx) = Countdown::new();
        countdown.arm(T, W, at(T)).unwrap();
        let before = countdown.state();

        assert_eq!(countdown.arm(i64::MAX, W, at(T)), None);
        assert_eq!(countdown.state(), before);
        assert_eq!(countdown.arm(T, Duration::from_secs(u64::MAX), at(T)), None);
        assert_eq!(countdown.deadline(), Some(at(T + 300)));
    }

    #[tokio::test]
    async fn test_expires_once_past_deadline() {
        let (mut countdown, _rx) = Countdown::new();
        let now = at(T + 300 - 5);
        countdown.arm(T, W, now);
        assert_eq!(
            countdown.remaining(now),
            Some(Duration::from_secs(5))
        );

        assert!(!countdown.observe(at(T + 300 - 1)));
        assert!(countdown.observe(at(T + 300 + 1)));
        assert_eq!(countdown.state(), CountdownState::Expired);
        assert!(!countdown.observe(at(T + 300 + 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_and_rearm_discards_stale_expiry() {
        let (mut countdown, mut rx) = Countdown::new();
        let now = Utc::now();
        let last_action = now.timestamp();

        countdown.arm(last_action, Duration::from_secs(60), now);
        // re-arming mid-countdown pushes the deadline out
        countdown.arm(last_action + 30, Duration::from_secs(60), now);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.epoch, 2);
        assert!(countdown.on_expired(fired));
        assert!(countdown.is_expired());
        assert!(!countdown.on_expired(CountdownExpired { epoch: 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let (mut countdown, _rx) = Countdown::new();
        countdown.arm(T, W, at(T));
        countdown.cancel();
        assert_eq!(countdown.state(), CountdownState::Idle);
        assert_eq!(countdown.remaining(at(T)), None);
        assert!(!countdown.on_expired(CountdownExpired { epoch: 1 }));
    }
}
