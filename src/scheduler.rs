use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::game::Action;
use crate::types::RoomCode;

/// Wall-clock milliseconds since the Unix epoch, the unit of every published timestamp.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Absolute timestamp `delay` from `now`.
pub fn deadline(now: u64, delay: Duration) -> u64 {
    now + delay.as_millis() as u64
}

/// Time until the next transition once a round starts: guessing time plus the reveal pause.
pub fn round_delay(timer_secs: u64, reveal: Duration) -> Duration {
    Duration::from_secs(timer_secs) + reveal
}

struct ArmedTimer {
    token: u64,
    task: JoinHandle<()>,
}

/// At most one pending transition timer per room.
///
/// A timer reports back as [`Action::TimerFired`] carrying its token; only
/// the token currently armed for the room is honoured, so a timer that was
/// cancelled or replaced never runs its transition even if its message was
/// already queued.
pub struct RoundTimers {
    armed: HashMap<RoomCode, ArmedTimer>,
    next_token: u64,
    action_tx: mpsc::Sender<Action>,
}

impl RoundTimers {
    pub fn new(action_tx: mpsc::Sender<Action>) -> Self {
        Self {
            armed: HashMap::new(),
            next_token: 1,
            action_tx,
        }
    }

    /// Arms the room's timer, replacing any previous one.
    pub fn arm(&mut self, code: &str, delay: Duration) -> u64 {
        self.cancel(code);

        let token = self.next_token;
        self.next_token += 1;

        let tx = self.action_tx.clone();
        let room_code = code.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Action::TimerFired { room_code, token }).await;
        });

        self.armed.insert(code.to_string(), ArmedTimer { token, task });
        token
    }

    /// Consumes the firing if `token` is the one armed for `code`.
    pub fn take(&mut self, code: &str, token: u64) -> bool {
        match self.armed.get(code) {
            Some(timer) if timer.token == token => {
                self.armed.remove(code);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, code: &str) -> bool {
        match self.armed.remove(code) {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, code: &str) -> bool {
        self.armed.contains_key(code)
    }
}
