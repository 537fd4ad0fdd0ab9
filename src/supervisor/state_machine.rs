use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// Lifecycle of one server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl State {
    /// `Starting` or `Running`: the server accepts a stop command.
    pub fn is_live(self) -> bool {
        matches!(self, State::Starting | State::Running)
    }

    /// Any state other than `Stopped`: a process exists for the session.
    pub fn is_active(self) -> bool {
        !matches!(self, State::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Stopped => "stopped",
            State::Starting => "starting",
            State::Running => "running",
            State::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(State, State),
}

/// Session state shared between the supervisor and the output monitor.
///
/// Observers follow changes through [`StateMachine::subscribe`].
pub struct StateMachine {
    tx: watch::Sender<State>,
}

impl Default for StateMachine {
    fn default() -> Self {
        let (tx, _) = watch::channel(State::Stopped);
        Self { tx }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> State {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.tx.subscribe()
    }

    pub fn can_transition(from: State, to: State) -> bool {
        matches!(
            (from, to),
            (State::Stopped, State::Starting)
                | (State::Starting, State::Running)
                | (State::Starting, State::Stopping)
                | (State::Starting, State::Stopped)
                | (State::Running, State::Stopping)
                | (State::Running, State::Stopped)
                | (State::Stopping, State::Stopped)
        )
    }

    pub fn transition(&self, to: State) -> Result<(), TransitionError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if Self::can_transition(*state, to) {
                tracing::info!("State transition: {:?} -> {:?}", state, to);
                *state = to;
                true
            } else {
                result = Err(TransitionError::InvalidTransition(*state, to));
                false
            }
        });
        result
    }

    /// Terminal transition after the process is gone. Idempotent.
    pub fn finish(&self) {
        self.tx.send_if_modified(|state| {
            if *state == State::Stopped {
                return false;
            }
            tracing::info!("State transition: {:?} -> {:?}", state, State::Stopped);
            *state = State::Stopped;
            true
        });
    }

    /// Wait until the state satisfies `pred`, returning the matching state.
    pub async fn wait_for(&self, pred: impl Fn(State) -> bool) -> State {
        let mut rx = self.subscribe();
        let reached = match rx.wait_for(|s| pred(*s)).await {
            Ok(s) => *s,
            // Sender is owned by self, so the channel cannot close while we borrow it.
            Err(_) => self.state(),
        };
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        let sm = StateMachine::new();
        assert_eq!(sm.state(), State::Stopped);
        assert!(sm.transition(State::Starting).is_ok());
        assert!(sm.transition(State::Running).is_ok());
        assert!(sm.transition(State::Stopping).is_ok());
        assert!(sm.transition(State::Stopped).is_ok());
    }

    #[test]
    fn invalid_transition() {
        let sm = StateMachine::new();
        // cannot go directly from Stopped -> Running
        let res = sm.transition(State::Running);
        assert_eq!(
            res,
            Err(TransitionError::InvalidTransition(State::Stopped, State::Running))
        );
        assert_eq!(sm.state(), State::Stopped);
    }

    #[test]
    fn running_cannot_repeat() {
        let sm = StateMachine::new();
        sm.transition(State::Starting).unwrap();
        sm.transition(State::Running).unwrap();
        assert!(sm.transition(State::Running).is_err());
    }

    #[test]
    fn crash_during_startup_reaches_stopped() {
        let sm = StateMachine::new();
        sm.transition(State::Starting).unwrap();
        sm.finish();
        assert_eq!(sm.state(), State::Stopped);
        // 두 번 호출해도 문제 없음
        sm.finish();
        assert_eq!(sm.state(), State::Stopped);
    }

    #[test]
    fn liveness() {
        assert!(State::Starting.is_live());
        assert!(State::Running.is_live());
        assert!(!State::Stopping.is_live());
        assert!(State::Stopping.is_active());
        assert!(!State::Stopped.is_active());
    }

    #[tokio::test]
    async fn wait_for_observes_change() {
        let sm = std::sync::Arc::new(StateMachine::new());
        sm.transition(State::Starting).unwrap();
        let waiter = {
            let sm = sm.clone();
            tokio::spawn(async move { sm.wait_for(|s| s == State::Running).await })
        };
        sm.transition(State::Running).unwrap();
        assert_eq!(waiter.await.unwrap(), State::Running);
    }
}
