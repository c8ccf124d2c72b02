use std::fmt;
use std::sync::Mutex;

use tracing::trace;

/// Group-level lifecycle state. There is exactly one `Lifecycle` per supervisor
/// and every state change funnels through [`Lifecycle::try_to_move_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Starting,
    Started,
    Operational,
    Restarting,
    Stopping,
    HardStopping,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            State::Init => "init",
            State::Starting => "starting",
            State::Started => "started",
            State::Operational => "operational",
            State::Restarting => "restarting",
            State::Stopping => "stopping",
            State::HardStopping => "hard-stopping",
            State::Stopped => "stopped",
        };
        write!(f, "{value}")
    }
}

fn transition_allowed(from: State, to: State) -> bool {
    matches!(
        (from, to),
        (State::Init, State::Starting)
            | (State::Starting, State::Started)
            | (State::Starting, State::Stopping)
            | (State::Started, State::Operational)
            | (State::Started, State::Stopping)
            | (State::Started, State::HardStopping)
            | (State::Operational, State::Restarting)
            | (State::Operational, State::Stopping)
            | (State::Operational, State::HardStopping)
            | (State::Restarting, State::Starting)
            | (State::Stopping, State::Stopped)
            | (State::HardStopping, State::Stopped)
    )
}

/// Notified synchronously, in registration order, after every successful
/// transition. Implementations must not call back into the `Lifecycle`.
pub trait LifecycleListener: Send + Sync {
    fn on_transition(&self, from: State, to: State);
}

pub struct Lifecycle {
    state: Mutex<State>,
    listeners: Vec<Box<dyn LifecycleListener>>,
}

impl Lifecycle {
    pub fn new(listeners: Vec<Box<dyn LifecycleListener>>) -> Self {
        Self {
            state: Mutex::new(State::Init),
            listeners,
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock().expect("lifecycle state lock poisoned")
    }

    /// Compare-and-move: succeeds only if the current state legally transitions
    /// to `target`, otherwise leaves the state untouched and returns false.
    /// Listener notification happens under the state lock so concurrent winners
    /// are observed in transition order.
    pub fn try_to_move_to(&self, target: State) -> bool {
        let mut state = self.state.lock().expect("lifecycle state lock poisoned");
        let from = *state;
        if !transition_allowed(from, target) {
            trace!("lifecycle transition {from} -> {target} rejected");
            return false;
        }
        *state = target;
        trace!("lifecycle moved from {from} to {target}");
        for listener in &self.listeners {
            listener.on_transition(from, target);
        }
        true
    }
}
