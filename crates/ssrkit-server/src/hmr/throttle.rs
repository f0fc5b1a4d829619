/// Where a throttled publisher stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    /// Nothing published yet
    Idle,
    /// An event is waiting for its window to close
    Pending,
    /// The last pending event was delivered
    Fired,
}

/// Trailing-edge throttle: every publish restarts the window, and only the
/// most recent event is delivered once the window closes quietly.
///
/// The timer itself lives with the owner. `arm` hands out an epoch the
/// timer must present to `fire`; a timer from a superseded arm gets
/// nothing back, so at most one delivery happens per quiet window.
#[derive(Debug)]
pub struct Throttle {
    state: ThrottleState,
    pending: Option<String>,
    epoch: u64,
}

impl Throttle {
    pub fn new() -> Self {
        Self {
            state: ThrottleState::Idle,
            pending: None,
            epoch: 0,
        }
    }

    pub fn state(&self) -> ThrottleState {
        self.state
    }

    /// Records `event` as the one to deliver and returns the epoch of the
    /// timer that should now be running.
    pub fn arm(&mut self, event: String) -> u64 {
        self.pending = Some(event);
        self.state = ThrottleState::Pending;
        self.epoch += 1;
        self.epoch
    }

    /// Called when the timer for `epoch` expires. Returns the event to
    /// deliver, or `None` when the timer was superseded.
    pub fn fire(&mut self, epoch: u64) -> Option<String> {
        if epoch != self.epoch || self.state != ThrottleState::Pending {
            return None;
        }
        self.state = ThrottleState::Fired;
        self.pending.take()
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}
