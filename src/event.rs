//! Completion event signalled by `execute`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventState {
    #[default]
    Pending,
    Ready,
}

/// Single terminal completion signal. There are no partial-completion states.
#[derive(Debug, Default)]
pub struct Event {
    state: EventState,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> EventState {
        self.state
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == EventState::Ready
    }

    #[inline]
    pub fn set_state(&mut self, state: EventState) {
        self.state = state;
    }

    /// Re-arm the event before reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.state = EventState::Pending;
    }
}
