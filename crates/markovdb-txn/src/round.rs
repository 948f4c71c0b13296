use std::fmt;

/// Per-partition progress of one execution round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundState {
    #[default]
    Uninitialized,
    /// Bookkeeping reset; work units may be queued.
    Initialized,
    /// Batch fixed, dependency latch armed.
    Started,
    /// Every expected dependency arrived.
    Finished,
}

impl RoundState {
    /// A new round may begin from here.
    pub fn can_init(self) -> bool {
        matches!(self, RoundState::Uninitialized | RoundState::Finished)
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundState::Uninitialized => "UNINITIALIZED",
            RoundState::Initialized => "INITIALIZED",
            RoundState::Started => "STARTED",
            RoundState::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}
