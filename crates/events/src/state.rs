//! Per-message processing state machine.

/// Where a delivered message is in its handling.
///
/// State transitions:
/// ```text
/// Received ──┬──► Processing ──► Handled
///            └──► PermanentlyFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageState {
    /// Delivered, payload not yet decoded.
    #[default]
    Received,

    /// Payload decoded, line items being applied.
    Processing,

    /// Every line item was attempted (terminal state). Individual items may
    /// still have failed.
    Handled,

    /// The payload could not be decoded; stock was not touched (terminal state).
    PermanentlyFailed,
}

impl MessageState {
    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: MessageState) -> bool {
        matches!(
            (self, next),
            (MessageState::Received, MessageState::Processing)
                | (MessageState::Received, MessageState::PermanentlyFailed)
                | (MessageState::Processing, MessageState::Handled)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageState::Handled | MessageState::PermanentlyFailed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Received => "received",
            MessageState::Processing => "processing",
            MessageState::Handled => "handled",
            MessageState::PermanentlyFailed => "permanently-failed",
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
