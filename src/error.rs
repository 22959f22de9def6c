use thiserror::Error;

/// Frame-fatal outcomes. Anything not listed here (notably a ledger failure)
/// is reported inside the frame result instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Detector unreachable or its output unreadable.
    #[error("processing failed: {0}")]
    Upstream(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The feed has not returned to idle since its previous frame.
    #[error("feed {0} is not idle")]
    Busy(String),
}

impl FrameError {
    /// Stable short code for callers that map errors onto a transport status.
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::Upstream(_) => "upstream_unavailable",
            FrameError::MalformedInput(_) => "malformed_input",
            FrameError::Busy(_) => "feed_busy",
        }
    }
}
