/// Error taxonomy for the service.
///
/// The session store itself never produces these; absence is a normal
/// return value there. They arise at the orchestration and HTTP boundaries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The referenced session does not exist or has expired.
    #[error("session not found")]
    NotFound,

    /// Malformed caller input, rejected before any session mutation.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A remote model call or the frame source failed (network error,
    /// timeout, unusable response).
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Error::Upstream(msg.into())
    }
}
