#[derive(Debug)]
pub enum EngineError {
    InvalidInput(String),
    NotFound(String),
    /// Deliberately carries no detail about why the credential failed.
    Unauthorized,
    Conflict(&'static str),
    LimitExceeded(&'static str),
    Internal(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::Unauthorized => write!(f, "invalid owner key"),
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Internal(msg) => write!(f, "internal error: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
