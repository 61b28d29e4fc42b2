use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Backing store unreachable; the pass is abandoned.
    StorageUnavailable(String),
    /// Store returned rows that could not be decoded.
    MalformedData(String),
    LimitExceeded(&'static str),
    /// A per-day worker panicked or was cancelled.
    WorkerFailed(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
            EngineError::MalformedData(e) => write!(f, "malformed data: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WorkerFailed(e) => write!(f, "validation worker failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(e) => EngineError::StorageUnavailable(e),
            StoreError::Malformed(e) => EngineError::MalformedData(e),
        }
    }
}
