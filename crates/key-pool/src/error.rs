//! Error types for key pool operations

/// Errors that escape the key pool. Rate limits, quota exhaustion and
/// transport failures are absorbed by rotation and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key pool is empty: at least one API key is required")]
    EmptyPool,

    #[error("All RapidAPI keys failed after {attempts} attempts")]
    AllKeysExhausted { attempts: usize },

    #[error("All RapidAPI keys exhausted, retry in {retry_after_secs}s")]
    CoolingDown { retry_after_secs: u64 },

    #[error("http status {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

/// Result alias for key pool operations.
pub type Result<T> = std::result::Result<T, Error>;
