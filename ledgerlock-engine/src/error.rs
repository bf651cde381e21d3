//! Engine error types.
//!
//! Hard errors here mean the run itself could not proceed (storage
//! failure, broken preconditions). Per-record failures inside a run are
//! never raised — they accumulate in the progress report's error list
//! and the run continues; only rotation treats a non-zero failure count
//! as grounds to roll back.

use ledgerlock_crypto::CryptoError;
use ledgerlock_session::SessionError;
use ledgerlock_storage::StorageError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rotation precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
