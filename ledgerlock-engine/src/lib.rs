//! Batch engines for ledgerlock.
//!
//! Three long-running, cursor-resumable engines move a user's records
//! between encryption states:
//!
//! - [`MigrationEngine`] — plaintext to encrypted
//! - [`KeyRotationEngine`] — old key to new key, all-or-nothing at the
//!   metadata level
//! - [`UnencryptionEngine`] — encrypted back to plaintext
//!
//! All three paginate in fixed-size batches, commit each batch as one
//! atomic write, yield to the event loop between batches, and accumulate
//! per-record failures into a progress report instead of aborting. Batch
//! commits are atomic; a whole run is not, so every engine is idempotent
//! and safe to resume from its cursor after a crash.

mod collections;
mod error;
mod migrate;
mod progress;
mod rotate;
mod unencrypt;

pub use error::{EngineError, EngineResult};
pub use migrate::{MigrationEngine, DEFAULT_BATCH_SIZE};
pub use progress::{EngineProgress, EngineStatus, RecordFailure};
pub use rotate::{KeyRotationEngine, RotationOutcome, RotationPhase};
pub use unencrypt::UnencryptionEngine;
