//! API key pool for RapidAPI-fronted providers
//!
//! Rotates through a fixed set of subscriber keys to spread requests across
//! per-key rate limits and daily quotas. The pool tracks which key is active
//! and how many successful requests each key has served; the rotation policy
//! turns each upstream result into a retry decision; the executor runs the
//! bounded attempt loop.
//!
//! Attempt lifecycle:
//! 1. Executor takes the active key (usage-count mode first skips saturated keys)
//! 2. Credential headers are injected and the request is sent
//! 3. 429/403, the quota marker, or a transport failure → rotate and retry
//! 4. Any other non-2xx → abort immediately, no further attempts
//! 5. 2xx → record usage; a low remaining budget rotates for the next call
//! 6. Attempt bound reached → `AllKeysExhausted`

pub mod error;
pub mod executor;
pub mod policy;
pub mod pool;

pub use error::{Error, Result};
pub use executor::RetryExecutor;
pub use policy::{AttemptOutcome, RotateReason, RotationMode, RotationPolicy};
pub use pool::{KeyLease, KeyPool};
