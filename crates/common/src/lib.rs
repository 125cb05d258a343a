//! Shared types for the stream proxy workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
