//! The `utils` module provides shared definitions used across the crate:
//! the error taxonomy and logging setup.

pub mod error;
pub mod logging;

pub use error::{BrokerError, FrameError};

#[cfg(test)]
mod tests;
