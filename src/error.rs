//! The error taxonomy for the validator message handler.
//!
//! None of these are propagated to callers of the public handler API: they
//! exist so the dispatch boundary can log at the right severity and so unit
//! tests can assert on *why* a handler declined to advance state.

use thiserror::Error;

/// Errors produced while processing a single consensus message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidatorError {
    /// Wire or block decode failure. Never advances state.
    #[error("codec error: {0}")]
    Codec(String),

    /// Wrong leader key, wrong view, or an invalid leader signature.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Header, block, or aggregate-signature verification failed.
    #[error("verification error: {0}")]
    Verify(String),

    /// The verified-block channel could not accept a finalized block.
    /// Finalization itself is not rolled back; the drain continues.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// The injected fault model instructed the handler to drop this message.
    #[error("fault injection dropped message: {0}")]
    AttackInjection(String),
}

impl ValidatorError {
    /// The log severity assigned to this error class.
    pub fn log_level(&self) -> log::Level {
        match self {
            Self::Codec(_) => log::Level::Info,
            Self::Auth(_) => log::Level::Debug,
            Self::Verify(_) => log::Level::Warn,
            Self::Delivery(_) => log::Level::Warn,
            Self::AttackInjection(_) => log::Level::Debug,
        }
    }

    /// Logs this error at its assigned severity and discards it: handlers
    /// never propagate errors to their callers.
    pub fn log_and_drop(self) {
        log::log!(self.log_level(), "{}", self);
    }
}
