//! Error types for the rate gate.

use std::time::Duration;

use thiserror::Error;

/// Errors the rate gate can raise from [`super::RateGate::acquire`].
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum RateGateError {
    /// A global CAPTCHA cooldown is active; no request was issued.
    #[error("global cooldown active, retry after {remaining:?}")]
    Cooldown {
        /// How long until the cooldown lifts, from the moment this error was raised.
        remaining: Duration,
    },
}
