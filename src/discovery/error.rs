//! Error types for the discovery engine.

use std::time::Duration;

use thiserror::Error;

use crate::http_client::ClientError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// Global cooldown became active mid-traversal, which halts discovery
    /// across *all* facets, not just the current one.
    #[error("captcha cooldown active, resume after {cooldown_until:?}")]
    Captcha { cooldown_until: Duration },

    #[error("could not parse issue url: {url}")]
    InvalidIssueUrl { url: String },

    #[error("batch discovery cancelled by shutdown signal")]
    Cancelled,

    #[error("facet {0} is not splittable in its current state or shape")]
    NotSplittable(i64),
}

impl DiscoveryError {
    #[must_use]
    pub fn from_client(err: ClientError) -> Self {
        if let ClientError::Captcha { cooldown_until } = err {
            Self::Captcha { cooldown_until }
        } else {
            Self::Client(err)
        }
    }
}
