//! Error types for the dispatch engine.
//!
//! # Taxonomy
//!
//! - Missing records (`ProviderNotFound`, `JobNotFound`): a ticker acting on a
//!   stale read skips the record.
//! - `PreconditionFailed`: a conditional write lost a race. Benign; the record
//!   is re-read on the next cycle.
//! - `NoCandidateAvailable`: selection found nobody. Not terminal for a job.
//! - `Storage`: connectivity or backend failure. The only class that
//!   propagates out of a ticker loop.
//!
//! Delivery failures of notifications never surface here; see
//! [`crate::notify::DeliveryError`].

use chrono::{DateTime, Utc};

use crate::models::{JobId, ProviderId};

/// The result type used throughout u-dispatch.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors produced by dispatch and availability operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The provider record no longer exists.
    #[error("provider not found: {0}")]
    ProviderNotFound(ProviderId),

    /// The job request record no longer exists.
    #[error("job request not found: {0}")]
    JobNotFound(JobId),

    /// A conditional write's guard did not match the stored record.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// No eligible, non-busy provider could be found.
    #[error("no candidate available for skill '{skill}'")]
    NoCandidateAvailable {
        /// The requested skill.
        skill: String,
    },

    /// The provider is suspended and cannot go online.
    #[error("provider {provider_id} is suspended until {until}")]
    Suspended {
        /// The suspended provider.
        provider_id: ProviderId,
        /// When the suspension lifts.
        until: DateTime<Utc>,
    },

    /// A weekly schedule without a single usable window.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    /// Creates a storage error without an underlying cause.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Whether the error is a record that vanished between read and write.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ProviderNotFound(_) | Self::JobNotFound(_))
    }

    /// Whether the error is an expected per-record outcome rather than a
    /// fault. Tickers log benign failures at debug level.
    ///
    /// Storage and configuration failures are not benign.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::ProviderNotFound(_)
                | Self::JobNotFound(_)
                | Self::PreconditionFailed(_)
                | Self::NoCandidateAvailable { .. }
        )
    }
}

impl From<::config::ConfigError> for DispatchError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
