//! Session-level errors
//!
//! Filter-level rejections (bad accuracy, stale fixes, outliers) are not errors; they are silent no-ops.
//! Only the conditions below are surfaced, and every one of them is recoverable by the user retrying,
//! re-granting a permission, or resetting the session.
use crate::navigation::NavPhase;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NavError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location is off")]
    ProviderDisabled,

    #[error("No usable location samples, try again")]
    NoSamples,

    #[error("Cannot save a location yet ({phase})")]
    NotReady { phase: NavPhase },

    #[error("Navigation session is closed")]
    SessionClosed,

    #[error("Navigation session is busy")]
    SessionBusy,

    #[error("Invalid configuration: {0}")]
    Config(String),
}
