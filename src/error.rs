//! Typed errors for the rotation core.
//!
//! Most functions in this crate return `anyhow::Result`. The variants here are
//! the ones a caller may need to tell apart, so they are raised as
//! `RotationError` and recovered with `err.downcast_ref::<RotationError>()`.

use crate::catalog::TrackId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RotationError {
    /// A track id that was explicitly requested does not resolve in the catalog.
    #[error("Track not found in catalog: {0}")]
    TrackNotFound(TrackId),

    /// Queue state with a mix of null and non-null "current" fields.
    #[error("Inconsistent queue state: {0}")]
    InconsistentState(String),

    /// Catalog write rejected (bad duration, negative boost increment, ...).
    #[error("Invalid track: {0}")]
    InvalidTrack(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_survives_anyhow_round_trip() {
        let err: anyhow::Error = RotationError::TrackNotFound(42).into();
        let err = err.context("Failed to start rotation");

        assert_eq!(
            err.downcast_ref::<RotationError>(),
            Some(&RotationError::TrackNotFound(42))
        );
        assert!(format!("{err:#}").contains("Track not found in catalog: 42"));
    }
}
