/// Error taxonomy for the sand table motion stack
///
/// Every rejection is raised before anything is written to the device, except
/// the two transport variants which are reported after a send was attempted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("No connection to the table controller")]
    TransportUnavailable,

    #[error("Write to the table controller failed: {0}")]
    TransportWriteFailure(String),

    #[error("Point at radius {radius_mm:.2} mm is outside the drawable workspace ({inner_mm} - {outer_mm} mm)")]
    WorkspaceViolation {
        radius_mm: f64,
        inner_mm: f64,
        outer_mm: f64,
    },

    #[error("Move would exceed ±{limit} in-out steps (current: {current}, move: {requested})")]
    StepLimitExceeded {
        current: i32,
        requested: i32,
        limit: i32,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Previous move is still settling")]
    MoveInProgress,

    #[error("No move to undo, or the last move was already undone")]
    NothingToUndo,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MotionError {
    /// Transport errors leave the bookkeeping intact, everything else rejects the move.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MotionError::TransportUnavailable | MotionError::TransportWriteFailure(_)
        )
    }
}

pub type MotionResult<T> = std::result::Result<T, MotionError>;
