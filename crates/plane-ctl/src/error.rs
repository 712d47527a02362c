use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    /// The vehicle did not report the wanted mode within the wait budget.
    #[error("mode {mode} not reached after {waited:?}")]
    ModeTimeout { mode: String, waited: Duration },

    /// A second override session was opened on a vehicle that already has one.
    #[error("override session already active on this vehicle")]
    OverrideSessionConflict,

    #[error("parameter {name} unavailable")]
    ParameterUnavailable { name: String },

    #[error("interrupted by operator")]
    ExternalInterrupt,

    #[error("vehicle not armable after {waited:?}")]
    NotArmable { waited: Duration },

    #[error("vehicle did not arm within {waited:?}")]
    ArmTimeout { waited: Duration },

    #[error("vehicle link: {0:#}")]
    Link(#[from] anyhow::Error),
}

impl ControlError {
    /// Errors after which no further actuation should be attempted at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControlError::ExternalInterrupt | ControlError::OverrideSessionConflict)
    }
}
