use thiserror::Error;

/// Failures surfaced by the coordination core. None of them are fatal to the
/// process; each one is scoped to the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("{0}")]
    Validation(String),

    #[error("the device is already watering")]
    AlreadyWatering,

    #[error("no watering schedule configured")]
    NoSchedule,
}

impl CoreError {
    /// True for rejections caused by bad caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidSchedule(_) | Self::Validation(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
