use thiserror::Error;

/// Failure taxonomy shared by the engine and the model boundary.
///
/// Domain violations propagate out to the caller unmodified; the engine
/// makes no attempt to recover from them. `Ssa` marks an internal
/// invariant violation during simulation (for example the selector ladder
/// losing the draw to round-off); drivers may treat it as end of
/// simulation when the propensity mass is exhausted.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("operation not supported: {0}")]
    OperationNotSupported(String),
    #[error("ssa error: {0}")]
    Ssa(String),
    #[error("model i/o error: {0}")]
    ModelIo(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("validation failure: {0}")]
    ValidationFailure(String),
}

impl Error {
    pub(crate) fn invalid_value(msg: impl Into<String>) -> Self {
        Error::InvalidValue(msg.into())
    }

    pub(crate) fn ssa(msg: impl Into<String>) -> Self {
        Error::Ssa(msg.into())
    }

    pub(crate) fn model_io(msg: impl Into<String>) -> Self {
        Error::ModelIo(msg.into())
    }

    pub(crate) fn invalid_model(msg: impl Into<String>) -> Self {
        Error::InvalidModel(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
