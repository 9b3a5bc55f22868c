use thiserror::Error;

/// Crate-wide error type.
///
/// Every variant is unrecoverable at the point it is raised: the core never
/// retries, it hands the error back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Dimension mismatch in a tensor op, a loss computation, or a label range
    /// violation.
    #[error("shape error: {0}")]
    Shape(String),
    /// An operation was called in the wrong order (e.g. backward without a
    /// matching forward).
    #[error("state error: {0}")]
    State(String),
    /// Invalid hyperparameters or unknown component names.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shape mismatch between two operands of `op`.
    pub(crate) fn mismatch(op: &str, left: &[usize], right: &[usize]) -> Self {
        Error::Shape(format!("{op}: {left:?} vs {right:?}"))
    }

    pub(crate) fn no_forward() -> Self {
        Error::State("no forward pass recorded".to_owned())
    }
}
