use thiserror::Error;

/// Why an expression did not produce a value.
///
/// Errors are cheap to clone so that a failed compilation can be cached and
/// handed out to every later caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("Compilation error: {0}")]
    Compile(String),

    #[error("Safety violation: {0}")]
    Safety(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Evaluation error: step limit of {0} instructions exceeded")]
    StepLimit(u64),
}

impl SandboxError {
    /// The inert value recorded in place of a result, e.g.
    /// `<Safety violation: call to 'print' is not allowed>`.
    pub fn marker(&self) -> String {
        format!("<{self}>")
    }

    pub fn is_safety_violation(&self) -> bool {
        matches!(self, SandboxError::Safety(_))
    }

    pub(crate) fn compile(message: impl Into<String>) -> Self {
        SandboxError::Compile(message.into())
    }

    pub(crate) fn safety(message: impl Into<String>) -> Self {
        SandboxError::Safety(message.into())
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        SandboxError::Evaluation(message.into())
    }

    pub(crate) fn type_error(message: impl std::fmt::Display) -> Self {
        SandboxError::Evaluation(format!("TypeError: {message}"))
    }

    pub(crate) fn value_error(message: impl std::fmt::Display) -> Self {
        SandboxError::Evaluation(format!("ValueError: {message}"))
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;
