use thiserror::Error;
use vigil_store::StoreError;

/// Failure to start or talk to the debugger.
#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("control plane failed to start: {0}")]
    Startup(String),

    #[error("control plane is no longer running")]
    ControlPlaneGone,
}

/// A request the server could not satisfy. The `Display` text is sent to the
/// client verbatim as the `message` of an `error` reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("Breakpoint with the specified ID does not exist.")]
    NotFound,

    #[error("{0}")]
    Persistence(&'static str),
}

pub(crate) const INVALID_JSON: &str = "Invalid JSON body.";
pub(crate) const INVALID_TYPE: &str = "Invalid message type.";
pub(crate) const MISSING_LOCATION: &str = "Missing file or line to insert a breakpoint on.";
pub(crate) const MALFORMED_LOCATION: &str = "Malformed file or line to insert a breakpoint on.";
pub(crate) const MALFORMED_EXPRESSIONS: &str = "Expressions must be supplied as an array of strings.";
pub(crate) const MALFORMED_CONDITION: &str = "Condition must be supplied as a string.";
pub(crate) const MALFORMED_ID: &str = "Breakpoint ID not specified or not an integer.";
pub(crate) const AUTHENTICATION_FAILED: &str = "Authentication failed.";
pub(crate) const PERSIST_FAILED: &str = "Failed to persist breakpoint.";
pub(crate) const REMOVE_FAILED: &str = "Failed to remove breakpoint.";
pub(crate) const READ_HITS_FAILED: &str = "Failed to read hits.";
pub(crate) const READ_BREAKPOINTS_FAILED: &str = "Failed to read breakpoints.";
