use thiserror::Error;

/// Core error types for rampart
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No admin entry could be resolved. Compiling a default-deny ruleset
    /// without an operator allowlist would lock everyone out.
    #[error("admin allowlist is empty: no entry in the admin source resolved to an address")]
    AdminSetEmpty,

    /// Container runtime enumeration failed
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// The internal model cannot be rendered into a ruleset
    #[error("render error: {0}")]
    Render(String),

    /// The external restore mechanism reported failure
    #[error("restore error: {message}")]
    Restore {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
