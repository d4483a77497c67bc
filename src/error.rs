use std::error::Error as StdError;
use std::fmt;

/// Error taxonomy for the whole request path. Stage code maps lower-level
/// failures into one of these kinds at the boundary where they occur.
#[derive(Debug)]
pub enum Error {
    /// The inbound payload failed structural validation.
    InputRejected(String),
    /// Schema introspection against the restaurant database failed.
    SchemaUnavailable(String),
    /// The validation stage rejected the query without producing a usable fix.
    QueryInvalid(String),
    /// The database refused or failed the generated query.
    QueryExecutionFailed(String),
    /// The hosted model call failed, or its reply did not match the declared shape.
    UpstreamModelFailure(String),
    /// The outbound WhatsApp post failed. `timeout` separates a deadline
    /// expiry from a generic request failure so the handler can answer 408 vs 500.
    TransportFailure { message: String, timeout: bool },
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Error::TransportFailure {
            message: message.into(),
            timeout: false,
        }
    }

    pub fn transport_timeout(message: impl Into<String>) -> Self {
        Error::TransportFailure {
            message: message.into(),
            timeout: true,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InputRejected(msg) => write!(f, "input rejected: {}", msg),
            Error::SchemaUnavailable(msg) => write!(f, "schema unavailable: {}", msg),
            Error::QueryInvalid(msg) => write!(f, "query invalid: {}", msg),
            Error::QueryExecutionFailed(msg) => write!(f, "query execution failed: {}", msg),
            Error::UpstreamModelFailure(msg) => write!(f, "model failure: {}", msg),
            Error::TransportFailure { message, timeout } => {
                if *timeout {
                    write!(f, "transport timeout: {}", message)
                } else {
                    write!(f, "transport failure: {}", message)
                }
            }
        }
    }
}

impl StdError for Error {}
