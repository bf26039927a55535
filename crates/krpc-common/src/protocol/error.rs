use std::fmt;
use thiserror::Error;

/// A procedure-level failure reported by the server.
///
/// Rendered as `"{service}.{name}: {description}"`, dropping whichever of
/// service/name the server left empty, followed by the server stack trace
/// when one was sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcErrorDetails {
    pub service: Option<String>,
    pub name: Option<String>,
    pub description: String,
    pub stack_trace: Option<String>,
}

impl RpcErrorDetails {
    /// Builds details from the raw protocol fields, treating empty strings as absent.
    pub fn new(service: &str, name: &str, description: &str, stack_trace: &str) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            service: non_empty(service),
            name: non_empty(name),
            description: description.to_string(),
            stack_trace: non_empty(stack_trace),
        }
    }
}

impl From<&crate::protocol::messages::Error> for RpcErrorDetails {
    fn from(error: &crate::protocol::messages::Error) -> Self {
        Self::new(
            &error.service,
            &error.name,
            &error.description,
            &error.stack_trace,
        )
    }
}

impl fmt::Display for RpcErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.service, &self.name) {
            (Some(service), Some(name)) => write!(f, "{}.{}: ", service, name)?,
            (Some(prefix), None) | (None, Some(prefix)) => write!(f, "{}: ", prefix)?,
            (None, None) => {}
        }
        f.write_str(&self.description)?;
        if let Some(trace) = &self.stack_trace {
            write!(f, "\nServer stack trace:\n{}", trace)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum KrpcError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected to server, call connect first")]
    NotConnected,

    #[error("{0}")]
    Rpc(RpcErrorDetails),

    #[error("argument for parameter \"{name}\" must be a {expected} -- got {actual}")]
    ArgumentType {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("there are both positional and keyword arguments for parameter \"{0}\"")]
    AmbiguousArgument(String),

    #[error("missing argument for parameter \"{0}\"")]
    MissingArgument(String),

    #[error("keyword arguments for non existing parameters: {}", .0.join(", "))]
    UnknownKeyword(Vec<String>),

    #[error("wrong number of arguments ({actual} for {})", range_text(.required, .max))]
    ArgumentCount {
        actual: usize,
        required: usize,
        max: usize,
    },

    #[error("Failed to coerce value {value} to type {ty}")]
    Coercion { value: String, ty: String },

    #[error("Malformed varint")]
    MalformedVarint,

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Enumeration {0} has no values bound")]
    EnumNotBound(String),

    #[error("Cannot stream {0}")]
    UnsupportedStream(String),

    #[error("Stream has been removed")]
    StreamRemoved,

    #[error("Unknown procedure: {0}")]
    UnknownProcedure(String),

    #[error("Invalid procedure name: {0}")]
    InvalidProcedureName(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn range_text(required: &usize, max: &usize) -> String {
    if required == max {
        required.to_string()
    } else {
        format!("{}..{}", required, max)
    }
}

impl From<RpcErrorDetails> for KrpcError {
    fn from(details: RpcErrorDetails) -> Self {
        KrpcError::Rpc(details)
    }
}

pub type Result<T> = std::result::Result<T, KrpcError>;
