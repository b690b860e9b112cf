use derive_more::{Display, From};

use crate::event::Position;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Display, From)]
pub enum Error {
    /// The tokenizer found a syntax error. Line and column point at the offending markup.
    #[display("{line}:{column}: {message}")]
    MalformedInput {
        line: u64,
        column: u64,
        message: String,
    },
    /// Read failure from the byte source or write failure on the sink
    #[from]
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
    /// Errors from the arrow crate while formatting table values
    #[from]
    #[display("Arrow error: {_0}")]
    Arrow(arrow::error::ArrowError),
    /// Errors from the Serde YAML crate during configuration parsing
    #[from]
    #[display("YAML error: {_0}")]
    Yaml(serde_yaml::Error),
    /// A buffer could not grow to the requested size
    #[display("{_0}")]
    OutOfMemory(String),
    /// The event queue was filled past its capacity. This is always a bug.
    #[display("{_0}")]
    InternalOverflow(String),
    /// Misconfiguration detected at call entry, e.g. mismatched table and mask shapes
    #[display("Invalid argument: {_0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn malformed(position: Position, message: impl Into<String>) -> Self {
        Error::MalformedInput {
            line: position.line,
            column: position.column,
            message: message.into(),
        }
    }

    /// Returns the `(line, column)` of a malformed-input error.
    pub fn position(&self) -> Option<Position> {
        match self {
            Error::MalformedInput { line, column, .. } => Some(Position {
                line: *line,
                column: *column,
            }),
            _ => None,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Arrow(e) => Some(e),
            Error::Yaml(e) => Some(e),
            _ => None,
        }
    }
}
