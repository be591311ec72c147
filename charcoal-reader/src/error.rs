//! Define the `Location`, `ParseError` and `ParseResult` types.

#![macro_use]

use core::fmt;
use thiserror::Error;

/// The source position of a token or error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    /// File name, as reported by the most recent linemarker.
    pub file: String,
    /// 1-based line number.
    pub line: usize,
}

impl Location {
    /// A location in `file` at `line`.
    pub fn new(file: &str, line: usize) -> Self {
        Self {
            file: file.to_string(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// An error from the lexer, parser or elaborator.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{location}: {message}")]
pub struct ParseError {
    /// Where the problem is.
    pub location: Location,
    /// What the problem is.
    pub message: String,
}

/// Result of a front-end operation.
pub type ParseResult<T> = Result<T, ParseError>;

/// Create an `Err(ParseError)` from a location and `format!` arguments.
macro_rules! err {
    ( $loc:expr, $msg:expr ) => {
        Err($crate::error::ParseError {
            location: $loc.clone(),
            message: $msg.to_string(),
        })
    };

    ( $loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        Err($crate::error::ParseError {
            location: $loc.clone(),
            message: format!( $fmt, $( $arg ),+ ),
        })
    };
}
