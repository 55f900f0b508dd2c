//! The stable error taxonomy shared by every compiler stage.
//!
//! Every variant renders as `"<Category> error at <line>:<col>: <message>"`
//! so that tooling built on top of `blochc` can match on the category word
//! without parsing the rest of the message.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorLoc {
    pub line: usize,
    pub column: usize,
}

impl ErrorLoc {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for ErrorLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlochError {
    #[error("Lexical error at {loc}: {message}")]
    Lexical { loc: ErrorLoc, message: String },

    #[error("Parse error at {loc}: {message}")]
    Parse { loc: ErrorLoc, message: String },

    #[error("Semantic error at {loc}: {message}")]
    Semantic { loc: ErrorLoc, message: String },

    #[error("Runtime error at {loc}: {message}")]
    Runtime { loc: ErrorLoc, message: String },

    #[error("Generic error: {message}")]
    Generic { message: String },
}

impl BlochError {
    pub fn lexical(line: usize, column: usize, message: impl Into<String>) -> Self {
        BlochError::Lexical {
            loc: ErrorLoc::new(line, column),
            message: message.into(),
        }
    }

    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        BlochError::Parse {
            loc: ErrorLoc::new(line, column),
            message: message.into(),
        }
    }

    pub fn semantic(line: usize, column: usize, message: impl Into<String>) -> Self {
        BlochError::Semantic {
            loc: ErrorLoc::new(line, column),
            message: message.into(),
        }
    }

    pub fn runtime(line: usize, column: usize, message: impl Into<String>) -> Self {
        BlochError::Runtime {
            loc: ErrorLoc::new(line, column),
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        BlochError::Generic {
            message: message.into(),
        }
    }
}

pub type BlochResult<T> = Result<T, BlochError>;
