//! Thin convenience wrapper over `BlochError::Semantic`.

use crate::ast::Span;
use crate::error::BlochError;

pub fn semantic_err(span: Span, message: impl Into<String>) -> BlochError {
    BlochError::semantic(span.line, span.column, message)
}
