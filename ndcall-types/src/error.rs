#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("type syntax error: {message}")]
#[diagnostic(code(ndcall::type_syntax))]
#[allow(unused_assignments)]
pub struct ParseError {
    pub message: String,
    #[label]
    pub span: SourceSpan,
}

impl ParseError {
    pub(crate) fn at(message: impl Into<String>, start: usize, len: usize) -> Self {
        ParseError {
            message: message.into(),
            span: SourceSpan::new(start.into(), len),
        }
    }
}
