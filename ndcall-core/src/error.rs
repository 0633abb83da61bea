#![forbid(unsafe_code)]

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Where a failure originated in a call: a positional source, the
/// destination, or a keyword argument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgPosition {
    Src(usize),
    Dst,
    Keyword(String),
}

impl fmt::Display for ArgPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgPosition::Src(i) => write!(f, "argument {i}"),
            ArgPosition::Dst => f.write_str("destination"),
            ArgPosition::Keyword(name) => write!(f, "keyword '{name}'"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeMismatch,
    Arity,
    NoMatchingOverload,
    Instantiation,
    Registration,
    Layout,
    Execution,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CallError {
    #[error("`{callable}`: type mismatch at {position}: {message}")]
    #[diagnostic(code(ndcall::type_mismatch))]
    TypeMismatch {
        callable: String,
        position: ArgPosition,
        message: String,
    },

    #[error("`{callable}`: arity error at {position}: {message}")]
    #[diagnostic(code(ndcall::arity))]
    Arity {
        callable: String,
        position: ArgPosition,
        message: String,
    },

    #[error("`{callable}`: no overload accepts ({types}); first rejected at {position}")]
    #[diagnostic(
        code(ndcall::no_matching_overload),
        help("register a kernel for these types or enable promotion in [dispatch]")
    )]
    NoMatchingOverload {
        callable: String,
        types: String,
        position: ArgPosition,
    },

    #[error("`{callable}`: failed to instantiate child: {source}")]
    #[diagnostic(code(ndcall::instantiation))]
    Instantiation {
        callable: String,
        #[source]
        source: Box<CallError>,
    },

    #[error("registration of `{callable}` failed: {message}")]
    #[diagnostic(code(ndcall::registration))]
    Registration { callable: String, message: String },

    #[error("invalid array layout: {message}")]
    #[diagnostic(code(ndcall::layout))]
    Layout { message: String },

    #[error("kernel `{}` failed: {message}", .kernel.as_deref().unwrap_or("<unknown>"))]
    #[diagnostic(code(ndcall::execution))]
    Execution {
        kernel: Option<String>,
        message: String,
    },
}

impl CallError {
    pub fn mismatch(callable: &str, position: ArgPosition, message: impl Into<String>) -> Self {
        CallError::TypeMismatch {
            callable: callable.to_string(),
            position,
            message: message.into(),
        }
    }

    pub fn arity(callable: &str, position: ArgPosition, message: impl Into<String>) -> Self {
        CallError::Arity {
            callable: callable.to_string(),
            position,
            message: message.into(),
        }
    }

    pub fn registration(callable: &str, message: impl Into<String>) -> Self {
        CallError::Registration {
            callable: callable.to_string(),
            message: message.into(),
        }
    }

    pub fn layout(message: impl Into<String>) -> Self {
        CallError::Layout {
            message: message.into(),
        }
    }

    /// An execution failure raised inside a kernel; the call graph fills in
    /// the kernel name on the way out.
    pub fn execution(message: impl Into<String>) -> Self {
        CallError::Execution {
            kernel: None,
            message: message.into(),
        }
    }

    /// Wraps a child failure. Already-wrapped failures pass through so the
    /// innermost composite names the failing child exactly once.
    pub fn instantiation(callable: &str, source: CallError) -> Self {
        match source {
            e @ CallError::Instantiation { .. } => e,
            e => CallError::Instantiation {
                callable: callable.to_string(),
                source: Box::new(e),
            },
        }
    }

    pub(crate) fn with_kernel(self, name: &str) -> Self {
        match self {
            CallError::Execution {
                kernel: None,
                message,
            } => CallError::Execution {
                kernel: Some(name.to_string()),
                message,
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            CallError::Arity { .. } => ErrorKind::Arity,
            CallError::NoMatchingOverload { .. } => ErrorKind::NoMatchingOverload,
            CallError::Instantiation { .. } => ErrorKind::Instantiation,
            CallError::Registration { .. } => ErrorKind::Registration,
            CallError::Layout { .. } => ErrorKind::Layout,
            CallError::Execution { .. } => ErrorKind::Execution,
        }
    }

    /// The offending argument, looking through instantiation wrappers.
    pub fn position(&self) -> Option<&ArgPosition> {
        match self {
            CallError::TypeMismatch { position, .. }
            | CallError::Arity { position, .. }
            | CallError::NoMatchingOverload { position, .. } => Some(position),
            CallError::Instantiation { source, .. } => source.position(),
            _ => None,
        }
    }

    /// The innermost failure behind any instantiation wrappers.
    pub fn root_cause(&self) -> &CallError {
        match self {
            CallError::Instantiation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Rewrites argument positions, used when an adapter reorders its
    /// arguments before handing them to a child.
    pub(crate) fn map_position(self, f: &impl Fn(ArgPosition) -> ArgPosition) -> Self {
        match self {
            CallError::TypeMismatch {
                callable,
                position,
                message,
            } => CallError::TypeMismatch {
                callable,
                position: f(position),
                message,
            },
            CallError::Arity {
                callable,
                position,
                message,
            } => CallError::Arity {
                callable,
                position: f(position),
                message,
            },
            CallError::NoMatchingOverload {
                callable,
                types,
                position,
            } => CallError::NoMatchingOverload {
                callable,
                types,
                position: f(position),
            },
            CallError::Instantiation { callable, source } => CallError::Instantiation {
                callable,
                source: Box::new(source.map_position(f)),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiation_wraps_once() {
        let inner = CallError::mismatch("leaf", ArgPosition::Src(1), "expected int32");
        let once = CallError::instantiation("lift", inner);
        let twice = CallError::instantiation("outer", once);
        match &twice {
            CallError::Instantiation { callable, source } => {
                assert_eq!(callable, "lift");
                assert_eq!(source.kind(), ErrorKind::TypeMismatch);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(twice.position(), Some(&ArgPosition::Src(1)));
    }

    #[test]
    fn kernel_name_is_filled_once() {
        let e = CallError::execution("integer division by zero")
            .with_kernel("divide")
            .with_kernel("lift");
        assert_eq!(e.to_string(), "kernel `divide` failed: integer division by zero");
    }

    #[test]
    fn positions_display() {
        assert_eq!(ArgPosition::Src(2).to_string(), "argument 2");
        assert_eq!(ArgPosition::Keyword("axis".into()).to_string(), "keyword 'axis'");
    }
}
