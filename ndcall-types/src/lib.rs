#![forbid(unsafe_code)]

//! Type representation for ndcall.
//!
//! Concrete types describe argument data (`5 * int32`); declared types in a
//! [`Signature`] may additionally contain type variables (`T`), symbolic
//! dimensions (`N * T`) and ellipses (`Dims... * T`) which a callable binds
//! at resolution time.

mod error;
mod lexer;
mod parser;
mod signature;
mod types;

pub use error::ParseError;
pub use parser::{parse_signature, parse_type};
pub use signature::{KwdParam, Signature};
pub use types::{ScalarKind, Type, TypeId};
