#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::types::Type;

/// A named keyword parameter of a callable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KwdParam {
    pub name: String,
    pub ty: Type,
    pub optional: bool,
}

impl KwdParam {
    pub fn required(name: impl Into<String>, ty: Type) -> Self {
        KwdParam {
            name: name.into(),
            ty,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, ty: Type) -> Self {
        KwdParam {
            name: name.into(),
            ty,
            optional: true,
        }
    }
}

/// The declared type of a callable: `(params..., kwds...) -> ret`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Type>,
    pub kwds: Vec<KwdParam>,
    pub ret: Type,
}

impl Signature {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Signature {
            params,
            kwds: Vec::new(),
            ret,
        }
    }

    pub fn with_kwds(mut self, kwds: Vec<KwdParam>) -> Self {
        self.kwds = kwds;
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn kwd(&self, name: &str) -> Option<&KwdParam> {
        self.kwds.iter().find(|k| k.name == name)
    }

    /// Variables mentioned anywhere in the signature.
    pub fn type_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for p in &self.params {
            p.collect_type_vars(&mut out);
        }
        for k in &self.kwds {
            k.ty.collect_type_vars(&mut out);
        }
        self.ret.collect_type_vars(&mut out);
        out
    }

    pub fn is_generic(&self) -> bool {
        self.params.iter().any(Type::is_symbolic) || self.ret.is_symbolic()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        let mut first = true;
        for p in &self.params {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{p}")?;
        }
        for k in &self.kwds {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            let opt = if k.optional { "?" } else { "" };
            write!(f, "{}: {opt}{}", k.name, k.ty)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

impl FromStr for Signature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parser::parse_signature(s)
    }
}

impl FromStr for Type {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parser::parse_type(s)
    }
}
