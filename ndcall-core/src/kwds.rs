#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use ndcall_types::{ScalarKind, Signature, Type};

use crate::array::Array;
use crate::error::{ArgPosition, CallError};
use crate::memory::Scalar;

/// Reserved keyword carrying a preallocated destination array.
pub const DST: &str = "dst";
/// Reserved keyword overriding the destination type.
pub const DST_TP: &str = "dst_tp";

#[derive(Clone, Debug, PartialEq)]
pub enum KwdValue {
    Type(Type),
    Array(Array),
    Scalar(Scalar),
}

impl KwdValue {
    /// Type this value presents to keyword unification.
    pub fn ty(&self) -> Type {
        match self {
            KwdValue::Type(_) => Type::Any,
            KwdValue::Array(a) => a.ty().clone(),
            KwdValue::Scalar(s) => Type::Scalar(match s {
                Scalar::Bool(_) => ScalarKind::Bool,
                Scalar::Int(_) => ScalarKind::Int64,
                Scalar::UInt(_) => ScalarKind::UInt64,
                Scalar::Float(_) => ScalarKind::Float64,
            }),
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            KwdValue::Scalar(s) => Some(*s),
            _ => None,
        }
    }
}

impl From<Type> for KwdValue {
    fn from(t: Type) -> Self {
        KwdValue::Type(t)
    }
}

impl From<Array> for KwdValue {
    fn from(a: Array) -> Self {
        KwdValue::Array(a)
    }
}

impl From<f64> for KwdValue {
    fn from(v: f64) -> Self {
        KwdValue::Scalar(Scalar::Float(v))
    }
}

impl From<i64> for KwdValue {
    fn from(v: i64) -> Self {
        KwdValue::Scalar(Scalar::Int(v))
    }
}

impl From<bool> for KwdValue {
    fn from(v: bool) -> Self {
        KwdValue::Scalar(Scalar::Bool(v))
    }
}

/// Keyword arguments of one call, ordered by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Kwds {
    entries: BTreeMap<String, KwdValue>,
}

impl Kwds {
    pub fn new() -> Self {
        Kwds::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<KwdValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<KwdValue>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&KwdValue> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<KwdValue> {
        self.entries.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KwdValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keywords other than the reserved destination ones.
    pub fn user(&self) -> impl Iterator<Item = (&str, &KwdValue)> {
        self.iter().filter(|(k, _)| *k != DST && *k != DST_TP)
    }

    /// Destination type requested through `dst` or `dst_tp`, with the
    /// keyword that supplied it.
    pub fn dst_type(&self, callable: &str) -> Result<Option<(Type, ArgPosition)>, CallError> {
        let from_array = match self.get(DST) {
            None => None,
            Some(KwdValue::Array(a)) => Some(a.ty().clone()),
            Some(_) => {
                return Err(CallError::mismatch(
                    callable,
                    ArgPosition::Keyword(DST.into()),
                    "expected an array",
                ));
            }
        };
        let from_type = match self.get(DST_TP) {
            None => None,
            Some(KwdValue::Type(t)) if !t.is_symbolic() => Some(t.clone()),
            Some(KwdValue::Type(t)) => {
                return Err(CallError::mismatch(
                    callable,
                    ArgPosition::Keyword(DST_TP.into()),
                    format!("`{t}` is not a concrete type"),
                ));
            }
            Some(_) => {
                return Err(CallError::mismatch(
                    callable,
                    ArgPosition::Keyword(DST_TP.into()),
                    "expected a type",
                ));
            }
        };
        match (from_array, from_type) {
            (Some(a), Some(t)) if a != t => Err(CallError::mismatch(
                callable,
                ArgPosition::Keyword(DST_TP.into()),
                format!("`{t}` disagrees with the `dst` array of type `{a}`"),
            )),
            (Some(a), _) => Ok(Some((a, ArgPosition::Keyword(DST.into())))),
            (None, Some(t)) => Ok(Some((t, ArgPosition::Keyword(DST_TP.into())))),
            (None, None) => Ok(None),
        }
    }

    /// Checks user keywords against a signature: no unknown names, no
    /// missing required ones.
    pub fn check_against(&self, callable: &str, sig: &Signature) -> Result<(), CallError> {
        for (name, _) in self.user() {
            if sig.kwd(name).is_none() {
                return Err(CallError::arity(
                    callable,
                    ArgPosition::Keyword(name.to_string()),
                    "unexpected keyword argument",
                ));
            }
        }
        for k in sig.kwds.iter().filter(|k| !k.optional) {
            if self.get(&k.name).is_none() {
                return Err(CallError::arity(
                    callable,
                    ArgPosition::Keyword(k.name.clone()),
                    "missing required keyword argument",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn dst_tp_must_be_concrete() {
        let kwds = Kwds::new().with(DST_TP, Type::typevar("T"));
        let err = kwds.dst_type("f").unwrap_err();
        assert_eq!(err.position(), Some(&ArgPosition::Keyword(DST_TP.into())));
    }

    #[test]
    fn dst_and_dst_tp_must_agree() {
        let kwds = Kwds::new()
            .with(DST, Array::scalar(1i32))
            .with(DST_TP, Type::Scalar(ScalarKind::Int64));
        assert_eq!(kwds.dst_type("f").unwrap_err().kind(), ErrorKind::TypeMismatch);

        let kwds = Kwds::new().with(DST, Array::scalar(1i32));
        let (ty, pos) = kwds.dst_type("f").unwrap().unwrap();
        assert_eq!(ty, Type::Scalar(ScalarKind::Int32));
        assert_eq!(pos, ArgPosition::Keyword(DST.into()));
    }

    #[test]
    fn unknown_and_missing_keywords() {
        let sig: Signature = "(T, factor: float64) -> T".parse().unwrap();
        let err = Kwds::new().check_against("scale", &sig).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arity);
        assert_eq!(err.position(), Some(&ArgPosition::Keyword("factor".into())));

        let err = Kwds::new()
            .with("factor", 2.0)
            .with("bias", 1.0)
            .check_against("scale", &sig)
            .unwrap_err();
        assert_eq!(err.position(), Some(&ArgPosition::Keyword("bias".into())));

        let ok = Kwds::new().with("factor", 2.0).with(DST_TP, Type::Scalar(ScalarKind::Float64));
        assert!(ok.check_against("scale", &sig).is_ok());
    }
}
