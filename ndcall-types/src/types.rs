#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Category tag used as a dispatch key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeId {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    FixedDim,
    SymbolicDim,
    Ellipsis,
    TypeVar,
    Any,
}

impl TypeId {
    pub fn scalar_kind(self) -> Option<ScalarKind> {
        ScalarKind::ALL.iter().copied().find(|k| k.type_id() == self)
    }

    /// Lossless promotion between categories. Only scalar categories promote;
    /// every other category is compatible with itself alone.
    pub fn can_promote_to(self, target: TypeId) -> bool {
        if self == target {
            return true;
        }
        match (self.scalar_kind(), target.scalar_kind()) {
            (Some(from), Some(to)) => from.can_promote_to(to),
            _ => false,
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TypeId::FixedDim => "fixed_dim",
            TypeId::SymbolicDim => "symbolic_dim",
            TypeId::Ellipsis => "ellipsis_dim",
            TypeId::TypeVar => "typevar",
            TypeId::Any => "Any",
            TypeId::Void => "void",
            other => match other.scalar_kind() {
                Some(k) => k.name(),
                None => "<unknown>",
            },
        };
        f.write_str(s)
    }
}

/// Fixed-size element types the builtin kernels understand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 11] = [
        ScalarKind::Bool,
        ScalarKind::Int8,
        ScalarKind::Int16,
        ScalarKind::Int32,
        ScalarKind::Int64,
        ScalarKind::UInt8,
        ScalarKind::UInt16,
        ScalarKind::UInt32,
        ScalarKind::UInt64,
        ScalarKind::Float32,
        ScalarKind::Float64,
    ];

    /// Every kind the arithmetic kernels are registered for, narrowest
    /// first. Promotion takes the first entry that fits, so this order is
    /// also the tie-break between common kinds.
    pub const NUMERIC: [ScalarKind; 10] = [
        ScalarKind::Int8,
        ScalarKind::UInt8,
        ScalarKind::Int16,
        ScalarKind::UInt16,
        ScalarKind::Int32,
        ScalarKind::UInt32,
        ScalarKind::Int64,
        ScalarKind::UInt64,
        ScalarKind::Float32,
        ScalarKind::Float64,
    ];

    pub fn type_id(self) -> TypeId {
        match self {
            ScalarKind::Bool => TypeId::Bool,
            ScalarKind::Int8 => TypeId::Int8,
            ScalarKind::Int16 => TypeId::Int16,
            ScalarKind::Int32 => TypeId::Int32,
            ScalarKind::Int64 => TypeId::Int64,
            ScalarKind::UInt8 => TypeId::UInt8,
            ScalarKind::UInt16 => TypeId::UInt16,
            ScalarKind::UInt32 => TypeId::UInt32,
            ScalarKind::UInt64 => TypeId::UInt64,
            ScalarKind::Float32 => TypeId::Float32,
            ScalarKind::Float64 => TypeId::Float64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int8 => "int8",
            ScalarKind::Int16 => "int16",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::UInt8 => "uint8",
            ScalarKind::UInt16 => "uint16",
            ScalarKind::UInt32 => "uint32",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::Float32 => "float32",
            ScalarKind::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<ScalarKind> {
        ScalarKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Element size in bytes.
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::Int8 | ScalarKind::UInt8 => 1,
            ScalarKind::Int16 | ScalarKind::UInt16 => 2,
            ScalarKind::Int32 | ScalarKind::UInt32 | ScalarKind::Float32 => 4,
            ScalarKind::Int64 | ScalarKind::UInt64 | ScalarKind::Float64 => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ScalarKind::Int8 | ScalarKind::Int16 | ScalarKind::Int32 | ScalarKind::Int64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            ScalarKind::UInt8 | ScalarKind::UInt16 | ScalarKind::UInt32 | ScalarKind::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::Float32 | ScalarKind::Float64)
    }

    /// Whether every value of `self` is exactly representable in `target`.
    pub fn can_promote_to(self, target: ScalarKind) -> bool {
        if self == target {
            return true;
        }
        if self == ScalarKind::Bool {
            return true;
        }
        // Mantissa widths: 24 bits for float32, 53 for float64.
        let bits = self.size() * 8;
        match target {
            ScalarKind::Bool => false,
            ScalarKind::Float32 => !self.is_float() && bits <= 16,
            ScalarKind::Float64 => self == ScalarKind::Float32 || (!self.is_float() && bits <= 32),
            t if t.is_signed() => {
                let tbits = t.size() * 8;
                (self.is_signed() && bits <= tbits) || (self.is_unsigned() && bits < tbits)
            }
            t => self.is_unsigned() && bits <= t.size() * 8,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A datashape-style type.
///
/// Concrete types are built from `Void`, `Scalar` and `FixedDim`. The other
/// variants only appear in declared signatures, where they are bound by
/// unification against concrete argument types.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    Scalar(ScalarKind),
    /// `5 * T`
    FixedDim { size: usize, elem: Box<Type> },
    /// `N * T`
    SymbolicDim { name: String, elem: Box<Type> },
    /// `... * T` or `Dims... * T`
    Ellipsis { name: Option<String>, elem: Box<Type> },
    /// `T`
    TypeVar(String),
    /// Matches anything without binding.
    Any,
}

impl Type {
    pub fn scalar(kind: ScalarKind) -> Type {
        Type::Scalar(kind)
    }

    pub fn fixed_dim(size: usize, elem: Type) -> Type {
        Type::FixedDim {
            size,
            elem: Box::new(elem),
        }
    }

    pub fn symbolic_dim(name: impl Into<String>, elem: Type) -> Type {
        Type::SymbolicDim {
            name: name.into(),
            elem: Box::new(elem),
        }
    }

    pub fn ellipsis(name: Option<&str>, elem: Type) -> Type {
        Type::Ellipsis {
            name: name.map(str::to_string),
            elem: Box::new(elem),
        }
    }

    pub fn typevar(name: impl Into<String>) -> Type {
        Type::TypeVar(name.into())
    }

    /// Wraps `elem` in fixed dimensions, outermost first.
    pub fn with_shape(shape: &[usize], elem: Type) -> Type {
        shape
            .iter()
            .rev()
            .fold(elem, |acc, &size| Type::fixed_dim(size, acc))
    }

    pub fn type_id(&self) -> TypeId {
        match self {
            Type::Void => TypeId::Void,
            Type::Scalar(k) => k.type_id(),
            Type::FixedDim { .. } => TypeId::FixedDim,
            Type::SymbolicDim { .. } => TypeId::SymbolicDim,
            Type::Ellipsis { .. } => TypeId::Ellipsis,
            Type::TypeVar(_) => TypeId::TypeVar,
            Type::Any => TypeId::Any,
        }
    }

    pub fn is_dim(&self) -> bool {
        matches!(
            self,
            Type::FixedDim { .. } | Type::SymbolicDim { .. } | Type::Ellipsis { .. }
        )
    }

    /// Element type one level down, if this is a dimension.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::FixedDim { elem, .. }
            | Type::SymbolicDim { elem, .. }
            | Type::Ellipsis { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Innermost non-dimension type.
    pub fn dtype(&self) -> &Type {
        let mut t = self;
        while let Some(elem) = t.element() {
            t = elem;
        }
        t
    }

    /// Number of leading dimensions (an ellipsis counts as one).
    pub fn ndim(&self) -> usize {
        let mut n = 0;
        let mut t = self;
        while let Some(elem) = t.element() {
            n += 1;
            t = elem;
        }
        n
    }

    /// Concrete shape of leading fixed dimensions, `None` if any is symbolic.
    pub fn shape(&self) -> Option<Vec<usize>> {
        let mut out = Vec::new();
        let mut t = self;
        loop {
            match t {
                Type::FixedDim { size, elem } => {
                    out.push(*size);
                    t = elem;
                }
                Type::SymbolicDim { .. } | Type::Ellipsis { .. } => return None,
                _ => return Some(out),
            }
        }
    }

    /// Strips `n` leading dimensions.
    pub fn strip_dims(&self, n: usize) -> Option<&Type> {
        let mut t = self;
        for _ in 0..n {
            t = t.element()?;
        }
        Some(t)
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Type::Scalar(k) => Some(*k),
            _ => None,
        }
    }

    /// True when the type contains variables, symbolic dims, ellipses or `Any`.
    pub fn is_symbolic(&self) -> bool {
        match self {
            Type::Void | Type::Scalar(_) => false,
            Type::FixedDim { elem, .. } => elem.is_symbolic(),
            Type::SymbolicDim { .. } | Type::Ellipsis { .. } | Type::TypeVar(_) | Type::Any => {
                true
            }
        }
    }

    /// Names of all type variables, symbolic dims and named ellipses.
    pub fn type_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_type_vars(&mut out);
        out
    }

    pub(crate) fn collect_type_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Type::TypeVar(name) => {
                out.insert(name.clone());
            }
            Type::SymbolicDim { name, elem } => {
                out.insert(name.clone());
                elem.collect_type_vars(out);
            }
            Type::Ellipsis { name, elem } => {
                if let Some(name) = name {
                    out.insert(name.clone());
                }
                elem.collect_type_vars(out);
            }
            Type::FixedDim { elem, .. } => elem.collect_type_vars(out),
            Type::Void | Type::Scalar(_) | Type::Any => {}
        }
    }

    /// Compatibility predicate: `self` can be losslessly converted to
    /// `target` elementwise. Dimensions must agree exactly.
    pub fn can_promote_to(&self, target: &Type) -> bool {
        match (self, target) {
            (Type::Scalar(a), Type::Scalar(b)) => a.can_promote_to(*b),
            (Type::FixedDim { size: a, elem: ea }, Type::FixedDim { size: b, elem: eb }) => {
                a == b && ea.can_promote_to(eb)
            }
            (a, b) => a == b,
        }
    }

    /// Bytes occupied by one element of a concrete type laid out contiguously.
    pub fn data_size(&self) -> Option<usize> {
        match self {
            Type::Void => Some(0),
            Type::Scalar(k) => Some(k.size()),
            Type::FixedDim { size, elem } => elem.data_size().map(|s| s * size),
            _ => None,
        }
    }
}

impl From<ScalarKind> for Type {
    fn from(kind: ScalarKind) -> Self {
        Type::Scalar(kind)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Scalar(k) => f.write_str(k.name()),
            Type::FixedDim { size, elem } => write!(f, "{size} * {elem}"),
            Type::SymbolicDim { name, elem } => write!(f, "{name} * {elem}"),
            Type::Ellipsis { name: Some(name), elem } => write!(f, "{name}... * {elem}"),
            Type::Ellipsis { name: None, elem } => write!(f, "... * {elem}"),
            Type::TypeVar(name) => f.write_str(name),
            Type::Any => f.write_str("Any"),
        }
    }
}
