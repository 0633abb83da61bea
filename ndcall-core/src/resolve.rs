#![forbid(unsafe_code)]

//! Unification of declared signature types against concrete argument types.

use std::collections::BTreeMap;
use std::fmt;

use ndcall_types::Type;

/// What a type variable is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    /// `T` bound to a whole type.
    Type(Type),
    /// `N` in `N * T` bound to a dimension size.
    Dim(usize),
    /// `Dims` in `Dims... * T` bound to a run of dimension sizes.
    Dims(Vec<usize>),
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Type(t) => write!(f, "{t}"),
            Binding::Dim(n) => write!(f, "dimension {n}"),
            Binding::Dims(dims) => write!(f, "dimensions {dims:?}"),
        }
    }
}

/// Bindings accumulated while resolving one callable. A fresh map is used
/// per callable so nested callables never observe each other's variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeVarBinding {
    vars: BTreeMap<String, Binding>,
}

impl TypeVarBinding {
    pub fn new() -> Self {
        TypeVarBinding::default()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn bind(&mut self, name: &str, value: Binding) -> Result<(), String> {
        match self.vars.get(name) {
            Some(existing) if *existing == value => Ok(()),
            Some(existing) => Err(format!(
                "`{name}` is already bound to {existing}, found {value}"
            )),
            None => {
                self.vars.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    /// Matches `actual` against `pattern`, extending the bindings. Concrete
    /// scalars in the pattern accept any losslessly promotable scalar; type
    /// variables must bind consistently.
    pub fn unify(&mut self, pattern: &Type, actual: &Type) -> Result<(), String> {
        match pattern {
            Type::Any => Ok(()),
            Type::TypeVar(name) => self.bind(name, Binding::Type(actual.clone())),
            Type::Void => match actual {
                Type::Void => Ok(()),
                _ => Err(format!("expected void, found `{actual}`")),
            },
            Type::Scalar(want) => match actual {
                Type::Scalar(have) if have.can_promote_to(*want) => Ok(()),
                _ => Err(format!("expected `{want}`, found `{actual}`")),
            },
            Type::FixedDim { size, elem } => match actual {
                Type::FixedDim { size: have, elem: inner } if have == size => {
                    self.unify(elem, inner)
                }
                Type::FixedDim { size: have, .. } => Err(format!(
                    "dimension of size {have} does not match declared size {size}"
                )),
                _ => Err(format!("expected a dimension of size {size}, found `{actual}`")),
            },
            Type::SymbolicDim { name, elem } => match actual {
                Type::FixedDim { size, elem: inner } => {
                    self.bind(name, Binding::Dim(*size))?;
                    self.unify(elem, inner)
                }
                _ => Err(format!("expected a dimension `{name}`, found `{actual}`")),
            },
            Type::Ellipsis { name, elem } => {
                let inner_nd = elem.ndim();
                let shape = actual.shape().unwrap_or_default();
                if shape.len() < inner_nd {
                    return Err(format!(
                        "expected at least {inner_nd} dimensions, found `{actual}`"
                    ));
                }
                let outer = shape.len() - inner_nd;
                if let Some(name) = name {
                    self.bind(name, Binding::Dims(shape[..outer].to_vec()))?;
                }
                match actual.strip_dims(outer) {
                    Some(rest) => self.unify(elem, rest),
                    None => Err(format!("cannot strip {outer} dimensions from `{actual}`")),
                }
            }
        }
    }

    /// Replaces every variable in `pattern` with its binding.
    pub fn substitute(&self, pattern: &Type) -> Result<Type, String> {
        match pattern {
            Type::Void | Type::Scalar(_) => Ok(pattern.clone()),
            Type::Any => Err("`Any` has no concrete substitution".to_string()),
            Type::TypeVar(name) => match self.get(name) {
                Some(Binding::Type(t)) => Ok(t.clone()),
                Some(other) => Err(format!("`{name}` is bound to {other}, not a type")),
                None => Err(format!("type variable `{name}` is unbound")),
            },
            Type::FixedDim { size, elem } => Ok(Type::fixed_dim(*size, self.substitute(elem)?)),
            Type::SymbolicDim { name, elem } => match self.get(name) {
                Some(Binding::Dim(n)) => Ok(Type::fixed_dim(*n, self.substitute(elem)?)),
                _ => Err(format!("dimension `{name}` is unbound")),
            },
            Type::Ellipsis {
                name: Some(name),
                elem,
            } => match self.get(name) {
                Some(Binding::Dims(dims)) => Ok(Type::with_shape(dims, self.substitute(elem)?)),
                _ => Err(format!("ellipsis `{name}...` is unbound")),
            },
            Type::Ellipsis { name: None, .. } => {
                Err("an unnamed ellipsis cannot be substituted".to_string())
            }
        }
    }
}
