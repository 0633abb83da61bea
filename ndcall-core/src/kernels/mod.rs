#![forbid(unsafe_code)]

//! Builtin kernels and the helpers that register them per element kind.

pub mod arith;
pub mod assign;

use ndcall_types::{ScalarKind, TypeId};

use crate::callable::Callable;
use crate::config::{DispatchConfig, NdcallConfig};
use crate::dispatcher::Dispatcher;
use crate::error::CallError;
use crate::functional::{Associativity, elwise, reduce};
use crate::memory::Scalar;

use arith::{Add, Divide, Maximum, Minimum, Multiply, Subtract};

pub type DispatchEntry = (Vec<TypeId>, Callable);

/// One dispatch entry per kind.
pub fn make_all(
    kinds: &[ScalarKind],
    make: impl FnMut(ScalarKind) -> Result<DispatchEntry, CallError>,
) -> Result<Vec<DispatchEntry>, CallError> {
    kinds.iter().copied().map(make).collect()
}

/// One dispatch entry per kind accepted by `keep`.
pub fn make_all_if(
    kinds: &[ScalarKind],
    keep: impl Fn(ScalarKind) -> bool,
    make: impl FnMut(ScalarKind) -> Result<DispatchEntry, CallError>,
) -> Result<Vec<DispatchEntry>, CallError> {
    kinds.iter().copied().filter(|&k| keep(k)).map(make).collect()
}

pub(crate) fn dispatcher_of(
    name: &str,
    entries: Vec<DispatchEntry>,
    config: &DispatchConfig,
) -> Result<Dispatcher<Callable>, CallError> {
    Dispatcher::from_entries(entries, config.clone()).map_err(|dup| {
        let key: Vec<String> = dup.0.iter().map(TypeId::to_string).collect();
        CallError::registration(name, format!("duplicate dispatch key ({})", key.join(", ")))
    })
}

/// The callables a fresh registry starts with, by registered name.
pub fn builtins(config: &NdcallConfig) -> Result<Vec<(&'static str, Callable)>, CallError> {
    let d = &config.dispatch;
    let add = arith::binary_dispatch::<Add>(d)?;
    let multiply = arith::binary_dispatch::<Multiply>(d)?;
    Ok(vec![
        ("add", elwise(&add)),
        ("subtract", elwise(&arith::binary_dispatch::<Subtract>(d)?)),
        ("multiply", elwise(&multiply)),
        ("divide", elwise(&arith::binary_dispatch::<Divide>(d)?)),
        ("maximum", elwise(&arith::binary_dispatch::<Maximum>(d)?)),
        ("minimum", elwise(&arith::binary_dispatch::<Minimum>(d)?)),
        ("negative", elwise(&arith::negative_dispatch(d)?)),
        ("scale", elwise(&arith::scale()?)),
        ("assign", elwise(&assign::copy()?)),
        ("sum", reduce(&add, Associativity::Left, Some(Scalar::Int(0)))?),
        ("prod", reduce(&multiply, Associativity::Left, Some(Scalar::Int(1)))?),
    ])
}
