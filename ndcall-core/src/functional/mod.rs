#![forbid(unsafe_code)]

//! Adapters that build callables out of other callables.

pub(crate) mod convert;
mod lift;
mod permute;
mod reduce;

pub use lift::{Lift, broadcast_shapes, elwise, lift_to};
pub use permute::{Permute, permute};
pub use reduce::{Associativity, Reduce, reduce};
