#![forbid(unsafe_code)]

//! Dynamic array callables.
//!
//! Callables are resolved against concrete argument types, instantiated into
//! a tree of kernel nodes, and executed over strided buffers. Composite
//! callables (dispatchers, permutations, elementwise lifts, reductions) are
//! built from leaf kernels and compose freely.

pub mod array;
pub mod callable;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod functional;
pub mod kernel;
pub mod kernels;
pub mod kwds;
pub mod memory;
pub mod registry;
pub mod resolve;

pub use array::{ArgMeta, Array};
pub use callable::{Callable, CallableKind, KernelSetup, Leaf, Specialization};
pub use config::{DispatchConfig, DuplicatePolicy, NdcallConfig, RegistryConfig};
pub use dispatcher::Dispatcher;
pub use error::{ArgPosition, CallError, ErrorKind};
pub use functional::{Associativity, elwise, lift_to, permute, reduce};
pub use kernel::{CallGraph, KernelFns, KernelTargets, NodeData, NodeId};
pub use kwds::{DST, DST_TP, KwdValue, Kwds};
pub use memory::{Addr, Element, Memory, Scalar};
pub use registry::Registry;
pub use resolve::{Binding, TypeVarBinding};

pub use ndcall_types::{KwdParam, ParseError, ScalarKind, Signature, Type, TypeId};
