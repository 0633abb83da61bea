#![forbid(unsafe_code)]

//! Array callables.
//!
//! A [`Callable`] pairs a declared [`Signature`] with one of a closed set of
//! behaviours: a leaf kernel, a type-id dispatcher, or one of the adapters in
//! [`crate::functional`]. Calling one runs three phases:
//!
//! 1. resolution computes the destination type from the argument types,
//! 2. instantiation writes a tree of kernel nodes into a [`CallGraph`],
//! 3. execution runs the root node over the argument buffers.
//!
//! Callables are immutable after construction apart from their overload
//! table, and are shared freely between threads.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use ndcall_types::{KwdParam, ScalarKind, Signature, Type, TypeId};
use tracing::{debug, instrument, trace};

use crate::array::{ArgMeta, Array};
use crate::dispatcher::Dispatcher;
use crate::error::{ArgPosition, CallError};
use crate::functional::{Lift, Permute, Reduce, convert};
use crate::kernel::{CallGraph, ConvertPlan, KernelFns, NodeData, NodeId};
use crate::kwds::{DST, KwdValue, Kwds};
use crate::memory::{Addr, Memory};
use crate::resolve::TypeVarBinding;

/// Selects a kernel for the scalar kind a generic leaf resolved to.
pub type KernelFactory = fn(ScalarKind) -> Option<KernelFns>;

/// Computes node data from keywords and the kernel's element kinds.
pub type DataInitFn = fn(&KernelSetup<'_>) -> Result<NodeData, CallError>;

/// What a leaf's data initializer gets to look at.
pub struct KernelSetup<'a> {
    pub kwds: &'a Kwds,
    pub src: &'a [ScalarKind],
    pub dst: Option<ScalarKind>,
}

#[derive(Clone, Copy)]
pub enum LeafKernel {
    Fixed(KernelFns),
    /// Picks the kernel by the first parameter's resolved kind (or the
    /// return kind for nullary leaves).
    PerKind(KernelFactory),
}

/// A kernel operating on scalar elements.
#[derive(Clone, Copy)]
pub struct Leaf {
    kernel: LeafKernel,
    data_init: Option<DataInitFn>,
}

impl Leaf {
    pub fn fixed(fns: KernelFns) -> Self {
        Leaf {
            kernel: LeafKernel::Fixed(fns),
            data_init: None,
        }
    }

    pub fn per_kind(factory: KernelFactory) -> Self {
        Leaf {
            kernel: LeafKernel::PerKind(factory),
            data_init: None,
        }
    }

    pub fn with_data_init(mut self, init: DataInitFn) -> Self {
        self.data_init = Some(init);
        self
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kernel = match &self.kernel {
            LeafKernel::Fixed(fns) => fns.name,
            LeafKernel::PerKind(_) => "<per-kind>",
        };
        f.debug_struct("Leaf")
            .field("kernel", &kernel)
            .field("data_init", &self.data_init.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub enum CallableKind {
    Leaf(Leaf),
    Dispatch(Dispatcher<Callable>),
    Permute(Permute),
    Lift(Lift),
    Reduce(Reduce),
}

/// A registered overload: calls resolving to exactly `ret` from exactly
/// `args` instantiate `target` instead.
#[derive(Clone, Debug)]
pub struct Specialization {
    pub ret: Type,
    pub args: Vec<Type>,
    pub target: Callable,
}

struct CallableInner {
    name: String,
    signature: Signature,
    kind: CallableKind,
    overloads: RwLock<Vec<Specialization>>,
}

#[derive(Clone)]
pub struct Callable(Arc<CallableInner>);

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.0.name)
            .field("signature", &self.0.signature.to_string())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.0.name, self.0.signature)
    }
}

fn joined(types: &[Type]) -> String {
    types
        .iter()
        .map(Type::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Callable {
    pub(crate) fn from_parts(name: String, signature: Signature, kind: CallableKind) -> Callable {
        Callable(Arc::new(CallableInner {
            name,
            signature,
            kind,
            overloads: RwLock::new(Vec::new()),
        }))
    }

    /// A leaf kernel. Parameters and return must be scalars or type
    /// variables; lift the leaf to apply it over dimensions.
    pub fn leaf(name: impl Into<String>, signature: Signature, leaf: Leaf) -> Result<Callable, CallError> {
        let name = name.into();
        let bad = signature
            .params
            .iter()
            .chain(std::iter::once(&signature.ret))
            .find(|t| t.is_dim() || matches!(t, Type::Any));
        if let Some(t) = bad {
            return Err(CallError::registration(
                &name,
                format!("leaf kernels take scalars or type variables, found `{t}`"),
            ));
        }
        Ok(Callable::from_parts(name, signature, CallableKind::Leaf(leaf)))
    }

    /// A callable that picks one of several same-arity callables by the
    /// type ids of its arguments.
    pub fn dispatch(
        name: impl Into<String>,
        arity: usize,
        dispatcher: Dispatcher<Callable>,
    ) -> Result<Callable, CallError> {
        let name = name.into();
        if dispatcher.is_empty() {
            return Err(CallError::registration(&name, "a dispatcher needs at least one entry"));
        }
        let mut kwds: Vec<KwdParam> = Vec::new();
        for (key, target) in dispatcher.entries() {
            if key.len() != arity || target.arity() != arity {
                return Err(CallError::registration(
                    &name,
                    format!(
                        "entry `{}` with a {}-element key does not take {arity} arguments",
                        target.name(),
                        key.len()
                    ),
                ));
            }
            for k in &target.signature().kwds {
                if !kwds.iter().any(|have| have.name == k.name) {
                    kwds.push(k.clone());
                }
            }
        }
        let signature = Signature::new(vec![Type::Any; arity], Type::Any).with_kwds(kwds);
        Ok(Callable::from_parts(name, signature, CallableKind::Dispatch(dispatcher)))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    pub fn arity(&self) -> usize {
        self.0.signature.arity()
    }

    pub fn kind(&self) -> &CallableKind {
        &self.0.kind
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn mismatch(&self, position: ArgPosition, message: impl Into<String>) -> CallError {
        CallError::mismatch(self.name(), position, message)
    }

    fn check_arity(&self, n: usize) -> Result<(), CallError> {
        let want = self.arity();
        if n == want {
            return Ok(());
        }
        Err(CallError::arity(
            self.name(),
            ArgPosition::Src(n.min(want)),
            format!("expected {want} positional arguments, got {n}"),
        ))
    }

    /// Computes the destination type for concrete argument types.
    ///
    /// A concrete `dst_hint` (or a `dst` / `dst_tp` keyword, which take
    /// precedence) fixes the destination; the resolved result must promote
    /// to it.
    #[instrument(level = "trace", skip_all, fields(callable = %self.name()))]
    pub fn resolve(&self, dst_hint: Option<&Type>, args: &[Type], kwds: &Kwds) -> Result<Type, CallError> {
        for (i, a) in args.iter().enumerate() {
            if a.is_symbolic() {
                return Err(self.mismatch(ArgPosition::Src(i), format!("`{a}` is not a concrete type")));
            }
        }
        let requested = match kwds.dst_type(self.name())? {
            Some(found) => Some(found),
            None => dst_hint
                .filter(|t| !t.is_symbolic())
                .map(|t| (t.clone(), ArgPosition::Dst)),
        };
        let resolved = match &requested {
            None => self.resolve_types(None, args, kwds)?,
            // Destination faults are reported against the keyword that fixed it.
            Some((dst, position)) => self.resolve_types(Some(dst), args, kwds).map_err(|e| {
                e.map_position(&|p| match p {
                    ArgPosition::Dst => position.clone(),
                    other => other,
                })
            })?,
        };
        match requested {
            None => Ok(resolved),
            Some((dst, _)) if resolved.can_promote_to(&dst) => Ok(dst),
            Some((dst, position)) => Err(self.mismatch(
                position,
                format!("result `{resolved}` cannot be stored as `{dst}`"),
            )),
        }
    }

    pub(crate) fn resolve_types(
        &self,
        dst: Option<&Type>,
        args: &[Type],
        kwds: &Kwds,
    ) -> Result<Type, CallError> {
        self.check_arity(args.len())?;
        kwds.check_against(self.name(), self.signature())?;
        let ret = match &self.0.kind {
            CallableKind::Leaf(_) => self.resolve_leaf(args, kwds)?,
            CallableKind::Dispatch(d) => self.dispatch_target(d, args)?.resolve_types(dst, args, kwds)?,
            CallableKind::Permute(p) => p.resolve(self, dst, args, kwds)?,
            CallableKind::Lift(l) => l.resolve(self, dst, args, kwds)?,
            CallableKind::Reduce(r) => r.resolve(self, dst, args, kwds)?,
        };
        trace!(callable = %self.name(), ret = %ret, "resolved");
        Ok(ret)
    }

    fn bind_params(&self, binding: &mut TypeVarBinding, args: &[Type]) -> Result<(), CallError> {
        for (i, (p, a)) in self.signature().params.iter().zip(args).enumerate() {
            binding
                .unify(p, a)
                .map_err(|m| self.mismatch(ArgPosition::Src(i), m))?;
        }
        Ok(())
    }

    fn resolve_leaf(&self, args: &[Type], kwds: &Kwds) -> Result<Type, CallError> {
        for (i, a) in args.iter().enumerate() {
            if a.is_dim() {
                return Err(self.mismatch(
                    ArgPosition::Src(i),
                    format!("kernel operates on scalar elements, found `{a}`; lift it with `elwise`"),
                ));
            }
        }
        let mut binding = TypeVarBinding::new();
        self.bind_params(&mut binding, args)?;
        for k in &self.signature().kwds {
            if let Some(value) = kwds.get(&k.name) {
                binding
                    .unify(&k.ty, &value.ty())
                    .map_err(|m| self.mismatch(ArgPosition::Keyword(k.name.clone()), m))?;
            }
        }
        binding
            .substitute(&self.signature().ret)
            .map_err(|m| self.mismatch(ArgPosition::Dst, m))
    }

    fn dispatch_target<'d>(
        &self,
        dispatcher: &'d Dispatcher<Callable>,
        args: &[Type],
    ) -> Result<&'d Callable, CallError> {
        let key: Vec<TypeId> = args.iter().map(Type::type_id).collect();
        dispatcher
            .dispatch(&key)
            .map_err(|miss| CallError::NoMatchingOverload {
                callable: self.name().to_string(),
                types: joined(args),
                position: ArgPosition::Src(miss.position),
            })
    }

    /// Best guess at the type of parameter `slot` given the others, used to
    /// type a destination slot nobody supplied a type for.
    pub(crate) fn infer_param(&self, known: &[Option<Type>], slot: usize) -> Option<Type> {
        match &self.0.kind {
            CallableKind::Leaf(_) => {
                let params = &self.signature().params;
                let mut binding = TypeVarBinding::new();
                for (p, t) in params.iter().zip(known) {
                    if let Some(t) = t {
                        binding.unify(p, t).ok()?;
                    }
                }
                binding.substitute(params.get(slot)?).ok()
            }
            CallableKind::Dispatch(d) => {
                let fits = |key: &[TypeId], exact: bool| {
                    key.len() == known.len()
                        && key.iter().zip(known).all(|(&want, t)| {
                            t.as_ref().is_none_or(|t| {
                                let have = t.type_id();
                                have == want || (!exact && have.can_promote_to(want))
                            })
                        })
                };
                let (key, target) = d
                    .entries()
                    .find(|(k, _)| fits(*k, true))
                    .or_else(|| d.entries().find(|(k, _)| fits(*k, false)))?;
                target
                    .infer_param(known, slot)
                    .or_else(|| key.get(slot)?.scalar_kind().map(Type::Scalar))
            }
            _ => None,
        }
    }

    /// Adds an overload consulted by [`Callable::specialize`].
    pub fn overload(&self, ret: Type, args: Vec<Type>, target: Callable) -> Result<(), CallError> {
        if args.len() != self.arity() || target.arity() != self.arity() {
            return Err(CallError::registration(
                self.name(),
                format!(
                    "overload `{}` takes {} arguments, `{}` takes {}",
                    target.name(),
                    args.len(),
                    self.name(),
                    self.arity()
                ),
            ));
        }
        debug!(callable = %self.name(), target = %target.name(), ret = %ret, args = %joined(&args), "overload registered");
        self.0
            .overloads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Specialization { ret, args, target });
        Ok(())
    }

    /// The overload registered for exactly `(ret, args)`, else `self`.
    pub fn specialize(&self, ret: &Type, args: &[Type]) -> Callable {
        self.0
            .overloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.ret == *ret && s.args == args)
            .map(|s| s.target.clone())
            .unwrap_or_else(|| self.clone())
    }

    /// Writes the kernel tree for these argument layouts into `graph` and
    /// returns its root. On failure every node written by this call has
    /// been released again.
    pub fn instantiate(
        &self,
        graph: &mut CallGraph,
        dst: &ArgMeta,
        src: &[ArgMeta],
        kwds: &Kwds,
    ) -> Result<NodeId, CallError> {
        let args: Vec<Type> = src.iter().map(|m| m.ty.clone()).collect();
        let target = self.specialize(&dst.ty, &args);
        if !target.ptr_eq(self) {
            trace!(callable = %self.name(), target = %target.name(), "specialized");
        }
        target.instantiate_node(graph, dst, src, &args, kwds)
    }

    fn instantiate_node(
        &self,
        graph: &mut CallGraph,
        dst: &ArgMeta,
        src: &[ArgMeta],
        args: &[Type],
        kwds: &Kwds,
    ) -> Result<NodeId, CallError> {
        self.check_arity(src.len())?;
        match &self.0.kind {
            CallableKind::Leaf(leaf) => self.instantiate_leaf(leaf, graph, dst, src, args, kwds),
            CallableKind::Dispatch(d) => self.dispatch_target(d, args)?.instantiate(graph, dst, src, kwds),
            CallableKind::Permute(p) => p.instantiate(self, graph, dst, src, kwds),
            CallableKind::Lift(l) => l.instantiate(self, graph, dst, src, kwds),
            CallableKind::Reduce(r) => r.instantiate(self, graph, dst, src, kwds),
        }
    }

    fn scalar_of(&self, ty: &Type, position: ArgPosition) -> Result<ScalarKind, CallError> {
        ty.scalar_kind().ok_or_else(|| {
            self.mismatch(position, format!("kernel operates on scalar elements, found `{ty}`"))
        })
    }

    fn instantiate_leaf(
        &self,
        leaf: &Leaf,
        graph: &mut CallGraph,
        dst: &ArgMeta,
        src: &[ArgMeta],
        args: &[Type],
        kwds: &Kwds,
    ) -> Result<NodeId, CallError> {
        let sig = self.signature();
        let mut binding = TypeVarBinding::new();
        self.bind_params(&mut binding, args)?;

        let mut actual_src = Vec::with_capacity(src.len());
        let mut kernel_src = Vec::with_capacity(src.len());
        for (i, (p, a)) in sig.params.iter().zip(args).enumerate() {
            actual_src.push(self.scalar_of(a, ArgPosition::Src(i))?);
            let declared = binding
                .substitute(p)
                .map_err(|m| self.mismatch(ArgPosition::Src(i), m))?;
            kernel_src.push(self.scalar_of(&declared, ArgPosition::Src(i))?);
        }
        let ret = binding
            .substitute(&sig.ret)
            .map_err(|m| self.mismatch(ArgPosition::Dst, m))?;
        let (actual_dst, kernel_dst) = match (&dst.ty, &ret) {
            (Type::Void, Type::Void) => (None, None),
            (have, want) => (
                Some(self.scalar_of(have, ArgPosition::Dst)?),
                Some(self.scalar_of(want, ArgPosition::Dst)?),
            ),
        };

        let fns = match leaf.kernel {
            LeafKernel::Fixed(fns) => fns,
            LeafKernel::PerKind(factory) => {
                let kind = kernel_src.first().copied().or(kernel_dst);
                kind.and_then(factory).ok_or_else(|| CallError::NoMatchingOverload {
                    callable: self.name().to_string(),
                    types: joined(args),
                    position: ArgPosition::Src(0),
                })?
            }
        };
        let data = match leaf.data_init {
            Some(init) => init(&KernelSetup {
                kwds,
                src: &kernel_src,
                dst: kernel_dst,
            })?,
            None => NodeData::None,
        };

        let plan = ConvertPlan::between(&actual_src, &kernel_src, actual_dst, kernel_dst);
        if plan.is_identity() {
            return Ok(graph.push(fns, data));
        }
        trace!(callable = %self.name(), ?plan, "inserting conversion");
        let conv = graph.push(convert::CONVERT, NodeData::Convert(plan));
        let node = graph.push(fns, data);
        graph.adopt(conv, node);
        Ok(conv)
    }

    /// Resolves, allocates the destination (unless `dst` was passed),
    /// instantiates and executes.
    #[instrument(level = "debug", skip_all, fields(callable = %self.name()))]
    pub fn call(&self, args: &[Array], mut kwds: Kwds) -> Result<Array, CallError> {
        let types: Vec<Type> = args.iter().map(|a| a.ty().clone()).collect();
        let ret = self.resolve(None, &types, &kwds)?;
        let mut dst = match kwds.remove(DST) {
            Some(KwdValue::Array(a)) => a,
            _ => Array::zeros(&ret)?,
        };

        let mut graph = CallGraph::new();
        let src_meta: Vec<ArgMeta> = args.iter().map(Array::meta).collect();
        let root = self.instantiate(&mut graph, &dst.meta(), &src_meta, &kwds)?;
        debug!(ret = %ret, nodes = graph.len(), targets = ?graph.targets(), "instantiated");

        let dst_offset = dst.offset() as isize;
        let mut mem = Memory::new();
        let src_addrs: Vec<Addr> = args
            .iter()
            .map(|a| Addr::new(mem.shared(a.data()), a.offset() as isize))
            .collect();
        let out = mem.exclusive(dst.data_mut());
        graph.single(root, &mut mem, Addr::new(out, dst_offset), &src_addrs)?;
        drop(mem);
        Ok(dst)
    }
}
