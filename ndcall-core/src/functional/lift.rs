#![forbid(unsafe_code)]

use ndcall_types::{Signature, Type};

use crate::array::ArgMeta;
use crate::callable::{Callable, CallableKind};
use crate::error::{ArgPosition, CallError};
use crate::kernel::{CallGraph, DimLoop, KernelFns, KernelTargets, Node, NodeData, NodeId, Strided};
use crate::kwds::Kwds;
use crate::memory::{Addr, Memory};

/// Applies a child elementwise over the outer dimensions of its arguments,
/// broadcasting them against each other.
#[derive(Clone, Debug)]
pub struct Lift {
    child: Callable,
}

/// Lifts `child` over any number of leading dimensions.
pub fn elwise(child: &Callable) -> Callable {
    let sig = child.signature();
    let params = sig
        .params
        .iter()
        .map(|p| Type::ellipsis(None, p.clone()))
        .collect();
    let signature = Signature::new(params, Type::ellipsis(None, sig.ret.clone()))
        .with_kwds(sig.kwds.clone());
    Callable::from_parts(
        format!("elwise({})", child.name()),
        signature,
        CallableKind::Lift(Lift {
            child: child.clone(),
        }),
    )
}

/// Lifts `child` to explicit outer argument types, e.g. `N * int32`.
pub fn lift_to(child: &Callable, lifted: Vec<Type>) -> Result<Callable, CallError> {
    let name = format!("lift({})", child.name());
    let sig = child.signature();
    if lifted.len() != sig.arity() {
        return Err(CallError::registration(
            &name,
            format!("{} lifted types for a child taking {} arguments", lifted.len(), sig.arity()),
        ));
    }
    for (i, (outer, inner)) in lifted.iter().zip(&sig.params).enumerate() {
        if outer.ndim() < fixed_ndim(inner) {
            return Err(CallError::registration(
                &name,
                format!("lifted type `{outer}` for argument {i} has fewer dimensions than `{inner}`"),
            ));
        }
    }
    let signature = Signature::new(lifted, Type::ellipsis(None, sig.ret.clone())).with_kwds(sig.kwds.clone());
    Ok(Callable::from_parts(
        name,
        signature,
        CallableKind::Lift(Lift {
            child: child.clone(),
        }),
    ))
}

/// Leading fixed or symbolic dimensions a child consumes itself.
fn fixed_ndim(ty: &Type) -> usize {
    let mut n = 0;
    let mut t = ty;
    while let Type::FixedDim { elem, .. } | Type::SymbolicDim { elem, .. } = t {
        n += 1;
        t = elem;
    }
    n
}

/// NumPy broadcasting: shapes are right-aligned and every dimension must
/// match or be 1. On failure, reports the index of the offending shape.
pub fn broadcast_shapes(shapes: &[Vec<usize>]) -> Result<Vec<usize>, (usize, String)> {
    let nd = shapes.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = vec![1; nd];
    for (i, shape) in shapes.iter().enumerate() {
        let pad = nd - shape.len();
        for (d, &n) in shape.iter().enumerate() {
            let o = &mut out[pad + d];
            if *o == 1 {
                *o = n;
            } else if n != 1 && n != *o {
                return Err((i, format!("dimension of size {n} cannot broadcast against {o}")));
            }
        }
    }
    Ok(out)
}

impl Lift {
    pub fn child(&self) -> &Callable {
        &self.child
    }

    pub(crate) fn resolve(
        &self,
        owner: &Callable,
        dst: Option<&Type>,
        args: &[Type],
        kwds: &Kwds,
    ) -> Result<Type, CallError> {
        let child_sig = self.child.signature();
        let mut binding = crate::resolve::TypeVarBinding::new();
        for (i, (p, a)) in owner.signature().params.iter().zip(args).enumerate() {
            binding
                .unify(p, a)
                .map_err(|m| CallError::mismatch(owner.name(), ArgPosition::Src(i), m))?;
        }

        let mut shapes = Vec::with_capacity(args.len());
        let mut inner_args = Vec::with_capacity(args.len());
        for (i, (a, p)) in args.iter().zip(&child_sig.params).enumerate() {
            let shape = a.shape().unwrap_or_default();
            let outer = shape.len().checked_sub(fixed_ndim(p)).ok_or_else(|| {
                CallError::mismatch(owner.name(), ArgPosition::Src(i), format!("`{a}` has too few dimensions for `{p}`"))
            })?;
            shapes.push(shape[..outer].to_vec());
            inner_args.push(a.strip_dims(outer).cloned().unwrap_or_else(|| a.clone()));
        }

        let inner_ret = fixed_ndim(&child_sig.ret);
        let (shape, inner_dst) = match dst {
            None => {
                let shape = broadcast_shapes(&shapes).map_err(|(i, m)| {
                    CallError::mismatch(owner.name(), ArgPosition::Src(i), m)
                })?;
                (shape, None)
            }
            Some(d) => {
                let ds = d.shape().unwrap_or_default();
                let outer = ds.len().checked_sub(inner_ret).ok_or_else(|| {
                    CallError::mismatch(owner.name(), ArgPosition::Dst, format!("`{d}` has too few dimensions"))
                })?;
                let target = ds[..outer].to_vec();
                shapes.push(target.clone());
                let n = shapes.len() - 1;
                let shape = broadcast_shapes(&shapes).map_err(|(i, m)| {
                    let position = if i == n { ArgPosition::Dst } else { ArgPosition::Src(i) };
                    CallError::mismatch(owner.name(), position, m)
                })?;
                if shape != target {
                    return Err(CallError::mismatch(
                        owner.name(),
                        ArgPosition::Dst,
                        format!("arguments broadcast to {shape:?}, destination has {target:?}"),
                    ));
                }
                (shape, d.strip_dims(outer))
            }
        };

        let child_ret = self.child.resolve_types(inner_dst, &inner_args, kwds)?;
        Ok(Type::with_shape(&shape, child_ret))
    }

    pub(crate) fn instantiate(
        &self,
        owner: &Callable,
        graph: &mut CallGraph,
        dst: &ArgMeta,
        src: &[ArgMeta],
        kwds: &Kwds,
    ) -> Result<NodeId, CallError> {
        let child_sig = self.child.signature();
        let dst_shape = dst.ty.shape().unwrap_or_default();
        let outer = dst_shape
            .len()
            .checked_sub(fixed_ndim(&child_sig.ret))
            .ok_or_else(|| CallError::mismatch(owner.name(), ArgPosition::Dst, "destination has too few dimensions"))?;

        let mut inner_src = Vec::with_capacity(src.len());
        let mut src_shapes = Vec::with_capacity(src.len());
        for (i, (m, p)) in src.iter().zip(&child_sig.params).enumerate() {
            let shape = m.ty.shape().unwrap_or_default();
            let own = shape
                .len()
                .checked_sub(fixed_ndim(p))
                .filter(|&n| n <= outer)
                .ok_or_else(|| {
                    CallError::mismatch(owner.name(), ArgPosition::Src(i), format!("`{}` does not fit the destination", m.ty))
                })?;
            let inner = m.inner(own).ok_or_else(|| {
                CallError::layout(format!("argument {i} has fewer strides than dimensions"))
            })?;
            inner_src.push(inner);
            src_shapes.push((shape, own));
        }
        let inner_dst = dst
            .inner(outer)
            .ok_or_else(|| CallError::layout("destination has fewer strides than dimensions"))?;

        if outer == 0 {
            return self
                .child
                .instantiate(graph, &inner_dst, &inner_src, kwds)
                .map_err(|e| CallError::instantiation(owner.name(), e));
        }

        let mut loops = Vec::with_capacity(outer);
        for (d, &extent) in dst_shape[..outer].iter().enumerate() {
            let mut src_stride = Vec::with_capacity(src.len());
            for (i, ((shape, own), m)) in src_shapes.iter().zip(src).enumerate() {
                let lead = outer - own;
                let stride = if d < lead {
                    0
                } else {
                    let sd = d - lead;
                    match shape[sd] {
                        n if n == extent => m.strides.get(sd).copied().unwrap_or(0),
                        1 => 0,
                        n => {
                            return Err(CallError::mismatch(
                                owner.name(),
                                ArgPosition::Src(i),
                                format!("dimension of size {n} cannot broadcast to {extent}"),
                            ));
                        }
                    }
                };
                src_stride.push(stride);
            }
            loops.push(DimLoop {
                extent,
                dst_stride: dst.strides.get(d).copied().unwrap_or(0),
                src_stride,
                innermost: d + 1 == outer,
            });
        }

        let mark = graph.offset();
        let mut ids: Vec<NodeId> = Vec::with_capacity(outer);
        for l in loops {
            let id = graph.push(LOOP, NodeData::Loop(l));
            if let Some(&parent) = ids.last() {
                graph.adopt(parent, id);
            }
            ids.push(id);
        }
        match self.child.instantiate(graph, &inner_dst, &inner_src, kwds) {
            Ok(child) => {
                if let Some(&last) = ids.last() {
                    graph.adopt(last, child);
                }
                Ok(ids[0])
            }
            Err(e) => {
                graph.rollback(mark);
                Err(CallError::instantiation(owner.name(), e))
            }
        }
    }
}

pub(crate) const LOOP: KernelFns = KernelFns {
    name: "loop",
    targets: KernelTargets::HostDevice,
    single: loop_single,
    strided: loop_strided,
};

fn dim_loop<'g>(node: &Node<'g>) -> Result<&'g DimLoop, CallError> {
    match node.data() {
        NodeData::Loop(l) => Ok(l),
        _ => Err(CallError::execution("loop node without loop data")),
    }
}

fn loop_single(node: Node<'_>, mem: &mut Memory<'_>, dst: Addr, src: &[Addr]) -> Result<(), CallError> {
    let l = dim_loop(&node)?;
    let child = node.child(0)?;
    if l.innermost {
        return child.strided(
            mem,
            Strided {
                dst,
                dst_stride: l.dst_stride,
                src,
                src_stride: &l.src_stride,
                count: l.extent,
            },
        );
    }
    let mut item = src.to_vec();
    for i in 0..l.extent as isize {
        for ((slot, base), stride) in item.iter_mut().zip(src).zip(&l.src_stride) {
            *slot = base.offset_by(i * stride);
        }
        child.single(mem, dst.offset_by(i * l.dst_stride), &item)?;
    }
    Ok(())
}

fn loop_strided(node: Node<'_>, mem: &mut Memory<'_>, args: Strided<'_>) -> Result<(), CallError> {
    let mut src = Vec::with_capacity(args.src.len());
    for k in 0..args.count {
        let dst = args.item(k, &mut src);
        loop_single(node, mem, dst, &src)?;
    }
    Ok(())
}
