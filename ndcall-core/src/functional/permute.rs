#![forbid(unsafe_code)]

use ndcall_types::{Signature, Type};

use crate::array::ArgMeta;
use crate::callable::{Callable, CallableKind};
use crate::error::{ArgPosition, CallError};
use crate::kernel::{CallGraph, KernelFns, KernelTargets, Node, NodeData, NodeId, Strided};
use crate::kwds::Kwds;
use crate::memory::{Addr, Memory};

/// Reorders arguments before handing them to a child. Child slot `k` reads
/// outer source `perm[k]`; a slot holding `-1` reads the destination, which
/// turns the child into an accumulator `dst = f(.., dst, ..)`.
#[derive(Clone, Debug)]
pub struct Permute {
    child: Callable,
    perm: Vec<isize>,
    with_dst: bool,
}

/// Builds a permuted view of `child`. `perm` has one entry per child
/// parameter, names each outer source exactly once, and holds at most one
/// `-1`.
pub fn permute(child: &Callable, perm: &[isize]) -> Result<Callable, CallError> {
    let name = format!("permute({})", child.name());
    let n = child.arity();
    if perm.len() != n {
        return Err(CallError::registration(
            &name,
            format!("permutation has {} entries but `{}` takes {n} arguments", perm.len(), child.name()),
        ));
    }
    if let Some(bad) = perm.iter().find(|&&j| j < -1) {
        return Err(CallError::registration(&name, format!("entry {bad} is out of range")));
    }
    let dst_slots = perm.iter().filter(|&&j| j == -1).count();
    if dst_slots > 1 {
        return Err(CallError::registration(&name, "at most one slot may read the destination"));
    }
    let outer = n - dst_slots;
    let mut seen = vec![false; outer];
    for &j in perm.iter().filter(|&&j| j >= 0) {
        let j = j as usize;
        if j >= outer || seen[j] {
            return Err(CallError::registration(
                &name,
                format!("entries must name each of the {outer} sources exactly once"),
            ));
        }
        seen[j] = true;
    }

    let sig = child.signature();
    let mut params = vec![Type::Any; outer];
    for (k, &j) in perm.iter().enumerate() {
        if j >= 0 {
            params[j as usize] = sig.params[k].clone();
        }
    }
    let signature = Signature::new(params, sig.ret.clone()).with_kwds(sig.kwds.clone());
    Ok(Callable::from_parts(
        name,
        signature,
        CallableKind::Permute(Permute {
            child: child.clone(),
            perm: perm.to_vec(),
            with_dst: dst_slots == 1,
        }),
    ))
}

impl Permute {
    pub fn child(&self) -> &Callable {
        &self.child
    }

    pub fn perm(&self) -> &[isize] {
        &self.perm
    }

    pub fn with_dst(&self) -> bool {
        self.with_dst
    }

    /// Maps a child argument position to the outer one.
    fn outer_position(&self, position: ArgPosition) -> ArgPosition {
        match position {
            ArgPosition::Src(k) => match self.perm.get(k) {
                Some(&j) if j < 0 => ArgPosition::Dst,
                Some(&j) => ArgPosition::Src(j as usize),
                None => ArgPosition::Src(k),
            },
            other => other,
        }
    }

    pub(crate) fn resolve(
        &self,
        owner: &Callable,
        dst: Option<&Type>,
        args: &[Type],
        kwds: &Kwds,
    ) -> Result<Type, CallError> {
        let mut slots: Vec<Option<Type>> = self
            .perm
            .iter()
            .map(|&j| (j >= 0).then(|| args[j as usize].clone()))
            .collect();

        let dst_ty = match (self.with_dst, dst) {
            (false, _) => None,
            (true, Some(d)) => Some(d.clone()),
            (true, None) => {
                let slot = self.perm.iter().position(|&j| j < 0).unwrap_or(0);
                let inferred = self.child.infer_param(&slots, slot).ok_or_else(|| {
                    CallError::mismatch(
                        owner.name(),
                        ArgPosition::Dst,
                        "cannot infer the destination type; pass `dst_tp`",
                    )
                })?;
                Some(inferred)
            }
        };
        if let Some(d) = &dst_ty {
            for s in slots.iter_mut().filter(|s| s.is_none()) {
                *s = Some(d.clone());
            }
        }
        let child_args: Vec<Type> = slots.into_iter().flatten().collect();
        let child_dst = dst_ty.as_ref().or(dst);

        let ret = self
            .child
            .resolve_types(child_dst, &child_args, kwds)
            .map_err(|e| e.map_position(&|p| self.outer_position(p)))?;

        match dst_ty {
            None => Ok(ret),
            Some(d) if ret.can_promote_to(&d) => Ok(d),
            Some(d) => Err(CallError::mismatch(
                owner.name(),
                ArgPosition::Dst,
                format!("`{}` produces `{ret}`, which cannot accumulate into `{d}`", self.child.name()),
            )),
        }
    }

    pub(crate) fn instantiate(
        &self,
        owner: &Callable,
        graph: &mut CallGraph,
        dst: &ArgMeta,
        src: &[ArgMeta],
        kwds: &Kwds,
    ) -> Result<NodeId, CallError> {
        let child_src: Vec<ArgMeta> = self
            .perm
            .iter()
            .map(|&j| if j < 0 { dst.clone() } else { src[j as usize].clone() })
            .collect();

        let mark = graph.offset();
        let node = graph.push(PERMUTE, NodeData::Permutation(self.perm.clone()));
        match self.child.instantiate(graph, dst, &child_src, kwds) {
            Ok(child) => {
                graph.adopt(node, child);
                Ok(node)
            }
            Err(e) => {
                graph.rollback(mark);
                let e = e.map_position(&|p| self.outer_position(p));
                Err(CallError::instantiation(owner.name(), e))
            }
        }
    }
}

const PERMUTE: KernelFns = KernelFns {
    name: "permute",
    targets: KernelTargets::HostDevice,
    single: permute_single,
    strided: permute_strided,
};

fn permutation<'g>(node: &Node<'g>) -> Result<&'g [isize], CallError> {
    match node.data() {
        NodeData::Permutation(perm) => Ok(perm),
        _ => Err(CallError::execution("permute node without a permutation")),
    }
}

fn source<T: Copy>(items: &[T], j: usize) -> Result<T, CallError> {
    items
        .get(j)
        .copied()
        .ok_or_else(|| CallError::execution(format!("permutation reads missing source {j}")))
}

fn permute_single(node: Node<'_>, mem: &mut Memory<'_>, dst: Addr, src: &[Addr]) -> Result<(), CallError> {
    let perm = permutation(&node)?;
    let child_src = perm
        .iter()
        .map(|&j| if j < 0 { Ok(dst) } else { source(src, j as usize) })
        .collect::<Result<Vec<_>, _>>()?;
    node.child(0)?.single(mem, dst, &child_src)
}

fn permute_strided(node: Node<'_>, mem: &mut Memory<'_>, args: Strided<'_>) -> Result<(), CallError> {
    let perm = permutation(&node)?;
    let mut child_src = Vec::with_capacity(perm.len());
    let mut child_stride = Vec::with_capacity(perm.len());
    for &j in perm {
        if j < 0 {
            child_src.push(args.dst);
            child_stride.push(args.dst_stride);
        } else {
            child_src.push(source(args.src, j as usize)?);
            child_stride.push(source(args.src_stride, j as usize)?);
        }
    }
    node.child(0)?.strided(
        mem,
        Strided {
            dst: args.dst,
            dst_stride: args.dst_stride,
            src: &child_src,
            src_stride: &child_stride,
            count: args.count,
        },
    )
}
