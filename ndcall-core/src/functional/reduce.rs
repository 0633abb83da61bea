#![forbid(unsafe_code)]

use ndcall_types::{Signature, Type};

use crate::array::ArgMeta;
use crate::callable::{Callable, CallableKind};
use crate::error::{ArgPosition, CallError};
use crate::functional::lift::LOOP;
use crate::functional::permute::permute;
use crate::kernel::{
    CallGraph, DimLoop, KernelFns, KernelTargets, Node, NodeData, NodeId, strided_by_single,
};
use crate::kwds::Kwds;
use crate::memory::{Addr, Memory, Scalar};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Associativity {
    /// `dst = f(dst, x)`
    Left,
    /// `dst = f(x, dst)`
    Right,
}

/// Folds a binary callable over every element of its single argument.
#[derive(Clone, Debug)]
pub struct Reduce {
    fold: Callable,
    identity: Option<Scalar>,
}

/// Builds a full reduction of `child`. Without an identity the destination's
/// incoming value seeds the fold.
pub fn reduce(
    child: &Callable,
    associativity: Associativity,
    identity: Option<Scalar>,
) -> Result<Callable, CallError> {
    let name = format!("reduce({})", child.name());
    if child.arity() != 2 {
        return Err(CallError::registration(
            &name,
            format!("reductions need a binary callable, `{}` takes {}", child.name(), child.arity()),
        ));
    }
    let perm: [isize; 2] = match associativity {
        Associativity::Left => [-1, 0],
        Associativity::Right => [0, -1],
    };
    let fold = permute(child, &perm)?;
    let sig = child.signature();
    let signature = Signature::new(
        vec![Type::ellipsis(None, fold.signature().params[0].clone())],
        sig.ret.clone(),
    )
    .with_kwds(sig.kwds.clone());
    Ok(Callable::from_parts(name, signature, CallableKind::Reduce(Reduce { fold, identity })))
}

impl Reduce {
    pub fn fold(&self) -> &Callable {
        &self.fold
    }

    pub fn identity(&self) -> Option<Scalar> {
        self.identity
    }

    pub(crate) fn resolve(
        &self,
        owner: &Callable,
        dst: Option<&Type>,
        args: &[Type],
        kwds: &Kwds,
    ) -> Result<Type, CallError> {
        if let Some(d) = dst.filter(|d| d.is_dim()) {
            return Err(CallError::mismatch(
                owner.name(),
                ArgPosition::Dst,
                format!("a full reduction produces one element, found `{d}`"),
            ));
        }
        let elem = args[0].dtype().clone();
        self.fold.resolve_types(dst, &[elem], kwds)
    }

    pub(crate) fn instantiate(
        &self,
        owner: &Callable,
        graph: &mut CallGraph,
        dst: &ArgMeta,
        src: &[ArgMeta],
        kwds: &Kwds,
    ) -> Result<NodeId, CallError> {
        let acc = dst.ty.scalar_kind().ok_or_else(|| {
            CallError::mismatch(owner.name(), ArgPosition::Dst, format!("cannot accumulate into `{}`", dst.ty))
        })?;
        let arg = &src[0];
        let shape = arg.ty.shape().unwrap_or_default();
        let inner = arg
            .inner(shape.len())
            .ok_or_else(|| CallError::layout("argument 0 has fewer strides than dimensions"))?;

        let mark = graph.offset();
        let root = graph.push(
            FOLD,
            NodeData::Fold {
                identity: self.identity,
                acc,
            },
        );
        let mut parent = root;
        for (d, &extent) in shape.iter().enumerate() {
            let id = graph.push(
                LOOP,
                NodeData::Loop(DimLoop {
                    extent,
                    dst_stride: 0,
                    src_stride: vec![arg.strides[d]],
                    innermost: d + 1 == shape.len(),
                }),
            );
            graph.adopt(parent, id);
            parent = id;
        }
        match self.fold.instantiate(graph, dst, &[inner], kwds) {
            Ok(child) => {
                graph.adopt(parent, child);
                Ok(root)
            }
            Err(e) => {
                graph.rollback(mark);
                Err(CallError::instantiation(owner.name(), e))
            }
        }
    }
}

const FOLD: KernelFns = KernelFns {
    name: "fold",
    targets: KernelTargets::HostDevice,
    single: fold_single,
    strided: strided_by_single,
};

fn fold_single(node: Node<'_>, mem: &mut Memory<'_>, dst: Addr, src: &[Addr]) -> Result<(), CallError> {
    let NodeData::Fold { identity, acc } = node.data() else {
        return Err(CallError::execution("fold node without accumulator data"));
    };
    if let Some(v) = identity {
        mem.write_scalar(*acc, dst, *v)?;
    }
    node.child(0)?.single(mem, dst, src)
}
