#![forbid(unsafe_code)]

//! Promotion node inserted in front of a leaf whose declared element kinds
//! differ from the actual ones.

use crate::error::CallError;
use crate::kernel::{KernelFns, KernelTargets, Node, NodeData, strided_by_single};
use crate::memory::{Addr, Memory};

/// Scratch is host memory. The strided entry goes element by element so a
/// destination aliased by a source slot is observed after every update.
pub(crate) const CONVERT: KernelFns = KernelFns {
    name: "convert",
    targets: KernelTargets::Host,
    single: convert_single,
    strided: strided_by_single,
};

fn convert_single(node: Node<'_>, mem: &mut Memory<'_>, dst: Addr, src: &[Addr]) -> Result<(), CallError> {
    let NodeData::Convert(plan) = node.data() else {
        return Err(CallError::execution("convert node without a plan"));
    };
    let child = node.child(0)?;

    let mut child_src = Vec::with_capacity(src.len());
    for (slot, (&addr, conv)) in src.iter().zip(&plan.src).enumerate() {
        match conv {
            None => child_src.push(addr),
            Some((from, to)) => {
                let tmp = Addr::new(mem.scratch(node.id(), slot, to.size()), 0);
                let v = mem.read_scalar(*from, addr)?;
                mem.write_scalar(*to, tmp, v)?;
                child_src.push(tmp);
            }
        }
    }

    let Some((actual, kernel)) = plan.dst else {
        return child.single(mem, dst, &child_src);
    };
    // The child may read the destination (accumulators), so seed the
    // scratch with its current value.
    let tmp = Addr::new(mem.scratch(node.id(), src.len(), kernel.size()), 0);
    let v = mem.read_scalar(actual, dst)?;
    mem.write_scalar(kernel, tmp, v)?;
    child.single(mem, tmp, &child_src)?;
    let v = mem.read_scalar(kernel, tmp)?;
    mem.write_scalar(actual, dst, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{CallGraph, ConvertPlan};
    use crate::kernels::arith::{Add, binary_fns};
    use ndcall_types::ScalarKind;

    #[test]
    fn promotes_sources_before_the_child_runs() {
        use ScalarKind::*;
        let mut g = CallGraph::new();
        let plan = ConvertPlan::between(&[Int16, Int32], &[Int32, Int32], Some(Int64), Some(Int32));
        let conv = g.push(CONVERT, NodeData::Convert(plan));
        let add = g.push(binary_fns::<Add>(Int32).unwrap(), NodeData::None);
        g.adopt(conv, add);

        let a = (-7i16).to_le_bytes();
        let b = 100i32.to_le_bytes();
        let mut out = [0u8; 8];
        let mut mem = Memory::new();
        let ra = mem.shared(&a);
        let rb = mem.shared(&b);
        let rd = mem.exclusive(&mut out);
        g.single(conv, &mut mem, Addr::new(rd, 0), &[Addr::new(ra, 0), Addr::new(rb, 0)])
            .unwrap();
        assert_eq!(mem.read::<i64>(Addr::new(rd, 0)).unwrap(), 93);
    }
}
