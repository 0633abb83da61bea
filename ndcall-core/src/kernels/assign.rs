#![forbid(unsafe_code)]

use ndcall_types::{ScalarKind, Signature, Type};

use crate::callable::{Callable, KernelSetup, Leaf};
use crate::error::{ArgPosition, CallError};
use crate::functional::elwise;
use crate::kernel::{KernelFns, KernelTargets, Node, NodeData, strided_by_single};
use crate::memory::{Addr, Memory};

const CAST: KernelFns = KernelFns {
    name: "assign",
    targets: KernelTargets::HostDevice,
    single: cast_single,
    strided: strided_by_single,
};

fn cast_single(node: Node<'_>, mem: &mut Memory<'_>, dst: Addr, src: &[Addr]) -> Result<(), CallError> {
    let (NodeData::Cast { from, to }, [x]) = (node.data(), src) else {
        return Err(CallError::execution("assign expects cast data and one source"));
    };
    let v = mem.read_scalar(*from, *x)?;
    mem.write_scalar(*to, dst, v)
}

fn cast_init(setup: &KernelSetup<'_>) -> Result<NodeData, CallError> {
    match (setup.src, setup.dst) {
        ([from], Some(to)) => Ok(NodeData::Cast { from: *from, to }),
        _ => Err(CallError::mismatch(
            "assign",
            ArgPosition::Dst,
            "assignment needs one scalar source and a scalar destination",
        )),
    }
}

/// `(T) -> T` copy. Combined with `dst_tp` this is a lossless conversion,
/// the promotion node doing the work.
pub fn copy() -> Result<Callable, CallError> {
    let t = Type::typevar("T");
    Callable::leaf(
        "assign[T]",
        Signature::new(vec![t.clone()], t),
        Leaf::fixed(CAST).with_data_init(cast_init),
    )
}

/// Elementwise assignment from `src` to `dst` with `as` semantics, lossy
/// conversions included.
pub fn make_assignment(dst: ScalarKind, src: ScalarKind) -> Result<Callable, CallError> {
    let leaf = Callable::leaf(
        format!("assign[{src} -> {dst}]"),
        Signature::new(vec![Type::Scalar(src)], Type::Scalar(dst)),
        Leaf::fixed(CAST).with_data_init(cast_init),
    )?;
    Ok(elwise(&leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::kwds::{DST_TP, Kwds};

    #[test]
    fn lossy_assignment_truncates() {
        let f = make_assignment(ScalarKind::Int32, ScalarKind::Float64).unwrap();
        let out = f
            .call(&[Array::from_vec(vec![1.9f64, -2.7, 300.0])], Kwds::new())
            .unwrap();
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![1, -2, 300]);
    }

    #[test]
    fn copy_widens_through_dst_tp() {
        let f = elwise(&copy().unwrap());
        let kwds = Kwds::new().with(DST_TP, "3 * float64".parse::<Type>().unwrap());
        let out = f.call(&[Array::from_vec(vec![1i32, 2, 3])], kwds).unwrap();
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0]);

        let kwds = Kwds::new().with(DST_TP, "3 * int8".parse::<Type>().unwrap());
        assert!(f.call(&[Array::from_vec(vec![1i32, 2, 3])], kwds).is_err());
    }
}
