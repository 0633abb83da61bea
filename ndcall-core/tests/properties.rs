use ndcall_core::kernels::arith::{Add, Subtract, binary_dispatch, binary_generic, binary_kernel};
use ndcall_core::{
    ArgMeta, Array, CallGraph, DispatchConfig, Dispatcher, ErrorKind, Kwds, ScalarKind, Type,
    TypeId, elwise, permute,
};
use proptest::prelude::*;

fn kind() -> impl Strategy<Value = ScalarKind> {
    prop::sample::select(ScalarKind::ALL.to_vec())
}

fn numeric() -> impl Strategy<Value = ScalarKind> {
    prop::sample::select(ScalarKind::NUMERIC.to_vec())
}

fn pair_of_vecs() -> impl Strategy<Value = (Vec<i32>, Vec<i32>)> {
    (0usize..32).prop_flat_map(|n| {
        (
            prop::collection::vec(any::<i32>(), n),
            prop::collection::vec(any::<i32>(), n),
        )
    })
}

proptest! {
    #[test]
    fn dispatch_is_deterministic(a in kind(), b in kind()) {
        let entries = ScalarKind::NUMERIC
            .iter()
            .enumerate()
            .map(|(i, k)| (vec![k.type_id(); 2], i));
        let d = Dispatcher::from_entries(entries, DispatchConfig::default()).unwrap();
        let key: Vec<TypeId> = vec![a.type_id(), b.type_id()];
        let first = d.dispatch(&key).ok().copied();
        for _ in 0..3 {
            prop_assert_eq!(d.dispatch(&key).ok().copied(), first);
        }
    }

    #[test]
    fn typevar_binds_once(a in numeric(), b in numeric()) {
        let add = binary_generic::<Add>().unwrap();
        let result = add.resolve(None, &[Type::Scalar(a), Type::Scalar(b)], &Kwds::new());
        if a == b {
            prop_assert_eq!(result.unwrap(), Type::Scalar(a));
        } else {
            prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::TypeMismatch);
        }
    }

    #[test]
    fn resolve_is_repeatable(a in numeric(), b in numeric(), shape in prop::collection::vec(1usize..5, 0..3)) {
        let add = elwise(&binary_dispatch::<Add>(&DispatchConfig::default()).unwrap());
        let args = [
            Type::with_shape(&shape, Type::Scalar(a)),
            Type::with_shape(&shape, Type::Scalar(b)),
        ];
        let first = add.resolve(None, &args, &Kwds::new()).map_err(|e| e.kind());
        let second = add.resolve(None, &args, &Kwds::new()).map_err(|e| e.kind());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn swapped_permutation_matches_direct_call((a, b) in pair_of_vecs()) {
        let sub = elwise(&binary_kernel::<Subtract>(ScalarKind::Int32).unwrap());
        let swapped = permute(&sub, &[1, 0]).unwrap();
        let (a, b) = (Array::from_vec(a), Array::from_vec(b));
        let direct = sub.call(&[b.clone(), a.clone()], Kwds::new()).unwrap();
        let permuted = swapped.call(&[a, b], Kwds::new()).unwrap();
        prop_assert_eq!(permuted, direct);
    }

    #[test]
    fn elementwise_add_wraps_like_scalars((a, b) in pair_of_vecs()) {
        let add = elwise(&binary_kernel::<Add>(ScalarKind::Int32).unwrap());
        let want: Vec<i32> = a.iter().zip(&b).map(|(x, y)| x.wrapping_add(*y)).collect();
        let out = add
            .call(&[Array::from_vec(a), Array::from_vec(b)], Kwds::new())
            .unwrap();
        prop_assert_eq!(out.to_vec::<i32>().unwrap(), want);
    }

    #[test]
    fn one_loop_node_per_lifted_dimension(shape in prop::collection::vec(1usize..4, 0..5)) {
        let add = elwise(&binary_kernel::<Add>(ScalarKind::Float64).unwrap());
        let meta = ArgMeta::contiguous(Type::with_shape(&shape, Type::Scalar(ScalarKind::Float64)));
        let mut graph = CallGraph::new();
        let root = add
            .instantiate(&mut graph, &meta, &[meta.clone(), meta.clone()], &Kwds::new())
            .unwrap();
        let chain = graph.chain(root);
        prop_assert_eq!(chain.len(), shape.len() + 1);
        prop_assert!(chain[..shape.len()].iter().all(|&k| k == "loop"));

        let order: Vec<u32> = graph.teardown().iter().map(|n| n.0).collect();
        let want: Vec<u32> = (0..=shape.len() as u32).rev().collect();
        prop_assert_eq!(order, want);
    }

    #[test]
    fn unregistered_overloads_fall_back(a in numeric(), b in numeric()) {
        let generic = binary_generic::<Add>().unwrap();
        let fast = binary_kernel::<Add>(ScalarKind::Int32).unwrap();
        let int32 = Type::Scalar(ScalarKind::Int32);
        generic.overload(int32.clone(), vec![int32.clone(), int32.clone()], fast.clone()).unwrap();

        let (ta, tb) = (Type::Scalar(a), Type::Scalar(b));
        let picked = generic.specialize(&ta, &[ta.clone(), tb]);
        if a == ScalarKind::Int32 && b == ScalarKind::Int32 {
            prop_assert!(picked.ptr_eq(&fast));
        } else {
            prop_assert!(picked.ptr_eq(&generic));
        }
    }
}
