use ndcall_core::kernels::arith::{Add, Multiply, Subtract, binary_generic, binary_kernel};
use ndcall_core::kernels::{arith, assign};
use ndcall_core::{
    ArgMeta, ArgPosition, Array, Associativity, CallError, CallGraph, Callable, DST, DST_TP,
    DispatchConfig, Dispatcher, ErrorKind, Kwds, NdcallConfig, Registry, ScalarKind, Scalar, Type,
    TypeId, elwise, lift_to, permute, reduce,
};

fn ty(s: &str) -> Type {
    s.parse().unwrap()
}

/// Elementwise add with a single int32 entry and no generic fallback.
fn int32_add() -> Result<Callable, CallError> {
    let entries = [(vec![TypeId::Int32; 2], binary_kernel::<Add>(ScalarKind::Int32)?)];
    let dispatcher = Dispatcher::from_entries(entries, DispatchConfig::default())
        .map_err(|_| CallError::registration("add", "duplicate key"))?;
    Ok(elwise(&Callable::dispatch("add", 2, dispatcher)?))
}

/// Every other int32 of `values`, as a strided view.
fn every_other(values: &[i32]) -> Array {
    let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let n = values.len().div_ceil(2);
    Array::from_raw_parts(Type::with_shape(&[n], Type::Scalar(ScalarKind::Int32)), data, 0, vec![8])
        .unwrap()
}

#[test]
fn strided_int32_add_allocates_its_destination() {
    let add = int32_add().unwrap();
    let a = every_other(&[1, -1, 2, -1, 3, -1, 4, -1, 5, -1]);
    let b = every_other(&[10, 0, 20, 0, 30, 0, 40, 0, 50, 0]);
    assert_eq!(a.strides(), &[8]);

    let out = add.call(&[a.clone(), b.clone()], Kwds::new()).unwrap();
    assert_eq!(out.ty(), &ty("5 * int32"));
    assert_eq!(out.to_vec::<i32>().unwrap(), vec![11, 22, 33, 44, 55]);

    let types = [a.ty().clone(), b.ty().clone()];
    let first = add.resolve(None, &types, &Kwds::new()).unwrap();
    let again = add.resolve(None, &types, &Kwds::new()).unwrap();
    assert_eq!(first, ty("5 * int32"));
    assert_eq!(first, again);
    assert_eq!(a.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn mixed_kinds_without_an_overload_do_not_match() {
    let add = int32_add().unwrap();
    let err = add
        .call(&[Array::from_vec(vec![1i32, 2]), Array::from_vec(vec![1.0f64, 2.0])], Kwds::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoMatchingOverload);
    assert_eq!(err.position(), Some(&ArgPosition::Src(1)));
}

#[test]
fn arity_is_checked_before_unification() {
    let add = int32_add().unwrap();
    let err = add.call(&[Array::from_vec(vec![1i32])], Kwds::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arity);
}

#[test]
fn typevar_bound_twice_must_agree() {
    let add = binary_generic::<Add>().unwrap();
    let err = add
        .resolve(None, &[ty("int32"), ty("int64")], &Kwds::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_eq!(err.position(), Some(&ArgPosition::Src(1)));
    assert_eq!(add.resolve(None, &[ty("int64"), ty("int64")], &Kwds::new()).unwrap(), ty("int64"));
}

#[test]
fn elementwise_broadcasting() {
    let registry = Registry::with_builtins(NdcallConfig::default()).unwrap();
    let sub = registry.get("subtract").unwrap();
    let rows = Array::from_shape_vec(&[2, 3], vec![10i64, 20, 30, 40, 50, 60]).unwrap();
    let cols = Array::from_shape_vec(&[2, 1], vec![1i64, 2]).unwrap();
    let out = sub.call(&[rows.clone(), cols], Kwds::new()).unwrap();
    assert_eq!(out.shape(), vec![2, 3]);
    assert_eq!(out.to_vec::<i64>().unwrap(), vec![9, 19, 29, 38, 48, 58]);

    let scalar = sub.call(&[rows.clone(), Array::scalar(10i64)], Kwds::new()).unwrap();
    assert_eq!(scalar.to_vec::<i64>().unwrap(), vec![0, 10, 20, 30, 40, 50]);

    let bad = Array::from_vec(vec![1i64, 2]);
    let err = sub.call(&[rows, bad], Kwds::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_eq!(err.position(), Some(&ArgPosition::Src(1)));
}

#[test]
fn builtin_dispatch_promotes_mixed_kinds() {
    let registry = Registry::with_builtins(NdcallConfig::default()).unwrap();
    let add = registry.get("add").unwrap();
    let out = add
        .call(&[Array::from_vec(vec![1i32, 2]), Array::from_vec(vec![0.5f64, 0.25])], Kwds::new())
        .unwrap();
    assert_eq!(out.ty(), &ty("2 * float64"));
    assert_eq!(out.to_vec::<f64>().unwrap(), vec![1.5, 2.25]);
}

#[test]
fn mixed_unsigned_kinds_promote_to_the_narrowest_common_kind() {
    let registry = Registry::with_builtins(NdcallConfig::default()).unwrap();
    let add = registry.get("add").unwrap();

    let out = add
        .call(&[Array::from_vec(vec![1u8, 2]), Array::from_vec(vec![3u16, 4])], Kwds::new())
        .unwrap();
    assert_eq!(out.ty(), &ty("2 * uint16"));
    assert_eq!(out.to_vec::<u16>().unwrap(), vec![4, 6]);

    let out = add
        .call(&[Array::from_vec(vec![7u16]), Array::from_vec(vec![u32::MAX - 7])], Kwds::new())
        .unwrap();
    assert_eq!(out.ty(), &ty("1 * uint32"));
    assert_eq!(out.to_vec::<u32>().unwrap(), vec![u32::MAX]);

    // A signed kind that holds both wins over the wider unsigned one.
    let out = add
        .call(&[Array::from_vec(vec![-1i8]), Array::from_vec(vec![200u8])], Kwds::new())
        .unwrap();
    assert_eq!(out.ty(), &ty("1 * int16"));
    assert_eq!(out.to_vec::<i16>().unwrap(), vec![199]);
}

#[test]
fn promotion_can_be_turned_off() {
    let mut config = NdcallConfig::default();
    config.dispatch.promotion = false;
    let add = elwise(&arith::binary_dispatch::<Add>(&config.dispatch).unwrap());
    let err = add
        .call(&[Array::scalar(1i32), Array::scalar(1.0f64)], Kwds::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoMatchingOverload);
}

#[test]
fn full_reductions() {
    let registry = Registry::with_builtins(NdcallConfig::default()).unwrap();
    let m = Array::from_shape_vec(&[2, 3], vec![1i32, 2, 3, 4, 5, 6]).unwrap();

    let sum = registry.get("sum").unwrap().call(&[m.clone()], Kwds::new()).unwrap();
    assert_eq!(sum.ty(), &ty("int32"));
    assert_eq!(sum.to_vec::<i32>().unwrap(), vec![21]);

    let prod = registry.get("prod").unwrap().call(&[m.clone()], Kwds::new()).unwrap();
    assert_eq!(prod.to_vec::<i32>().unwrap(), vec![720]);

    let kwds = Kwds::new().with(DST_TP, ty("float64"));
    let wide = registry.get("sum").unwrap().call(&[m], kwds).unwrap();
    assert_eq!(wide.to_vec::<f64>().unwrap(), vec![21.0]);

    let empty = Array::from_vec(Vec::<i32>::new());
    let none = registry.get("prod").unwrap().call(&[empty], Kwds::new()).unwrap();
    assert_eq!(none.to_vec::<i32>().unwrap(), vec![1]);
}

#[test]
fn reduction_without_identity_folds_into_dst() {
    let add = arith::binary_dispatch::<Add>(&DispatchConfig::default()).unwrap();
    let total = reduce(&add, Associativity::Left, None).unwrap();
    let kwds = Kwds::new().with(DST, Array::scalar(100i64));
    let out = total.call(&[Array::from_vec(vec![1i64, 2, 3])], kwds).unwrap();
    assert_eq!(out.to_vec::<i64>().unwrap(), vec![106]);
}

#[test]
fn right_fold_order_matters() {
    let sub = arith::binary_dispatch::<Subtract>(&DispatchConfig::default()).unwrap();
    let xs = Array::from_vec(vec![1i32, 2, 3]);
    // ((0 - 1) - 2) - 3
    let left = reduce(&sub, Associativity::Left, Some(Scalar::Int(0))).unwrap();
    assert_eq!(left.call(&[xs.clone()], Kwds::new()).unwrap().to_vec::<i32>().unwrap(), vec![-6]);
    // 3 - (2 - (1 - 0))
    let right = reduce(&sub, Associativity::Right, Some(Scalar::Int(0))).unwrap();
    assert_eq!(right.call(&[xs], Kwds::new()).unwrap().to_vec::<i32>().unwrap(), vec![2]);
}

#[test]
fn dst_tp_widens_and_rejects_narrowing() {
    let add = int32_add().unwrap();
    let args = [Array::from_vec(vec![1i32, 2]), Array::from_vec(vec![3i32, 4])];

    let out = add.call(&args, Kwds::new().with(DST_TP, ty("2 * int64"))).unwrap();
    assert_eq!(out.ty(), &ty("2 * int64"));
    assert_eq!(out.to_vec::<i64>().unwrap(), vec![4, 6]);

    let err = add.call(&args, Kwds::new().with(DST_TP, ty("2 * int16"))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_eq!(err.position(), Some(&ArgPosition::Keyword(DST_TP.into())));
}

#[test]
fn misshaped_dst_tp_is_reported_at_the_keyword() {
    let add = int32_add().unwrap();
    let types = [ty("2 * int32"), ty("2 * int32")];
    let err = add
        .resolve(None, &types, &Kwds::new().with(DST_TP, ty("3 * int32")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_eq!(err.position(), Some(&ArgPosition::Keyword(DST_TP.into())));

    // Without a keyword the hint is the destination itself.
    let err = add.resolve(Some(&ty("3 * int32")), &types, &Kwds::new()).unwrap_err();
    assert_eq!(err.position(), Some(&ArgPosition::Dst));
}

#[test]
fn widening_dst_tp_computes_in_the_matched_kind() {
    let registry = Registry::with_builtins(NdcallConfig::default()).unwrap();

    // Elementwise: the int32 kernel runs, then its result is widened.
    let add = registry.get("add").unwrap();
    let out = add
        .call(
            &[Array::from_vec(vec![i32::MAX]), Array::from_vec(vec![1i32])],
            Kwds::new().with(DST_TP, ty("1 * int64")),
        )
        .unwrap();
    assert_eq!(out.to_vec::<i64>().unwrap(), vec![i64::from(i32::MIN)]);

    // Full reduction: the accumulator slot is the destination, so the fold
    // dispatches on int64.
    let sum = registry.get("sum").unwrap();
    let out = sum
        .call(&[Array::from_vec(vec![i32::MAX, 1])], Kwds::new().with(DST_TP, ty("int64")))
        .unwrap();
    assert_eq!(out.to_vec::<i64>().unwrap(), vec![i64::from(i32::MAX) + 1]);
}

#[test]
fn dst_array_is_written_in_place() {
    let add = int32_add().unwrap();
    let dst = Array::from_vec(vec![0i32; 3]);
    let out = add
        .call(
            &[Array::from_vec(vec![1i32, 2, 3]), Array::scalar(1i32)],
            Kwds::new().with(DST, dst),
        )
        .unwrap();
    assert_eq!(out.to_vec::<i32>().unwrap(), vec![2, 3, 4]);

    let wrong = Array::from_vec(vec![0i32; 4]);
    let err = add
        .call(&[Array::from_vec(vec![1i32, 2, 3]), Array::scalar(1i32)], Kwds::new().with(DST, wrong))
        .unwrap_err();
    assert_eq!(err.position(), Some(&ArgPosition::Keyword(DST.into())));
}

#[test]
fn swapped_arguments_match_the_child() {
    let sub = elwise(&arith::binary_dispatch::<Subtract>(&DispatchConfig::default()).unwrap());
    let swapped = permute(&sub, &[1, 0]).unwrap();
    let a = Array::from_vec(vec![10i32, 20]);
    let b = Array::from_vec(vec![1i32, 2]);
    let direct = sub.call(&[b.clone(), a.clone()], Kwds::new()).unwrap();
    let permuted = swapped.call(&[a, b], Kwds::new()).unwrap();
    assert_eq!(permuted, direct);
    assert_eq!(permuted.to_vec::<i32>().unwrap(), vec![-9, -18]);
}

#[test]
fn destination_slot_accumulates_across_calls() {
    let acc = elwise(&permute(&binary_kernel::<Add>(ScalarKind::Int32).unwrap(), &[-1, 0]).unwrap());
    let x = Array::from_vec(vec![1i32, 2, 3]);
    let mut running = Array::from_vec(vec![0i32; 3]);
    for _ in 0..3 {
        running = acc.call(&[x.clone()], Kwds::new().with(DST, running)).unwrap();
    }
    assert_eq!(running.to_vec::<i32>().unwrap(), vec![3, 6, 9]);
}

#[test]
fn failed_instantiation_releases_its_nodes() {
    let mut graph = CallGraph::new();
    let add = int32_add().unwrap();
    let meta = ArgMeta::contiguous(ty("4 * int32"));
    add.instantiate(&mut graph, &meta, &[meta.clone(), meta.clone()], &Kwds::new())
        .unwrap();
    let mark = graph.offset();

    // `factor` is only read when the leaf's node data is built.
    let scale = elwise(&arith::scale().unwrap());
    let err = scale
        .instantiate(&mut graph, &meta, &[meta.clone()], &Kwds::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Instantiation);
    assert_eq!(err.root_cause().kind(), ErrorKind::Arity);
    assert_eq!(err.position(), Some(&ArgPosition::Keyword("factor".into())));
    assert_eq!(graph.offset(), mark);
}

#[test]
fn lifted_depth_matches_node_count() {
    let leaf = binary_kernel::<Multiply>(ScalarKind::Float32).unwrap();
    let lifted = lift_to(&leaf, vec![ty("... * float32"), ty("... * float32")]).unwrap();
    let meta = ArgMeta::contiguous(ty("2 * 3 * 4 * float32"));
    let mut graph = CallGraph::new();
    let root = lifted
        .instantiate(&mut graph, &meta, &[meta.clone(), meta.clone()], &Kwds::new())
        .unwrap();
    assert_eq!(graph.chain(root), vec!["loop", "loop", "loop", "multiply"]);

    let order = graph.teardown();
    let ids: Vec<u32> = order.iter().map(|n| n.0).collect();
    assert_eq!(ids, vec![3, 2, 1, 0]);
}

#[test]
fn overloads_take_precedence() {
    let generic = binary_generic::<Add>().unwrap();
    let fast = binary_kernel::<Multiply>(ScalarKind::Int32).unwrap();
    generic
        .overload(ty("int32"), vec![ty("int32"), ty("int32")], fast.clone())
        .unwrap();

    assert!(generic.specialize(&ty("int32"), &[ty("int32"), ty("int32")]).ptr_eq(&fast));
    assert!(generic.specialize(&ty("int64"), &[ty("int64"), ty("int64")]).ptr_eq(&generic));

    // the overload multiplies, which makes it observable
    let out = generic.call(&[Array::scalar(3i32), Array::scalar(4i32)], Kwds::new()).unwrap();
    assert_eq!(out.to_vec::<i32>().unwrap(), vec![12]);
    let out = generic.call(&[Array::scalar(3i64), Array::scalar(4i64)], Kwds::new()).unwrap();
    assert_eq!(out.to_vec::<i64>().unwrap(), vec![7]);

    let err = generic.overload(ty("int32"), vec![ty("int32")], fast).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Registration);
}

#[test]
fn lossy_assignment_and_scale() {
    let to_u8 = assign::make_assignment(ScalarKind::UInt8, ScalarKind::Int32).unwrap();
    let out = to_u8.call(&[Array::from_vec(vec![1i32, 256, -1])], Kwds::new()).unwrap();
    assert_eq!(out.to_vec::<u8>().unwrap(), vec![1, 0, 255]);

    let registry = Registry::with_builtins(NdcallConfig::default()).unwrap();
    let scale = registry.get("scale").unwrap();
    let out = scale
        .call(&[Array::from_vec(vec![1.0f32, -2.0])], Kwds::new().with("factor", 0.5))
        .unwrap();
    assert_eq!(out.to_vec::<f32>().unwrap(), vec![0.5, -1.0]);
    let out = scale
        .call(&[Array::from_vec(vec![1.0f32, 2.0])], Kwds::new().with("factor", 2i64))
        .unwrap();
    assert_eq!(out.to_vec::<f32>().unwrap(), vec![2.0, 4.0]);

    let err = scale
        .call(&[Array::from_vec(vec![1.0f32])], Kwds::new().with("factor", 0.5).with("bias", 1.0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arity);
    assert_eq!(err.position(), Some(&ArgPosition::Keyword("bias".into())));
}

#[test]
fn concurrent_calls_share_one_callable() {
    let add = int32_add().unwrap();
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4i32)
            .map(|t| {
                let add = &add;
                s.spawn(move || {
                    let a = Array::from_vec(vec![t; 64]);
                    let b = Array::from_vec((0..64).collect::<Vec<i32>>());
                    add.call(&[a, b], Kwds::new()).map(|out| (t, out))
                })
            })
            .collect();
        for h in handles {
            let (t, out) = h.join().unwrap().unwrap();
            let want: Vec<i32> = (0..64).map(|i| i + t).collect();
            assert_eq!(out.to_vec::<i32>().unwrap(), want);
        }
    });
}
