use ndcall_types::{parse_signature, parse_type, ScalarKind, Signature, Type, TypeId};
use proptest::prelude::*;

#[test]
fn signature_round_trips_through_display() {
    let src = "(Dims... * T, N * uint8, 4 * Any, axis: ?int64, out: float32) -> Dims... * T";
    let sig: Signature = src.parse().expect("parse");
    assert_eq!(sig.to_string(), src);
    assert_eq!(
        sig.type_vars().into_iter().collect::<Vec<_>>(),
        vec!["Dims".to_string(), "N".to_string(), "T".to_string()]
    );
    assert!(sig.is_generic());
}

#[test]
fn concrete_signature_is_not_generic() {
    let sig = parse_signature("(int32, int32) -> int32").expect("parse");
    assert!(!sig.is_generic());
    assert_eq!(sig.arity(), 2);
    assert_eq!(sig.ret.type_id(), TypeId::Int32);
}

#[test]
fn error_span_points_at_offending_token() {
    let err = parse_type("5 * blob").unwrap_err();
    assert_eq!(err.span.offset(), 4);
    assert_eq!(err.span.len(), 4);
}

#[test]
fn missing_arrow_is_reported() {
    let err = parse_signature("(int32) int32").unwrap_err();
    assert!(err.message.contains("'->'"));
}

fn concrete_type() -> impl Strategy<Value = Type> {
    let scalar = prop::sample::select(ScalarKind::ALL.to_vec()).prop_map(Type::Scalar);
    (prop::collection::vec(1usize..9, 0..4), scalar)
        .prop_map(|(shape, elem)| Type::with_shape(&shape, elem))
}

proptest! {
    #[test]
    fn concrete_types_round_trip(ty in concrete_type()) {
        let printed = ty.to_string();
        let parsed = parse_type(&printed).expect("parse printed type");
        prop_assert_eq!(parsed, ty);
    }

    #[test]
    fn promotion_is_reflexive(ty in concrete_type()) {
        prop_assert!(ty.can_promote_to(&ty));
    }
}
