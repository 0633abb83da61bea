#![forbid(unsafe_code)]

use ndcall_types::{KwdParam, ScalarKind, Signature, Type};

use crate::callable::{Callable, KernelSetup, Leaf};
use crate::config::DispatchConfig;
use crate::error::{ArgPosition, CallError};
use crate::kernel::{KernelFns, KernelTargets, Node, NodeData, Strided, strided_by_single};
use crate::kwds::{KwdValue, Kwds};
use crate::memory::{Addr, Element, Memory, Scalar};

use super::{dispatcher_of, make_all, make_all_if};

/// Element types with arithmetic. Integer arithmetic wraps.
pub trait Numeric: Element + PartialOrd {
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn div(self, rhs: Self) -> Result<Self, &'static str>;
    fn neg(self) -> Self;
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Numeric for $t {
                fn add(self, rhs: Self) -> Self { self.wrapping_add(rhs) }
                fn sub(self, rhs: Self) -> Self { self.wrapping_sub(rhs) }
                fn mul(self, rhs: Self) -> Self { self.wrapping_mul(rhs) }
                fn div(self, rhs: Self) -> Result<Self, &'static str> {
                    if rhs == 0 {
                        return Err("integer division by zero");
                    }
                    Ok(self.wrapping_div(rhs))
                }
                fn neg(self) -> Self { self.wrapping_neg() }
            }
        )*
    };
}

macro_rules! impl_float {
    ($($t:ty),*) => {
        $(
            impl Numeric for $t {
                fn add(self, rhs: Self) -> Self { self + rhs }
                fn sub(self, rhs: Self) -> Self { self - rhs }
                fn mul(self, rhs: Self) -> Self { self * rhs }
                fn div(self, rhs: Self) -> Result<Self, &'static str> { Ok(self / rhs) }
                fn neg(self) -> Self { -self }
            }
        )*
    };
}

impl_int!(i8, i16, i32, i64, u8, u16, u32, u64);
impl_float!(f32, f64);

/// Like `with_element!`, restricted to kinds with arithmetic; `bool`
/// yields `None`.
macro_rules! with_numeric {
    ($kind:expr, $T:ident => $body:expr) => {
        match $kind {
            ScalarKind::Bool => None,
            ScalarKind::Int8 => {
                type $T = i8;
                Some($body)
            }
            ScalarKind::Int16 => {
                type $T = i16;
                Some($body)
            }
            ScalarKind::Int32 => {
                type $T = i32;
                Some($body)
            }
            ScalarKind::Int64 => {
                type $T = i64;
                Some($body)
            }
            ScalarKind::UInt8 => {
                type $T = u8;
                Some($body)
            }
            ScalarKind::UInt16 => {
                type $T = u16;
                Some($body)
            }
            ScalarKind::UInt32 => {
                type $T = u32;
                Some($body)
            }
            ScalarKind::UInt64 => {
                type $T = u64;
                Some($body)
            }
            ScalarKind::Float32 => {
                type $T = f32;
                Some($body)
            }
            ScalarKind::Float64 => {
                type $T = f64;
                Some($body)
            }
        }
    };
}

pub trait BinaryOp: 'static {
    const NAME: &'static str;
    fn apply<T: Numeric>(a: T, b: T) -> Result<T, &'static str>;
}

pub struct Add;
pub struct Subtract;
pub struct Multiply;
pub struct Divide;
pub struct Maximum;
pub struct Minimum;

impl BinaryOp for Add {
    const NAME: &'static str = "add";
    fn apply<T: Numeric>(a: T, b: T) -> Result<T, &'static str> {
        Ok(a.add(b))
    }
}

impl BinaryOp for Subtract {
    const NAME: &'static str = "subtract";
    fn apply<T: Numeric>(a: T, b: T) -> Result<T, &'static str> {
        Ok(a.sub(b))
    }
}

impl BinaryOp for Multiply {
    const NAME: &'static str = "multiply";
    fn apply<T: Numeric>(a: T, b: T) -> Result<T, &'static str> {
        Ok(a.mul(b))
    }
}

impl BinaryOp for Divide {
    const NAME: &'static str = "divide";
    fn apply<T: Numeric>(a: T, b: T) -> Result<T, &'static str> {
        a.div(b)
    }
}

impl BinaryOp for Maximum {
    const NAME: &'static str = "maximum";
    fn apply<T: Numeric>(a: T, b: T) -> Result<T, &'static str> {
        Ok(if a >= b { a } else { b })
    }
}

impl BinaryOp for Minimum {
    const NAME: &'static str = "minimum";
    fn apply<T: Numeric>(a: T, b: T) -> Result<T, &'static str> {
        Ok(if a <= b { a } else { b })
    }
}

fn binary_single<T: Numeric, Op: BinaryOp>(
    _: Node<'_>,
    mem: &mut Memory<'_>,
    dst: Addr,
    src: &[Addr],
) -> Result<(), CallError> {
    let [a, b] = src else {
        return Err(CallError::execution("binary kernel expects two sources"));
    };
    let v = Op::apply(mem.read::<T>(*a)?, mem.read::<T>(*b)?).map_err(CallError::execution)?;
    mem.write(dst, v)
}

fn binary_strided<T: Numeric, Op: BinaryOp>(
    _: Node<'_>,
    mem: &mut Memory<'_>,
    args: Strided<'_>,
) -> Result<(), CallError> {
    let ([a, b], [sa, sb]) = (args.src, args.src_stride) else {
        return Err(CallError::execution("binary kernel expects two sources"));
    };
    for k in 0..args.count as isize {
        let x = mem.read::<T>(a.offset_by(k * sa))?;
        let y = mem.read::<T>(b.offset_by(k * sb))?;
        let v = Op::apply(x, y).map_err(CallError::execution)?;
        mem.write(args.dst.offset_by(k * args.dst_stride), v)?;
    }
    Ok(())
}

pub fn binary_fns<Op: BinaryOp>(kind: ScalarKind) -> Option<KernelFns> {
    with_numeric!(kind, T => KernelFns {
        name: Op::NAME,
        targets: KernelTargets::HostDevice,
        single: binary_single::<T, Op>,
        strided: binary_strided::<T, Op>,
    })
}

/// `(k, k) -> k` for one kind.
pub fn binary_kernel<Op: BinaryOp>(kind: ScalarKind) -> Result<Callable, CallError> {
    let fns = binary_fns::<Op>(kind)
        .ok_or_else(|| CallError::registration(Op::NAME, format!("no kernel for {kind}")))?;
    let t = Type::Scalar(kind);
    Callable::leaf(
        format!("{}[{kind}]", Op::NAME),
        Signature::new(vec![t.clone(), t.clone()], t),
        Leaf::fixed(fns),
    )
}

/// `(T, T) -> T`, picking the kernel once `T` is known.
pub fn binary_generic<Op: BinaryOp>() -> Result<Callable, CallError> {
    let t = Type::typevar("T");
    Callable::leaf(
        format!("{}[T]", Op::NAME),
        Signature::new(vec![t.clone(), t.clone()], t),
        Leaf::per_kind(binary_fns::<Op>),
    )
}

/// Dispatches over every numeric kind.
pub fn binary_dispatch<Op: BinaryOp>(config: &DispatchConfig) -> Result<Callable, CallError> {
    let entries = make_all(&ScalarKind::NUMERIC, |k| {
        Ok((vec![k.type_id(); 2], binary_kernel::<Op>(k)?))
    })?;
    let dispatcher = dispatcher_of(Op::NAME, entries, config)?;
    Callable::dispatch(Op::NAME, 2, dispatcher)
}

fn negative_single<T: Numeric>(
    _: Node<'_>,
    mem: &mut Memory<'_>,
    dst: Addr,
    src: &[Addr],
) -> Result<(), CallError> {
    let [x] = src else {
        return Err(CallError::execution("unary kernel expects one source"));
    };
    let v = mem.read::<T>(*x)?;
    mem.write(dst, v.neg())
}

pub fn negative_fns(kind: ScalarKind) -> Option<KernelFns> {
    with_numeric!(kind, T => KernelFns {
        name: "negative",
        targets: KernelTargets::HostDevice,
        single: negative_single::<T>,
        strided: strided_by_single,
    })
}

/// Negation over signed and floating kinds.
pub fn negative_dispatch(config: &DispatchConfig) -> Result<Callable, CallError> {
    let entries = make_all_if(
        &ScalarKind::NUMERIC,
        |k| !k.is_unsigned(),
        |k| {
            let fns = negative_fns(k)
                .ok_or_else(|| CallError::registration("negative", format!("no kernel for {k}")))?;
            let t = Type::Scalar(k);
            let leaf = Callable::leaf(
                format!("negative[{k}]"),
                Signature::new(vec![t.clone()], t),
                Leaf::fixed(fns),
            )?;
            Ok((vec![k.type_id()], leaf))
        },
    )?;
    let dispatcher = dispatcher_of("negative", entries, config)?;
    Callable::dispatch("negative", 1, dispatcher)
}

fn scale_single<T: Numeric>(
    node: Node<'_>,
    mem: &mut Memory<'_>,
    dst: Addr,
    src: &[Addr],
) -> Result<(), CallError> {
    let (NodeData::Scalar(factor), [x]) = (node.data(), src) else {
        return Err(CallError::execution("scale expects a factor and one source"));
    };
    let v: f64 = mem.read::<T>(*x)?.to_scalar().cast();
    let scaled = Scalar::Float(v * factor.cast::<f64>());
    mem.write(dst, scaled.cast::<T>())
}

fn scale_fns(kind: ScalarKind) -> Option<KernelFns> {
    with_numeric!(kind, T => KernelFns {
        name: "scale",
        targets: KernelTargets::HostDevice,
        single: scale_single::<T>,
        strided: strided_by_single,
    })
}

fn scale_init(setup: &KernelSetup<'_>) -> Result<NodeData, CallError> {
    factor(setup.kwds).map(NodeData::Scalar)
}

fn factor(kwds: &Kwds) -> Result<Scalar, CallError> {
    let position = || ArgPosition::Keyword("factor".into());
    match kwds.get("factor") {
        Some(KwdValue::Scalar(Scalar::Bool(_))) => {
            Err(CallError::mismatch("scale", position(), "expected a number, found a boolean"))
        }
        Some(KwdValue::Scalar(s)) => Ok(*s),
        Some(other) => Err(CallError::mismatch(
            "scale",
            position(),
            format!("expected a number, found `{}`", other.ty()),
        )),
        None => Err(CallError::arity("scale", position(), "expected a numeric `factor`")),
    }
}

/// `(T, factor: Any) -> T`: multiplies by a keyword-supplied number of any
/// numeric kind, computing in float64.
pub fn scale() -> Result<Callable, CallError> {
    let t = Type::typevar("T");
    let signature = Signature::new(vec![t.clone()], t)
        .with_kwds(vec![KwdParam::required("factor", Type::Any)]);
    Callable::leaf("scale", signature, Leaf::per_kind(scale_fns).with_data_init(scale_init))
}
