#![forbid(unsafe_code)]

use ndcall_types::{ScalarKind, Type};

use crate::error::CallError;
use crate::memory::{Addr, Element, Memory, Scalar};

/// Type and byte strides of an argument, as seen during instantiation.
/// `strides[i]` belongs to the i-th leading dimension of `ty`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgMeta {
    pub ty: Type,
    pub strides: Vec<isize>,
}

impl ArgMeta {
    pub fn new(ty: Type, strides: Vec<isize>) -> Self {
        ArgMeta { ty, strides }
    }

    /// C-order strides for a concrete type.
    pub fn contiguous(ty: Type) -> Self {
        let strides = contiguous_strides(&ty);
        ArgMeta { ty, strides }
    }

    /// Drops the outer `n` dimensions.
    pub fn inner(&self, n: usize) -> Option<ArgMeta> {
        let ty = self.ty.strip_dims(n)?.clone();
        let strides = self.strides.get(n..)?.to_vec();
        Some(ArgMeta { ty, strides })
    }
}

fn contiguous_strides(ty: &Type) -> Vec<isize> {
    let shape = ty.shape().unwrap_or_default();
    let elem = ty.strip_dims(shape.len()).and_then(Type::data_size).unwrap_or(0);
    let mut strides = vec![0isize; shape.len()];
    let mut acc = elem as isize;
    for (s, &n) in strides.iter_mut().zip(&shape).rev() {
        *s = acc;
        acc *= n as isize;
    }
    strides
}

/// A typed, strided view over an owned byte buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    ty: Type,
    data: Vec<u8>,
    offset: usize,
    strides: Vec<isize>,
}

impl Array {
    /// A zero-filled contiguous array of a concrete type.
    pub fn zeros(ty: &Type) -> Result<Array, CallError> {
        let size = match (ty.is_symbolic(), ty.data_size()) {
            (false, Some(size)) => size,
            _ => return Err(CallError::layout(format!("cannot allocate `{ty}`"))),
        };
        Ok(Array {
            ty: ty.clone(),
            data: vec![0; size],
            offset: 0,
            strides: contiguous_strides(ty),
        })
    }

    pub fn scalar<T: Element>(value: T) -> Array {
        let mut data = vec![0; T::KIND.size()];
        value.write_le(&mut data);
        Array {
            ty: Type::Scalar(T::KIND),
            data,
            offset: 0,
            strides: Vec::new(),
        }
    }

    pub fn from_vec<T: Element>(values: Vec<T>) -> Array {
        let n = values.len();
        let size = T::KIND.size();
        let mut data = vec![0; n * size];
        for (chunk, v) in data.chunks_exact_mut(size).zip(values) {
            v.write_le(chunk);
        }
        Array {
            ty: Type::fixed_dim(n, Type::Scalar(T::KIND)),
            data,
            offset: 0,
            strides: vec![size as isize],
        }
    }

    pub fn from_shape_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Array, CallError> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(CallError::layout(format!(
                "shape {shape:?} holds {expected} elements, got {}",
                values.len()
            )));
        }
        let flat = Array::from_vec(values);
        let ty = Type::with_shape(shape, Type::Scalar(T::KIND));
        Ok(Array {
            strides: contiguous_strides(&ty),
            ty,
            data: flat.data,
            offset: 0,
        })
    }

    /// A view with explicit layout. Every reachable element must lie inside
    /// `data`.
    pub fn from_raw_parts(
        ty: Type,
        data: Vec<u8>,
        offset: usize,
        strides: Vec<isize>,
    ) -> Result<Array, CallError> {
        let shape = ty
            .shape()
            .filter(|_| !ty.is_symbolic())
            .ok_or_else(|| CallError::layout(format!("`{ty}` is not a concrete type")))?;
        if shape.len() != strides.len() {
            return Err(CallError::layout(format!(
                "`{ty}` has {} dimensions but {} strides were given",
                shape.len(),
                strides.len()
            )));
        }
        let elem = ty
            .strip_dims(shape.len())
            .and_then(Type::data_size)
            .unwrap_or(0) as isize;
        let (mut lo, mut hi) = (offset as isize, offset as isize + elem);
        for (&n, &s) in shape.iter().zip(&strides) {
            if n == 0 {
                lo = offset as isize;
                hi = offset as isize;
                break;
            }
            let span = (n as isize - 1) * s;
            if span < 0 {
                lo += span;
            } else {
                hi += span;
            }
        }
        if lo < 0 || hi > data.len() as isize {
            return Err(CallError::layout(format!(
                "`{ty}` with strides {strides:?} at offset {offset} exceeds a buffer of {} bytes",
                data.len()
            )));
        }
        Ok(Array {
            ty,
            data,
            offset,
            strides,
        })
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn shape(&self) -> Vec<usize> {
        self.ty.shape().unwrap_or_default()
    }

    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn meta(&self) -> ArgMeta {
        ArgMeta::new(self.ty.clone(), self.strides.clone())
    }

    pub fn dtype(&self) -> Option<ScalarKind> {
        self.ty.dtype().scalar_kind()
    }

    fn check_dtype<T: Element>(&self) -> Result<(), CallError> {
        match self.dtype() {
            Some(k) if k == T::KIND => Ok(()),
            _ => Err(CallError::layout(format!(
                "cannot read `{}` elements as {}",
                self.ty,
                T::KIND
            ))),
        }
    }

    fn byte_offset(&self, index: &[usize]) -> isize {
        index
            .iter()
            .zip(&self.strides)
            .fold(self.offset as isize, |acc, (&i, &s)| acc + i as isize * s)
    }

    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T, CallError> {
        self.check_dtype::<T>()?;
        let shape = self.shape();
        if index.len() != shape.len() || index.iter().zip(&shape).any(|(i, n)| i >= n) {
            return Err(CallError::layout(format!(
                "index {index:?} is out of bounds for shape {shape:?}"
            )));
        }
        let at = self.byte_offset(index) as usize;
        Ok(T::read_le(&self.data[at..at + T::KIND.size()]))
    }

    /// Byte offsets of every element, in C order.
    fn offsets(&self) -> Vec<isize> {
        let shape = self.shape();
        let total: usize = shape.iter().product();
        let mut out = Vec::with_capacity(total);
        let mut index = vec![0usize; shape.len()];
        for _ in 0..total {
            out.push(self.byte_offset(&index));
            for d in (0..shape.len()).rev() {
                index[d] += 1;
                if index[d] < shape[d] {
                    break;
                }
                index[d] = 0;
            }
        }
        out
    }

    /// Elements in C order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, CallError> {
        self.check_dtype::<T>()?;
        let size = T::KIND.size();
        Ok(self
            .offsets()
            .into_iter()
            .map(|at| T::read_le(&self.data[at as usize..at as usize + size]))
            .collect())
    }

    /// Elements in C order as dynamically typed values.
    pub fn to_scalars(&self) -> Result<Vec<Scalar>, CallError> {
        let kind = self
            .dtype()
            .ok_or_else(|| CallError::layout(format!("`{}` has no scalar element type", self.ty)))?;
        let mut mem = Memory::new();
        let region = mem.shared(&self.data);
        self.offsets()
            .into_iter()
            .map(|at| mem.read_scalar(kind, Addr::new(region, at)))
            .collect()
    }

    /// A contiguous array of `ty` filled in C order, converting each value
    /// with `as` semantics.
    pub fn from_scalars(ty: &Type, values: &[Scalar]) -> Result<Array, CallError> {
        let mut out = Array::zeros(ty)?;
        let kind = out
            .dtype()
            .ok_or_else(|| CallError::layout(format!("`{ty}` has no scalar element type")))?;
        let offsets = out.offsets();
        if offsets.len() != values.len() {
            return Err(CallError::layout(format!(
                "`{ty}` holds {} elements, got {}",
                offsets.len(),
                values.len()
            )));
        }
        let mut mem = Memory::new();
        let region = mem.exclusive(&mut out.data);
        for (&at, &v) in offsets.iter().zip(values) {
            mem.write_scalar(kind, Addr::new(region, at), v)?;
        }
        drop(mem);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_layout() {
        let a = Array::from_shape_vec(&[2, 3], vec![1i32, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(a.ty().to_string(), "2 * 3 * int32");
        assert_eq!(a.strides(), &[12, 4]);
        assert_eq!(a.get::<i32>(&[1, 0]).unwrap(), 4);
        assert!(a.get::<i64>(&[0, 0]).is_err());
    }

    #[test]
    fn strided_view_reads_every_other_element() {
        let base = Array::from_vec(vec![0i16, 1, 2, 3, 4, 5]);
        let view = Array::from_raw_parts(
            Type::fixed_dim(3, Type::Scalar(ScalarKind::Int16)),
            base.data().to_vec(),
            2,
            vec![4],
        )
        .unwrap();
        assert_eq!(view.to_vec::<i16>().unwrap(), vec![1, 3, 5]);
    }

    #[test]
    fn negative_strides_are_bounds_checked() {
        let base = Array::from_vec(vec![0u8, 1, 2, 3]);
        let rev = Array::from_raw_parts(base.ty().clone(), base.data().to_vec(), 3, vec![-1]).unwrap();
        assert_eq!(rev.to_vec::<u8>().unwrap(), vec![3, 2, 1, 0]);
        assert!(Array::from_raw_parts(base.ty().clone(), base.data().to_vec(), 2, vec![-1]).is_err());
    }

    #[test]
    fn zeros_rejects_symbolic_types() {
        assert!(Array::zeros(&Type::typevar("T")).is_err());
        let z = Array::zeros(&Type::Scalar(ScalarKind::Float64)).unwrap();
        assert_eq!(z.to_vec::<f64>().unwrap(), vec![0.0]);
    }

    #[test]
    fn scalar_conversion_follows_layout() {
        let ty: Type = "2 * 2 * uint16".parse().unwrap();
        let values = [Scalar::Int(1), Scalar::Int(2), Scalar::Float(3.0), Scalar::UInt(4)];
        let a = Array::from_scalars(&ty, &values).unwrap();
        assert_eq!(a.to_vec::<u16>().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(a.to_scalars().unwrap()[3], Scalar::UInt(4));
        assert!(Array::from_scalars(&ty, &values[..3]).is_err());
    }

    #[test]
    fn meta_inner_strips_outer_dims() {
        let meta = ArgMeta::contiguous("2 * 3 * int64".parse().unwrap());
        assert_eq!(meta.strides, vec![24, 8]);
        let inner = meta.inner(1).unwrap();
        assert_eq!(inner.ty.to_string(), "3 * int64");
        assert_eq!(inner.strides, vec![8]);
    }
}
