#![forbid(unsafe_code)]

//! Byte regions a call graph reads and writes.
//!
//! Kernels never see raw pointers. An [`Addr`] names a region plus a byte
//! offset, and every access goes through [`Memory`], which bounds-checks it
//! and refuses writes to regions borrowed shared.

use std::collections::HashMap;

use ndcall_types::ScalarKind;

use crate::error::CallError;
use crate::kernel::NodeId;

pub type RegionId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Addr {
    pub region: RegionId,
    pub offset: isize,
}

impl Addr {
    pub fn new(region: RegionId, offset: isize) -> Self {
        Addr { region, offset }
    }

    pub fn offset_by(self, delta: isize) -> Self {
        Addr {
            region: self.region,
            offset: self.offset + delta,
        }
    }
}

/// A dynamically typed element value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    pub fn cast<T: Element>(self) -> T {
        T::from_scalar(self)
    }
}

/// A fixed-size element stored little-endian.
pub trait Element: Copy + Send + Sync + 'static {
    const KIND: ScalarKind;

    /// `bytes` is exactly `KIND.size()` long.
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
    fn to_scalar(self) -> Scalar;
    fn from_scalar(value: Scalar) -> Self;
}

impl Element for bool {
    const KIND: ScalarKind = ScalarKind::Bool;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn to_scalar(self) -> Scalar {
        Scalar::Bool(self)
    }

    fn from_scalar(value: Scalar) -> Self {
        match value {
            Scalar::Bool(b) => b,
            Scalar::Int(i) => i != 0,
            Scalar::UInt(u) => u != 0,
            Scalar::Float(f) => f != 0.0,
        }
    }
}

macro_rules! impl_element {
    ($($t:ty => $kind:ident, $variant:ident, $wide:ty;)*) => {
        $(
            impl Element for $t {
                const KIND: ScalarKind = ScalarKind::$kind;

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn to_scalar(self) -> Scalar {
                    Scalar::$variant(self as $wide)
                }

                fn from_scalar(value: Scalar) -> Self {
                    match value {
                        Scalar::Bool(b) => u8::from(b) as $t,
                        Scalar::Int(i) => i as $t,
                        Scalar::UInt(u) => u as $t,
                        Scalar::Float(f) => f as $t,
                    }
                }
            }
        )*
    };
}

impl_element! {
    i8 => Int8, Int, i64;
    i16 => Int16, Int, i64;
    i32 => Int32, Int, i64;
    i64 => Int64, Int, i64;
    u8 => UInt8, UInt, u64;
    u16 => UInt16, UInt, u64;
    u32 => UInt32, UInt, u64;
    u64 => UInt64, UInt, u64;
    f32 => Float32, Float, f64;
    f64 => Float64, Float, f64;
}

/// Runs `$body` with `$T` aliased to the Rust type of `$kind`.
macro_rules! with_element {
    ($kind:expr, $T:ident => $body:expr) => {
        match $kind {
            ScalarKind::Bool => {
                type $T = bool;
                $body
            }
            ScalarKind::Int8 => {
                type $T = i8;
                $body
            }
            ScalarKind::Int16 => {
                type $T = i16;
                $body
            }
            ScalarKind::Int32 => {
                type $T = i32;
                $body
            }
            ScalarKind::Int64 => {
                type $T = i64;
                $body
            }
            ScalarKind::UInt8 => {
                type $T = u8;
                $body
            }
            ScalarKind::UInt16 => {
                type $T = u16;
                $body
            }
            ScalarKind::UInt32 => {
                type $T = u32;
                $body
            }
            ScalarKind::UInt64 => {
                type $T = u64;
                $body
            }
            ScalarKind::Float32 => {
                type $T = f32;
                $body
            }
            ScalarKind::Float64 => {
                type $T = f64;
                $body
            }
        }
    };
}

enum Region<'a> {
    Shared(&'a [u8]),
    Exclusive(&'a mut [u8]),
    Owned(Vec<u8>),
}

impl Region<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            Region::Shared(b) => b,
            Region::Exclusive(b) => b,
            Region::Owned(v) => v,
        }
    }
}

/// The address space of one call: argument buffers plus scratch owned by
/// conversion nodes.
#[derive(Default)]
pub struct Memory<'a> {
    regions: Vec<Region<'a>>,
    scratch: HashMap<(NodeId, usize), RegionId>,
}

impl<'a> Memory<'a> {
    pub fn new() -> Self {
        Memory {
            regions: Vec::new(),
            scratch: HashMap::new(),
        }
    }

    /// Registers a read-only region.
    pub fn shared(&mut self, data: &'a [u8]) -> RegionId {
        self.regions.push(Region::Shared(data));
        self.regions.len() - 1
    }

    /// Registers a writable region.
    pub fn exclusive(&mut self, data: &'a mut [u8]) -> RegionId {
        self.regions.push(Region::Exclusive(data));
        self.regions.len() - 1
    }

    pub fn owned(&mut self, data: Vec<u8>) -> RegionId {
        self.regions.push(Region::Owned(data));
        self.regions.len() - 1
    }

    /// Scratch space private to one slot of one node, reused across calls
    /// and grown on demand.
    pub fn scratch(&mut self, node: NodeId, slot: usize, len: usize) -> RegionId {
        if let Some(&id) = self.scratch.get(&(node, slot)) {
            if let Region::Owned(v) = &mut self.regions[id] {
                if v.len() < len {
                    v.resize(len, 0);
                }
            }
            return id;
        }
        let id = self.owned(vec![0; len]);
        self.scratch.insert((node, slot), id);
        id
    }

    pub fn region(&self, id: RegionId) -> Option<&[u8]> {
        self.regions.get(id).map(Region::bytes)
    }

    fn range(&self, addr: Addr, len: usize) -> Result<std::ops::Range<usize>, CallError> {
        let region = self.regions.get(addr.region).ok_or_else(|| {
            CallError::execution(format!("region {} does not exist", addr.region))
        })?;
        let size = region.bytes().len();
        let start = usize::try_from(addr.offset).ok().filter(|s| s + len <= size);
        start.map(|s| s..s + len).ok_or_else(|| {
            CallError::execution(format!(
                "access of {len} bytes at offset {} is outside region {} ({size} bytes)",
                addr.offset, addr.region
            ))
        })
    }

    pub fn bytes(&self, addr: Addr, len: usize) -> Result<&[u8], CallError> {
        let range = self.range(addr, len)?;
        Ok(&self.regions[addr.region].bytes()[range])
    }

    pub fn bytes_mut(&mut self, addr: Addr, len: usize) -> Result<&mut [u8], CallError> {
        let range = self.range(addr, len)?;
        match &mut self.regions[addr.region] {
            Region::Exclusive(b) => Ok(&mut b[range]),
            Region::Owned(v) => Ok(&mut v[range]),
            Region::Shared(_) => Err(CallError::execution(format!(
                "region {} is read-only",
                addr.region
            ))),
        }
    }

    pub fn read<T: Element>(&self, addr: Addr) -> Result<T, CallError> {
        self.bytes(addr, T::KIND.size()).map(T::read_le)
    }

    pub fn write<T: Element>(&mut self, addr: Addr, value: T) -> Result<(), CallError> {
        value.write_le(self.bytes_mut(addr, T::KIND.size())?);
        Ok(())
    }

    pub fn read_scalar(&self, kind: ScalarKind, addr: Addr) -> Result<Scalar, CallError> {
        with_element!(kind, T => self.read::<T>(addr).map(Element::to_scalar))
    }

    /// Writes `value` converted to `kind` with `as` semantics.
    pub fn write_scalar(
        &mut self,
        kind: ScalarKind,
        addr: Addr,
        value: Scalar,
    ) -> Result<(), CallError> {
        with_element!(kind, T => self.write::<T>(addr, value.cast::<T>()))
    }
}
