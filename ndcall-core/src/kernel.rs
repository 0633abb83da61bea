#![forbid(unsafe_code)]

//! Kernel nodes and the call graph arena they live in.
//!
//! Instantiation writes nodes into a [`CallGraph`] parent-first; a parent
//! reaches its children through [`Node::child`]. Nodes are torn down in
//! the reverse of the order they were written, and a failed child
//! instantiation rolls the arena back to the offset its parent recorded.

use std::fmt;

use ndcall_types::ScalarKind;
use tracing::trace;

use crate::error::CallError;
use crate::memory::{Addr, Memory, Scalar};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a kernel may run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelTargets {
    Host,
    HostDevice,
}

impl KernelTargets {
    pub fn intersect(self, other: KernelTargets) -> KernelTargets {
        match (self, other) {
            (KernelTargets::HostDevice, KernelTargets::HostDevice) => KernelTargets::HostDevice,
            _ => KernelTargets::Host,
        }
    }

    pub fn supports_device(self) -> bool {
        self == KernelTargets::HostDevice
    }
}

/// Arguments of a strided invocation: `count` items, each address advanced
/// by its stride (in bytes) per item.
#[derive(Clone, Copy, Debug)]
pub struct Strided<'s> {
    pub dst: Addr,
    pub dst_stride: isize,
    pub src: &'s [Addr],
    pub src_stride: &'s [isize],
    pub count: usize,
}

impl Strided<'_> {
    /// Addresses of item `k`.
    pub fn item(&self, k: usize, src: &mut Vec<Addr>) -> Addr {
        let k = k as isize;
        src.clear();
        src.extend(
            self.src
                .iter()
                .zip(self.src_stride)
                .map(|(a, &s)| a.offset_by(k * s)),
        );
        self.dst.offset_by(k * self.dst_stride)
    }
}

pub type SingleFn = fn(Node<'_>, &mut Memory<'_>, Addr, &[Addr]) -> Result<(), CallError>;
pub type StridedFn = fn(Node<'_>, &mut Memory<'_>, Strided<'_>) -> Result<(), CallError>;

/// Entry points of one kernel kind.
#[derive(Clone, Copy)]
pub struct KernelFns {
    pub name: &'static str,
    pub targets: KernelTargets,
    pub single: SingleFn,
    pub strided: StridedFn,
}

impl fmt::Debug for KernelFns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelFns")
            .field("name", &self.name)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

/// Strided entry for kernels that only implement the single form.
pub fn strided_by_single(node: Node<'_>, mem: &mut Memory<'_>, args: Strided<'_>) -> Result<(), CallError> {
    let mut src = Vec::with_capacity(args.src.len());
    for k in 0..args.count {
        let dst = args.item(k, &mut src);
        (node.fns().single)(node, mem, dst, &src)?;
    }
    Ok(())
}

/// One level of a lifted loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimLoop {
    pub extent: usize,
    pub dst_stride: isize,
    /// Zero for a broadcast source.
    pub src_stride: Vec<isize>,
    /// The innermost loop hands its whole extent to the child's strided
    /// entry; outer loops call the child once per index.
    pub innermost: bool,
}

/// Per-slot conversions run before (sources) and around (destination) a
/// child kernel. Each entry is `(actual, kernel)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConvertPlan {
    pub src: Vec<Option<(ScalarKind, ScalarKind)>>,
    pub dst: Option<(ScalarKind, ScalarKind)>,
}

impl ConvertPlan {
    pub fn between(
        actual_src: &[ScalarKind],
        kernel_src: &[ScalarKind],
        actual_dst: Option<ScalarKind>,
        kernel_dst: Option<ScalarKind>,
    ) -> Self {
        let pair = |a: ScalarKind, k: ScalarKind| (a != k).then_some((a, k));
        ConvertPlan {
            src: actual_src
                .iter()
                .zip(kernel_src)
                .map(|(&a, &k)| pair(a, k))
                .collect(),
            dst: actual_dst.zip(kernel_dst).and_then(|(a, k)| pair(a, k)),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.dst.is_none() && self.src.iter().all(Option::is_none)
    }
}

/// Kernel-specific data stored next to the entry points.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum NodeData {
    #[default]
    None,
    /// Child slot `k` reads source `perm[k]`, or the destination for `-1`.
    Permutation(Vec<isize>),
    Loop(DimLoop),
    /// Root of a reduction; writes `identity` (as `acc`) before folding.
    Fold {
        identity: Option<Scalar>,
        acc: ScalarKind,
    },
    Convert(ConvertPlan),
    Cast {
        from: ScalarKind,
        to: ScalarKind,
    },
    Scalar(Scalar),
}

struct KernelNode {
    fns: KernelFns,
    data: NodeData,
    children: Vec<NodeId>,
}

/// Arena of kernel nodes for one call.
#[derive(Default)]
pub struct CallGraph {
    nodes: Vec<KernelNode>,
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current end of the arena, recorded before writing children.
    pub fn offset(&self) -> usize {
        self.nodes.len()
    }

    pub fn push(&mut self, fns: KernelFns, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        trace!(node = id.0, kernel = fns.name, "kernel node written");
        self.nodes.push(KernelNode {
            fns,
            data,
            children: Vec::new(),
        });
        id
    }

    pub fn adopt(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(parent.index()) {
            node.children.push(child);
        }
    }

    /// Tears down every node at or after `offset`, newest first.
    pub fn rollback(&mut self, offset: usize) -> Vec<NodeId> {
        let mut released = Vec::new();
        while self.nodes.len() > offset {
            let id = NodeId((self.nodes.len() - 1) as u32);
            if let Some(node) = self.nodes.pop() {
                trace!(node = id.0, kernel = node.fns.name, "kernel node released");
            }
            released.push(id);
        }
        for node in &mut self.nodes {
            node.children.retain(|c| c.index() < offset);
        }
        released
    }

    /// Releases the whole graph and reports the teardown order.
    pub fn teardown(mut self) -> Vec<NodeId> {
        self.rollback(0)
    }

    pub fn node(&self, id: NodeId) -> Result<Node<'_>, CallError> {
        if id.index() < self.nodes.len() {
            Ok(Node { graph: self, id })
        } else {
            Err(CallError::execution(format!("node {} does not exist", id.0)))
        }
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.index()).map(|n| &n.data)
    }

    pub fn kernel_name(&self, id: NodeId) -> Option<&'static str> {
        self.nodes.get(id.index()).map(|n| n.fns.name)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    /// Targets every node in the graph supports.
    pub fn targets(&self) -> KernelTargets {
        self.nodes
            .iter()
            .fold(KernelTargets::HostDevice, |t, n| t.intersect(n.fns.targets))
    }

    /// Kernel names from `root` down its first-child chain.
    pub fn chain(&self, root: NodeId) -> Vec<&'static str> {
        let mut out = Vec::new();
        let mut cur = Some(root);
        while let Some(id) = cur {
            let Some(node) = self.nodes.get(id.index()) else {
                break;
            };
            out.push(node.fns.name);
            cur = node.children.first().copied();
        }
        out
    }

    pub fn single(
        &self,
        id: NodeId,
        mem: &mut Memory<'_>,
        dst: Addr,
        src: &[Addr],
    ) -> Result<(), CallError> {
        self.node(id)?.single(mem, dst, src)
    }

    pub fn strided(&self, id: NodeId, mem: &mut Memory<'_>, args: Strided<'_>) -> Result<(), CallError> {
        self.node(id)?.strided(mem, args)
    }
}

impl Drop for CallGraph {
    fn drop(&mut self) {
        self.rollback(0);
    }
}

/// A node as seen by its own entry points.
#[derive(Clone, Copy)]
pub struct Node<'g> {
    graph: &'g CallGraph,
    id: NodeId,
}

impl<'g> Node<'g> {
    fn inner(&self) -> &'g KernelNode {
        &self.graph.nodes[self.id.index()]
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn fns(&self) -> KernelFns {
        self.inner().fns
    }

    pub fn data(&self) -> &'g NodeData {
        &self.inner().data
    }

    pub fn child(&self, i: usize) -> Result<Node<'g>, CallError> {
        let id = self.inner().children.get(i).copied().ok_or_else(|| {
            CallError::execution(format!("kernel node {} has no child {i}", self.id.0))
        })?;
        self.graph.node(id)
    }

    pub fn single(self, mem: &mut Memory<'_>, dst: Addr, src: &[Addr]) -> Result<(), CallError> {
        let fns = self.fns();
        (fns.single)(self, mem, dst, src).map_err(|e| e.with_kernel(fns.name))
    }

    pub fn strided(self, mem: &mut Memory<'_>, args: Strided<'_>) -> Result<(), CallError> {
        let fns = self.fns();
        (fns.strided)(self, mem, args).map_err(|e| e.with_kernel(fns.name))
    }
}
