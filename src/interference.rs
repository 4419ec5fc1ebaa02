//! Interference graph construction from liveness facts.
//!
//! Two areas interfere when some instruction defines one while the other is live: an edge is
//! added between each def's node and every node live across that instruction, plus between any
//! two defs made by the same instruction. The node abstraction ([`InterferenceNodes`]) exists so
//! a future finer-grained allocator (sub-area-level rather than whole-area-level) can reuse this
//! builder; [`AreaNodes`] is the only instance this crate actually needs.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};
use std::hash::Hash;

use crate::area::{Area, AreaMap, SubArea, SubAreaSet};
use crate::graph::{BlockId, Proc};
use crate::liveness::{block_live_out, BlockEnv};

/// Maps sub-areas to the node identity the interference graph tracks, and queries how much of
/// the byte-offset space an already-placed node occupies.
pub trait InterferenceNodes {
    type Node: Copy + Eq + Hash;

    /// The node(s) a sub-area's liveness or def contributes to. Usually one, but left as a small
    /// vector so a finer-grained node scheme can map one sub-area to several nodes.
    fn nodes_of(&self, sub_area: &SubArea) -> SmallVec<[Self::Node; 2]>;

    /// The byte ranges `node` currently occupies, given area sizes and an in-progress
    /// allocation. Empty if `node` has no assigned position yet.
    fn occupied_ranges(
        &self,
        node: Self::Node,
        sizes: &AreaMap,
        positions: &AreaMap,
    ) -> SmallVec<[(i64, i64); 1]>;
}

/// The one node scheme this crate realizes: a node is a whole [`Area`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AreaNodes;

impl InterferenceNodes for AreaNodes {
    type Node = Area;

    fn nodes_of(&self, sub_area: &SubArea) -> SmallVec<[Area; 2]> {
        smallvec![sub_area.area]
    }

    fn occupied_ranges(
        &self,
        node: Area,
        sizes: &AreaMap,
        positions: &AreaMap,
    ) -> SmallVec<[(i64, i64); 1]> {
        match positions.get(&node) {
            Some(&pos) => smallvec![(pos, pos + sizes.get(&node).copied().unwrap_or(0))],
            None => SmallVec::new(),
        }
    }
}

pub type IGraph<N> = FxHashMap<N, FxHashSet<N>>;

fn add_edge<N: Copy + Eq + Hash>(graph: &mut IGraph<N>, a: N, b: N) {
    if a == b {
        return;
    }
    graph.entry(a).or_default().insert(b);
    graph.entry(b).or_default().insert(a);
}

fn add_def_edges<I: InterferenceNodes>(
    nodes: &I,
    live_out: &SubAreaSet,
    defs: &[SubArea],
    graph: &mut IGraph<I::Node>,
) {
    let def_nodes: SmallVec<[I::Node; 4]> = defs.iter().flat_map(|d| nodes.nodes_of(d)).collect();
    let live_nodes: SmallVec<[I::Node; 8]> = live_out.iter().flat_map(|s| nodes.nodes_of(s)).collect();

    for (i, &a) in def_nodes.iter().enumerate() {
        for &b in &live_nodes {
            add_edge(graph, a, b);
        }
        for &b in &def_nodes[i + 1..] {
            add_edge(graph, a, b);
        }
    }
}

/// Build the interference graph for `proc`, given its liveness facts.
pub fn build_igraph<I: InterferenceNodes>(
    nodes: &I,
    proc: &Proc,
    slot_env: &BlockEnv,
) -> IGraph<I::Node> {
    let mut graph = IGraph::default();

    for block_id in proc.postorder() {
        visit_block(nodes, proc, slot_env, block_id, &mut graph);
    }

    graph
}

fn visit_block<I: InterferenceNodes>(
    nodes: &I,
    proc: &Proc,
    slot_env: &BlockEnv,
    block_id: BlockId,
    graph: &mut IGraph<I::Node>,
) {
    let block = proc.block(block_id);
    let live_out = block_live_out(proc, slot_env, block_id);

    add_def_edges(nodes, &live_out, block.last.defs(), graph);

    let mut cur = live_out;
    for d in block.last.defs() {
        cur.kill(*d);
    }
    for u in block.last.uses() {
        cur.gen(*u);
    }

    for m in block.middles.iter().rev() {
        add_def_edges(nodes, &cur, &m.defs, graph);
        for d in &m.defs {
            cur.kill(*d);
        }
        for u in &m.uses {
            cur.gen(*u);
        }
    }
}
