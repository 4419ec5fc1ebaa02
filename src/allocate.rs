//! Greedy byte-offset assignment.
//!
//! Walks every block in postorder, front to back within a block, and assigns each area it meets
//! for the first time the lowest available offset that doesn't collide with an already-placed
//! neighbor in the interference graph. Deliberately not optimal (bin-packing areas into the
//! smallest possible frame is NP-hard); first-fit trades packing tightness for a simple,
//! guaranteed-terminating greedy pass.

use rustc_hash::FxHashSet;

use crate::area::{Area, AreaMap, CallArea};
use crate::graph::{BlockId, Proc};
use crate::interference::{build_igraph, AreaNodes, IGraph};
use crate::liveness::{tail_live_ins, BlockEnv};
use crate::reg::RegisterClassifier;
use crate::sizing::area_sizes;
use crate::{config::TargetConfig, graph::Last};

/// Procedure-point status for a block, as established by the surrounding analysis this crate
/// consumes rather than computes.
#[derive(Debug, Clone)]
pub enum ProcPointStatus {
    /// `b` is itself a procedure point.
    ProcPoint,
    /// `b` is reached only by the listed procedure points (usually exactly one).
    ReachedBy(Vec<BlockId>),
}

/// The procedure-point facts `layout` and `manifest_sp` need: which blocks are procedure points,
/// and how every other block is reached by one.
#[derive(Debug, Clone, Default)]
pub struct ProcPoints {
    points: FxHashSet<BlockId>,
    pub status: rustc_hash::FxHashMap<BlockId, ProcPointStatus>,
}

impl ProcPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_proc_point(&mut self, b: BlockId) {
        self.points.insert(b);
        self.status.insert(b, ProcPointStatus::ProcPoint);
    }

    pub fn mark_reached_by(&mut self, b: BlockId, by: Vec<BlockId>) {
        self.status.insert(b, ProcPointStatus::ReachedBy(by));
    }

    pub fn is_proc_point(&self, b: BlockId) -> bool {
        self.points.contains(&b)
    }
}

fn round_up(v: i64, word: i64) -> i64 {
    debug_assert!(v >= 0);
    if word <= 1 {
        return v;
    }
    let r = v % word;
    if r == 0 {
        v
    } else {
        v + (word - r)
    }
}

/// The highest byte offset any live sub-area's area already occupies, per §4.E's `youngest_live`:
/// `max(areaMap[a] + hi)` over every `(a, hi, _)` in `live`, or 0 if nothing in `live` has been
/// placed yet.
fn youngest_live(area_map: &AreaMap, live: &crate::area::SubAreaSet) -> i64 {
    live.iter()
        .filter_map(|s| area_map.get(&s.area).map(|&top| top + s.hi))
        .max()
        .unwrap_or(0)
}

/// Assign `area` the lowest byte offset at or above `start` that does not overlap any
/// already-placed neighbor in `igraph`, respecting `area`'s alignment requirement. A no-op if
/// `area` is already assigned.
fn alloc_area(
    area: Area,
    start: i64,
    igraph: &IGraph<Area>,
    sizes: &AreaMap,
    regs: &dyn RegisterClassifier,
    cfg: &TargetConfig,
    area_map: &mut AreaMap,
) {
    if area_map.contains_key(&area) {
        return;
    }
    let size = sizes.get(&area).copied().unwrap_or(0);
    let needs_alignment = match area {
        Area::CallArea(_) => true,
        Area::RegSlot(r) => regs.is_gc_pointer(r),
    };
    let align = |v: i64| if needs_alignment { round_up(v, cfg.word_size()) } else { v };

    let neighbor_ranges: Vec<(i64, i64)> = igraph
        .get(&area)
        .into_iter()
        .flatten()
        .filter_map(|n| area_map.get(n).map(|&pos| (pos, pos + sizes.get(n).copied().unwrap_or(0))))
        .collect();

    let mut lo = align(start.max(0));
    loop {
        let hi = lo + size;
        let conflict = neighbor_ranges
            .iter()
            .filter(|&&(nlo, nhi)| lo < nhi && nlo < hi)
            .map(|&(_, nhi)| nhi)
            .max();
        match conflict {
            None => {
                log::trace!(area:debug = area, offset = lo, size; "assigned area an offset");
                area_map.insert(area, lo);
                return;
            }
            Some(skip_to) => lo = align(skip_to),
        }
    }
}

/// Assign every area referenced by `proc` a byte offset.
///
/// `CallArea::Old` is always placed first, at offset 0: it is the procedure's own
/// incoming-argument area, the one fixed point every other placement is measured against.
pub fn layout(
    proc_points: &ProcPoints,
    slot_env: &BlockEnv,
    proc: &Proc,
    regs: &dyn RegisterClassifier,
    cfg: &TargetConfig,
) -> AreaMap {
    let mut sizes = area_sizes(proc);
    let igraph = build_igraph(&AreaNodes, proc, slot_env);
    log::debug!(area_count = sizes.len(); "starting greedy area allocation");

    let mut area_map = AreaMap::default();
    area_map.insert(Area::CallArea(CallArea::Old), 0);

    for block_id in proc.postorder() {
        let tail = tail_live_ins(proc, slot_env, block_id);
        let block = proc.block(block_id);

        for (i, m) in block.middles.iter().enumerate() {
            for s in m.uses.iter().chain(m.defs.iter()) {
                if matches!(s.area, Area::RegSlot(_)) {
                    alloc_area(s.area, 0, &igraph, &sizes, regs, cfg, &mut area_map);
                }
            }
            if let Some(continuation) = m.safe_foreign_call {
                let call_area = Area::CallArea(CallArea::Young(continuation));
                *sizes.entry(call_area).or_insert(0) += cfg.word_size();

                let mut live_after_no_defs = tail[i + 1].clone();
                for d in &m.defs {
                    live_after_no_defs.kill(*d);
                }
                let start = youngest_live(&area_map, &live_after_no_defs);
                alloc_area(call_area, start, &igraph, &sizes, regs, cfg, &mut area_map);
            }
        }

        for s in block.last.uses().iter().chain(block.last.defs().iter()) {
            if matches!(s.area, Area::RegSlot(_)) {
                alloc_area(s.area, 0, &igraph, &sizes, regs, cfg, &mut area_map);
            }
        }

        if proc_points.is_proc_point(block_id) {
            let call_area = Area::CallArea(CallArea::Young(block_id));
            let youngest = youngest_live(&area_map, &tail[0]);
            let start = block.stack_info.return_off.unwrap_or(0).max(youngest);
            alloc_area(call_area, start, &igraph, &sizes, regs, cfg, &mut area_map);
        }
    }

    area_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::SubArea;
    use crate::graph::{Middle, StackInfo};
    use crate::reg::LocalReg;
    use cranelift_entity::EntityRef;
    use smallvec::smallvec;

    struct AllGpr;
    impl RegisterClassifier for AllGpr {
        fn is_gc_pointer(&self, _reg: LocalReg) -> bool {
            false
        }
    }
    struct AllGcPointer;
    impl RegisterClassifier for AllGcPointer {
        fn is_gc_pointer(&self, _reg: LocalReg) -> bool {
            true
        }
    }

    fn reg(n: u32) -> Area {
        Area::RegSlot(LocalReg::new(n as usize))
    }

    #[test]
    fn disjoint_lifetimes_may_share_an_offset() {
        let (mut proc, entry) = Proc::new(0);
        let r0 = reg(0);
        let r1 = reg(1);
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![
                Middle::new(smallvec![], smallvec![SubArea::new(r0, 4, 4)]),
                Middle::new(smallvec![SubArea::new(r0, 4, 4)], smallvec![]),
                Middle::new(smallvec![], smallvec![SubArea::new(r1, 4, 4)]),
                Middle::new(smallvec![SubArea::new(r1, 4, 4)], smallvec![]),
            ],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );

        let live = crate::liveness::live_slot_anal(&proc);
        let cfg = TargetConfig::default();
        let area_map = layout(&ProcPoints::new(), &live, &proc, &AllGpr, &cfg);
        assert_eq!(area_map[&r0], area_map[&r1]);
    }

    #[test]
    fn interfering_lifetimes_get_disjoint_non_overlapping_offsets() {
        let (mut proc, entry) = Proc::new(0);
        let r0 = reg(0); // width 4
        let r1 = reg(1); // width 8
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![
                Middle::new(smallvec![], smallvec![SubArea::new(r0, 4, 4)]),
                Middle::new(smallvec![], smallvec![SubArea::new(r1, 8, 8)]),
                Middle::new(
                    smallvec![SubArea::new(r0, 4, 4), SubArea::new(r1, 8, 8)],
                    smallvec![],
                ),
            ],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );

        let live = crate::liveness::live_slot_anal(&proc);
        let cfg = TargetConfig::default();
        let area_map = layout(&ProcPoints::new(), &live, &proc, &AllGpr, &cfg);

        let (lo0, hi0) = (area_map[&r0], area_map[&r0] + 4);
        let (lo1, hi1) = (area_map[&r1], area_map[&r1] + 8);
        assert!(lo0 >= hi1 || lo1 >= hi0, "offsets must not overlap: {lo0}..{hi0} vs {lo1}..{hi1}");
    }

    #[test]
    fn gc_pointer_slots_are_word_aligned() {
        let (mut proc, entry) = Proc::new(0);
        let r0 = reg(0);
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![Middle::new(smallvec![], smallvec![SubArea::new(r0, 4, 4)])],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );

        let live = crate::liveness::live_slot_anal(&proc);
        let cfg = TargetConfig::new(8, 64);
        let area_map = layout(&ProcPoints::new(), &live, &proc, &AllGcPointer, &cfg);
        assert_eq!(area_map[&r0] % 8, 0);
    }

    #[test]
    fn old_call_area_is_always_at_offset_zero() {
        let (proc, _entry) = Proc::new(16);
        let live = BlockEnv::default();
        let cfg = TargetConfig::default();
        let area_map = layout(&ProcPoints::new(), &live, &proc, &AllGpr, &cfg);
        assert_eq!(area_map[&Area::CallArea(CallArea::Old)], 0);
    }
}
