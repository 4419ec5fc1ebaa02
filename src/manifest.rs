//! SP manifestation: turn the area assignment into concrete stack-pointer-relative offsets, and
//! splice in the SP adjustments the control-flow graph now requires.
//!
//! Every block has a well-defined "SP on entry" — the stack depth, relative to the procedure's
//! own entry, that holds whenever control reaches that block. `sp_on_entry` resolves it
//! recursively from the facts `ProcPoints` was built from: the procedure entry is the base case,
//! a block with its own declared incoming-area size is sized from that directly, and any other
//! block is reached by exactly one procedure point and inherits its value.

use rustc_hash::FxHashMap;

use crate::allocate::{ProcPointStatus, ProcPoints};
use crate::area::{Area, AreaMap, CallArea};
use crate::config::TargetConfig;
use crate::graph::{BlockId, ExprSlot, Last, Middle, Proc};

fn area_pos(area_map: &AreaMap, area: Area) -> i64 {
    *area_map
        .get(&area)
        .unwrap_or_else(|| panic!("manifest_sp: area {area:?} was never assigned an offset"))
}

fn resolve_sp_on_entry(
    b: BlockId,
    proc: &Proc,
    area_map: &AreaMap,
    proc_points: &ProcPoints,
    proc_entry_sp: i64,
    cache: &mut FxHashMap<BlockId, i64>,
) -> i64 {
    if let Some(&v) = cache.get(&b) {
        return v;
    }
    if b == proc.entry {
        cache.insert(b, proc_entry_sp);
        return proc_entry_sp;
    }

    let block = proc.block(b);
    if let Some(off) = block.stack_info.arg_bytes {
        let v = area_pos(area_map, Area::CallArea(CallArea::Young(b))) + off;
        cache.insert(b, v);
        return v;
    }

    match proc_points.status.get(&b) {
        Some(ProcPointStatus::ReachedBy(by)) if by.len() == 1 => {
            let v = resolve_sp_on_entry(by[0], proc, area_map, proc_points, proc_entry_sp, cache);
            cache.insert(b, v);
            v
        }
        Some(ProcPointStatus::ReachedBy(by)) => {
            panic!(
                "manifest_sp: block {b:?} is reached by {} procedure points, expected exactly one",
                by.len()
            )
        }
        Some(ProcPointStatus::ProcPoint) => {
            panic!("manifest_sp: block {b:?} is a procedure point with no declared argument size")
        }
        None => {
            panic!("manifest_sp: block {b:?} has no argument size and is not tracked as reached by a procedure point")
        }
    }
}

fn compute_sp_high(proc: &Proc, area_map: &AreaMap) -> i64 {
    let mut high = 0i64;
    for block in proc.blocks() {
        for m in &block.middles {
            for s in m.uses.iter().chain(m.defs.iter()) {
                if let Some(&pos) = area_map.get(&s.area) {
                    high = high.max(pos + s.hi);
                }
            }
        }
        for s in block.last.uses().iter().chain(block.last.defs().iter()) {
            if let Some(&pos) = area_map.get(&s.area) {
                high = high.max(pos + s.hi);
            }
        }
    }
    high
}

fn rewrite_exprs(exprs: &mut [ExprSlot], area_map: &AreaMap, sp_off: i64, hwm: i64) {
    for e in exprs.iter_mut() {
        match *e {
            ExprSlot::StackSlot(area, off) => {
                let pos = area_pos(area_map, area);
                *e = ExprSlot::SpRelative(sp_off - (pos + off));
            }
            ExprSlot::HighWaterMark => {
                *e = ExprSlot::HighWaterMarkValue(hwm);
            }
            ExprSlot::SpRelative(_) | ExprSlot::HighWaterMarkValue(_) | ExprSlot::Opaque => {}
        }
    }
}

enum LastKind {
    Exit,
    Branch { target: BlockId },
    Call { area: Area, outgoing_bytes: i64 },
    Other { successors: Vec<BlockId> },
}

fn classify(last: &Last) -> LastKind {
    match last {
        Last::Exit { .. } => LastKind::Exit,
        Last::Branch { target } => LastKind::Branch { target: *target },
        Last::Call { continuation, outgoing_bytes, .. } => {
            let area = match continuation {
                Some(k) => Area::CallArea(CallArea::Young(*k)),
                None => Area::CallArea(CallArea::Old),
            };
            LastKind::Call { area, outgoing_bytes: *outgoing_bytes }
        }
        Last::Other { successors, .. } => LastKind::Other { successors: successors.to_vec() },
    }
}

/// Rewrite every stack-slot expression in `proc` into a stack-pointer-relative offset, and
/// splice in the SP adjustments the resulting layout requires. Returns the procedure's high-water
/// mark: the number of bytes the frame extends below its entry SP at its deepest point.
///
/// Idempotent at the expression level: after one pass, no `ExprSlot::StackSlot` or
/// `ExprSlot::HighWaterMark` remain, so rewriting them again is a no-op. The SP-splicing half of
/// this pass is a one-shot rewrite and is not meant to be re-run against its own output (the real
/// pipeline calls `layout` then `manifest_sp` exactly once per procedure).
pub fn manifest_sp(
    proc_points: &ProcPoints,
    area_map: &AreaMap,
    proc: &mut Proc,
    cfg: &TargetConfig,
) -> i64 {
    let proc_entry_sp = area_pos(area_map, Area::CallArea(CallArea::Old)) + proc.arg_bytes;
    let sp_high = compute_sp_high(proc, area_map);
    let high_water_mark = (sp_high - proc_entry_sp).max(0);

    let block_ids: Vec<BlockId> = proc.block_ids().collect();
    let mut sp_cache: FxHashMap<BlockId, i64> = FxHashMap::default();
    for &b in &block_ids {
        resolve_sp_on_entry(b, proc, area_map, proc_points, proc_entry_sp, &mut sp_cache);
    }

    for block_id in block_ids {
        let sp_in = sp_cache[&block_id];
        let mut sp_off = sp_in;

        let mut new_middles = Vec::with_capacity(proc.block(block_id).middles.len());
        for mut m in std::mem::take(&mut proc.block_mut(block_id).middles) {
            rewrite_exprs(&mut m.exprs, area_map, sp_off, high_water_mark);
            let sfc = m.safe_foreign_call;
            new_middles.push(m);
            if let Some(continuation) = sfc {
                let sp_target =
                    area_pos(area_map, Area::CallArea(CallArea::Young(continuation))) + cfg.word_size();
                if sp_target != sp_off {
                    new_middles.push(Middle::sp_adjust(sp_off - sp_target));
                }
                sp_off = sp_target;
            }
        }
        proc.block_mut(block_id).middles = new_middles;

        if let Some(exprs) = proc.block_mut(block_id).last.exprs_mut() {
            rewrite_exprs(exprs, area_map, sp_off, high_water_mark);
        }

        match classify(&proc.block(block_id).last) {
            LastKind::Exit => {}
            LastKind::Call { area, outgoing_bytes } => {
                let sp_target = area_pos(area_map, area) + outgoing_bytes;
                if sp_target != sp_off {
                    proc.block_mut(block_id).middles.push(Middle::sp_adjust(sp_off - sp_target));
                }
            }
            LastKind::Branch { target } => {
                let sp_target = sp_cache[&target];
                if sp_target != sp_off {
                    proc.block_mut(block_id).middles.push(Middle::sp_adjust(sp_off - sp_target));
                }
            }
            LastKind::Other { successors } => {
                for succ in successors {
                    let sp_target = sp_cache[&succ];
                    if sp_target != sp_off {
                        proc.insert_between(block_id, succ, sp_off - sp_target);
                    }
                }
            }
        }
    }

    high_water_mark
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::SubArea;
    use crate::graph::StackInfo;
    use smallvec::smallvec;

    #[test]
    fn simple_procedure_manifests_stack_slots_relative_to_sp() {
        let (mut proc, entry) = Proc::new(0);
        let old = Area::CallArea(CallArea::Old);
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![Middle::new(smallvec![SubArea::new(old, 8, 8)], smallvec![])
                .with_exprs(vec![ExprSlot::StackSlot(old, 8)])],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );

        let mut area_map = AreaMap::default();
        area_map.insert(old, 0);
        let cfg = TargetConfig::default();
        let hwm = manifest_sp(&ProcPoints::new(), &area_map, &mut proc, &cfg);

        assert_eq!(proc.block(entry).middles[0].exprs[0], ExprSlot::SpRelative(-8));
        assert_eq!(hwm, 8);
    }

    #[test]
    fn mismatched_branch_targets_get_a_spliced_adjustment() {
        // entry (sp_off = 0) branches to a continuation whose declared area size puts its
        // sp_on_entry at 16: the edge needs an adjustment, via a spliced trampoline block.
        let (mut proc, entry) = Proc::new(0);
        let cont = proc.push_block(
            StackInfo { arg_bytes: Some(16), return_off: Some(0) },
            vec![],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );
        proc.set_block(entry, StackInfo::default(), vec![], Last::Branch { target: cont });

        let mut area_map = AreaMap::default();
        area_map.insert(Area::CallArea(CallArea::Old), 0);
        area_map.insert(Area::CallArea(CallArea::Young(cont)), 0);

        let mut proc_points = ProcPoints::new();
        proc_points.mark_proc_point(cont);

        let cfg = TargetConfig::default();
        manifest_sp(&proc_points, &area_map, &mut proc, &cfg);

        match &proc.block(entry).last {
            Last::Branch { target } => {
                let trampoline = *target;
                assert_ne!(trampoline, cont);
                assert_eq!(proc.block(trampoline).middles[0].sp_adjust, Some(0 - 16));
            }
            _ => panic!("expected branch"),
        }
    }

    #[test]
    fn call_gets_an_adjustment_before_it_when_sp_disagrees() {
        let (mut proc, entry) = Proc::new(0);
        let cont = proc.push_block(
            StackInfo { arg_bytes: Some(32), return_off: Some(0) },
            vec![],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![],
            Last::Call {
                target: cont,
                continuation: Some(cont),
                outgoing_bytes: 32,
                update_frame_bytes: None,
                uses: smallvec![],
                defs: smallvec![],
                exprs: vec![],
            },
        );

        let mut area_map = AreaMap::default();
        area_map.insert(Area::CallArea(CallArea::Old), 0);
        area_map.insert(Area::CallArea(CallArea::Young(cont)), 0);

        let mut proc_points = ProcPoints::new();
        proc_points.mark_proc_point(cont);

        let cfg = TargetConfig::default();
        manifest_sp(&proc_points, &area_map, &mut proc, &cfg);

        // sp_off starts at 0 (entry), and the call's own target area sits at 0 too, sized by its
        // outgoing bytes (32): the adjustment brings sp_off to 32 before the call.
        let middles = &proc.block(entry).middles;
        assert_eq!(middles.last().unwrap().sp_adjust, Some(0 - 32));
    }
}
