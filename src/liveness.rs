//! Backward liveness over sub-areas.
//!
//! The lattice is [`SubAreaSet`] under [`SubAreaSet::union_from`]; the transfer function kills an
//! instruction's defs and generates its uses, walking a block's instructions back to front. Call
//! areas get an extra injection at a block's exit before the ordinary transfer runs, since a call
//! area's liveness at a call site is a property of the call itself rather than of any explicit
//! use or def on it.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use crate::area::{Area, CallArea, SubArea, SubAreaSet};
use crate::graph::{BlockId, Last, Proc};

/// Per-block live-in facts, the result of [`live_slot_anal`].
pub type BlockEnv = FxHashMap<BlockId, SubAreaSet>;

/// Add the call-area liveness a call-last implies to `live_out`, before the ordinary
/// uses/defs transfer for that last runs.
///
/// - A tail call (no continuation) keeps its own incoming area (`CallArea::Old`) live across the
///   call, sized to the outgoing byte count: the callee reuses it in place.
/// - A returning call additionally keeps `CallArea::Old` live when the call crosses an
///   update-frame boundary (the frame below this call may still be inspected on return), and
///   always keeps the continuation's own incoming area (`CallArea::Young(continuation)`) live,
///   sized to the outgoing byte count: that's where the callee finds its arguments.
pub(crate) fn inject_call_area_liveness(last: &Last, live_out: &mut SubAreaSet) {
    let Last::Call { continuation, outgoing_bytes: n, update_frame_bytes, .. } = last else {
        return;
    };
    if *n == 0 {
        return;
    }
    match continuation {
        None => {
            live_out.gen(SubArea::new(Area::CallArea(CallArea::Old), *n, *n));
        }
        Some(k) => {
            if update_frame_bytes.is_some() {
                live_out.gen(SubArea::new(Area::CallArea(CallArea::Old), *n, *n));
            }
            live_out.gen(SubArea::new(Area::CallArea(CallArea::Young(*k)), *n, *n));
        }
    }
}

/// The live-out set of `block_id`, as seen from outside the block: successors' live-in, unioned,
/// with call-area injection applied.
pub(crate) fn block_live_out(proc: &Proc, slot_env: &BlockEnv, block_id: BlockId) -> SubAreaSet {
    let block = proc.block(block_id);
    let mut live_out = SubAreaSet::new();
    for succ in block.last.successors() {
        if let Some(s) = slot_env.get(&succ) {
            live_out.union_from(s);
        }
    }
    inject_call_area_liveness(&block.last, &mut live_out);
    live_out
}

/// The live set immediately before each instruction in `block_id`, indexed `0..=middles.len()`:
/// `result[i]` is live-in of `middles[i]` (and `result[middles.len()]` is live-in of the last,
/// i.e. live-out of the final middle). `result[0]` equals the block's overall live-in
/// (`slot_env[block_id]`, when `slot_env` is already a fixpoint).
pub(crate) fn tail_live_ins(proc: &Proc, slot_env: &BlockEnv, block_id: BlockId) -> Vec<SubAreaSet> {
    let block = proc.block(block_id);
    let mut cur = block_live_out(proc, slot_env, block_id);
    for d in block.last.defs() {
        cur.kill(*d);
    }
    for u in block.last.uses() {
        cur.gen(*u);
    }

    let mut result = vec![SubAreaSet::new(); block.middles.len() + 1];
    result[block.middles.len()] = cur.clone();
    for (i, m) in block.middles.iter().enumerate().rev() {
        for d in &m.defs {
            cur.kill(*d);
        }
        for u in &m.uses {
            cur.gen(*u);
        }
        result[i] = cur.clone();
    }
    result
}

/// Run the backward sub-area liveness fixpoint to convergence and return each block's live-in
/// set.
pub fn live_slot_anal(proc: &Proc) -> BlockEnv {
    let preds = proc.predecessors();
    let order = proc.postorder();
    log::debug!(block_count = order.len(); "starting backward sub-area liveness fixpoint");

    let mut live_in: BlockEnv = FxHashMap::default();
    let mut worklist: VecDeque<BlockId> = order.into_iter().collect();
    let mut queued: FxHashSet<BlockId> = worklist.iter().copied().collect();
    let mut iterations = 0u32;

    while let Some(b) = worklist.pop_front() {
        iterations += 1;
        queued.remove(&b);

        let mut cur = block_live_out(proc, &live_in, b);
        let block = proc.block(b);
        for d in block.last.defs() {
            cur.kill(*d);
        }
        for u in block.last.uses() {
            cur.gen(*u);
        }
        for m in block.middles.iter().rev() {
            for d in &m.defs {
                cur.kill(*d);
            }
            for u in &m.uses {
                cur.gen(*u);
            }
        }
        // The slots of this block's own continuation area are defined at entry, not live-in to
        // it: nothing upstream of this block should be kept alive purely to feed them.
        cur.remove_area(Area::CallArea(CallArea::Young(b)));

        let changed = live_in.get(&b).map(|old| *old != cur).unwrap_or(true);
        if changed {
            live_in.insert(b, cur);
            if let Some(ps) = preds.get(&b) {
                for &p in ps {
                    if queued.insert(p) {
                        worklist.push_back(p);
                    }
                }
            }
        }
    }

    log::trace!(iterations; "backward sub-area liveness fixpoint converged");
    live_in
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Middle, StackInfo};
    use crate::reg::LocalReg;
    use cranelift_entity::EntityRef;
    use smallvec::smallvec;

    fn reg(n: u32) -> Area {
        Area::RegSlot(LocalReg::new(n as usize))
    }

    #[test]
    fn straight_line_def_use_is_live_only_between_them() {
        let (mut proc, entry) = Proc::new(0);
        let r = reg(0);
        let def = SubArea::new(r, 8, 8);
        let use_ = SubArea::new(r, 8, 8);
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![
                Middle::new(smallvec![], smallvec![def]),
                Middle::new(smallvec![use_], smallvec![]),
            ],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );

        let tail = tail_live_ins(&proc, &BlockEnv::default(), entry);
        assert!(!tail[0].overlaps_any(&use_), "dead before the def");
        assert!(tail[1].overlaps_any(&use_), "live between def and use");
        assert!(!tail[2].overlaps_any(&use_), "dead after the use");
    }

    #[test]
    fn returning_from_call_keeps_old_area_live() {
        // A block that re-reads an incoming argument after a call must see CallArea::Old stay
        // live across the call, even though the block is not the procedure entry.
        let (mut proc, entry) = Proc::new(0);
        let old_slot = SubArea::new(Area::CallArea(CallArea::Old), 8, 8);

        let cont = proc.push_block(
            StackInfo { arg_bytes: Some(16), return_off: Some(0) },
            vec![Middle::new(smallvec![old_slot], smallvec![])],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![],
            Last::Call {
                target: cont,
                continuation: Some(cont),
                outgoing_bytes: 16,
                update_frame_bytes: None,
                uses: smallvec![],
                defs: smallvec![],
                exprs: vec![],
            },
        );

        let live = live_slot_anal(&proc);
        assert!(live[&entry].overlaps_any(&old_slot));
    }

    #[test]
    fn tail_call_keeps_old_area_live_for_outgoing_bytes() {
        let (mut proc, entry) = Proc::new(0);
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![],
            Last::Call {
                target: entry,
                continuation: None,
                outgoing_bytes: 24,
                update_frame_bytes: None,
                uses: smallvec![],
                defs: smallvec![],
                exprs: vec![],
            },
        );
        let tail = tail_live_ins(&proc, &BlockEnv::default(), entry);
        let probe = SubArea::new(Area::CallArea(CallArea::Old), 24, 24);
        assert!(tail[0].overlaps_any(&probe));
    }

    #[test]
    fn loop_carried_liveness_reaches_a_fixpoint() {
        // entry -> body -> body (self loop) -> exit, with a value defined once in entry and used
        // inside body; liveness must propagate around the back edge without looping forever.
        let (mut proc, entry) = Proc::new(0);
        let r = reg(0);
        let def = SubArea::new(r, 8, 8);
        let use_ = SubArea::new(r, 8, 8);

        let exit = proc.push_block(
            StackInfo::default(),
            vec![],
            Last::Exit { uses: smallvec![], exprs: vec![] },
        );
        let body = proc.push_block(StackInfo::default(), vec![], Last::Branch { target: exit });
        proc.set_block(
            body,
            StackInfo::default(),
            vec![Middle::new(smallvec![use_], smallvec![])],
            Last::Other { successors: smallvec![body, exit], uses: smallvec![], exprs: vec![] },
        );
        proc.set_block(
            entry,
            StackInfo::default(),
            vec![Middle::new(smallvec![], smallvec![def])],
            Last::Branch { target: body },
        );

        let live = live_slot_anal(&proc);
        assert!(live[&body].overlaps_any(&use_));
        assert!(!live[&exit].overlaps_any(&use_));
    }
}
