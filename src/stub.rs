//! Dead-pointer stubbing: an optional GC-hygiene rewrite that overwrites a slot with a known
//! literal the instant it stops being live, so a conservative or precise collector never mistakes
//! a stale value for a live root.
//!
//! Driven off an already-computed liveness environment rather than recomputing liveness itself,
//! the same way `allocate`'s per-instruction live sets are derived from `liveness::tail_live_ins`
//! rather than a fresh fixpoint. Known limitation: only a use's death inside a block's middles is
//! covered. A use that's the last reference to a value that is also read by the block's `Last`
//! is not stubbed by this pass — doing so would require threading live-out through a last's
//! successors, liveness work this pass deliberately leaves to `liveness::live_slot_anal` instead
//! of duplicating.

use crate::graph::{BlockId, Proc, StubWrite};
use crate::liveness::{tail_live_ins, BlockEnv};

/// For every use in every middle instruction, if the used sub-area is no longer live immediately
/// afterward, append a stub write of `stub_literal(width)` to that slot.
pub fn stub_slots_on_death(proc: &mut Proc, live_env: &BlockEnv, stub_literal: impl Fn(i64) -> i64) {
    let block_ids: Vec<BlockId> = proc.block_ids().collect();
    let mut stubbed = 0u32;
    for block_id in block_ids {
        let tail = tail_live_ins(proc, live_env, block_id);
        let block = proc.block_mut(block_id);
        for (i, m) in block.middles.iter_mut().enumerate() {
            let live_after = &tail[i + 1];
            let uses = m.uses.clone();
            for s in uses {
                if !live_after.overlaps_any(&s) {
                    log::trace!(block:debug = block_id, area:debug = s.area, offset = s.hi; "stubbing dead pointer slot");
                    m.stubs.push(StubWrite { area: s.area, offset: s.hi, width: s.width, value: stub_literal(s.width) });
                    stubbed += 1;
                }
            }
        }
    }
    log::debug!(stubbed; "dead-pointer stubbing pass complete");
}
