//! Area sizing: the size of an area is the largest byte extent any instruction references
//! within it, found by a single forward scan over every block.

use crate::area::{Area, AreaMap, CallArea};
use crate::graph::{Last, Proc};

fn record_max(sizes: &mut AreaMap, area: Area, extent: i64) {
    let entry = sizes.entry(area).or_insert(0);
    if extent > *entry {
        *entry = extent;
    }
}

/// Compute the byte size of every area referenced anywhere in `proc`.
///
/// `CallArea::Old` always gets an entry, seeded from the procedure's own incoming-argument byte
/// count, even if nothing in the body happens to reference it: `manifest_sp` needs its size to
/// place the procedure's own argument area regardless.
pub fn area_sizes(proc: &Proc) -> AreaMap {
    let mut sizes = AreaMap::default();
    record_max(&mut sizes, Area::CallArea(CallArea::Old), proc.arg_bytes);

    for block_id in proc.block_ids() {
        if let Some(off) = proc.block(block_id).stack_info.arg_bytes {
            record_max(&mut sizes, Area::CallArea(CallArea::Young(block_id)), off);
        }
    }

    for block in proc.blocks() {
        for m in &block.middles {
            for s in m.uses.iter().chain(m.defs.iter()) {
                if matches!(s.area, Area::RegSlot(_)) {
                    record_max(&mut sizes, s.area, s.hi);
                }
            }
        }
        for s in block.last.uses().iter().chain(block.last.defs().iter()) {
            if matches!(s.area, Area::RegSlot(_)) {
                record_max(&mut sizes, s.area, s.hi);
            }
        }
        if let Last::Call { continuation, outgoing_bytes, .. } = &block.last {
            let area = match continuation {
                Some(k) => Area::CallArea(CallArea::Young(*k)),
                None => Area::CallArea(CallArea::Old),
            };
            record_max(&mut sizes, area, *outgoing_bytes);
        }
    }

    sizes
}
