use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::graph::BlockId;
use crate::reg::LocalReg;

/// A call's outgoing-argument area: the caller's own incoming area, reused for a tail call, or a
/// continuation block's incoming area for a call that returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallArea {
    /// This procedure's own incoming-argument area.
    Old,
    /// The incoming-argument area of the block reached after a call returns.
    Young(BlockId),
}

/// A named region of the stack frame that offsets are assigned within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Area {
    CallArea(CallArea),
    RegSlot(LocalReg),
}

impl Area {
    pub fn is_call_area(&self) -> bool {
        matches!(self, Area::CallArea(_))
    }
}

/// A byte range `[hi - width, hi)` within some [`Area`].
///
/// Stored as `(area, hi, width)` rather than `(area, lo, width)`: areas are conventionally
/// described by how far they extend from their high (oldest) end, matching how the rest of the
/// layout algorithm reasons about them ("this instruction uses the top 8 bytes of the call area").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubArea {
    pub area: Area,
    pub hi: i64,
    pub width: i64,
}

impl SubArea {
    pub fn new(area: Area, hi: i64, width: i64) -> Self {
        assert!(width > 0, "sub-area width must be positive, got {width}");
        Self { area, hi, width }
    }

    #[inline(always)]
    pub fn lo(&self) -> i64 {
        self.hi - self.width
    }

    /// Whether `self` and `other` are the same area and their byte ranges intersect.
    pub fn overlaps(&self, other: &SubArea) -> bool {
        self.area == other.area && self.lo() < other.hi && other.lo() < self.hi
    }
}

/// The (coalesced) set of live sub-areas within a single [`Area`], kept as a small unsorted list
/// of disjoint, non-adjacent-merged ranges.
pub type SubAreaList = SmallVec<[SubArea; 4]>;

/// Merge `s` into `list`, coalescing any entries it overlaps into one span that covers all of
/// them. Returns whether `list` changed.
///
/// This is the monotone "add a live range" operation the backward liveness fixpoint relies on:
/// repeated application can only grow the covered byte range, never shrink it, which is what
/// guarantees the fixpoint terminates.
pub fn live_gen(s: SubArea, list: &mut SubAreaList) -> bool {
    if list.iter().any(|e| e.lo() <= s.lo() && s.hi <= e.hi) {
        return false;
    }
    let mut lo = s.lo();
    let mut hi = s.hi;
    let mut i = 0;
    while i < list.len() {
        if list[i].overlaps(&s) {
            let e = list.swap_remove(i);
            lo = lo.min(e.lo());
            hi = hi.max(e.hi);
        } else {
            i += 1;
        }
    }
    list.push(SubArea::new(s.area, hi, hi - lo));
    true
}

/// Remove `s` from `list`, splitting any entry it partially overlaps into the fragments that
/// remain above and below `s`'s range.
pub fn live_kill(s: SubArea, list: &mut SubAreaList) {
    let mut additions: SubAreaList = SmallVec::new();
    let mut i = 0;
    while i < list.len() {
        if list[i].overlaps(&s) {
            let e = list.swap_remove(i);
            if e.hi > s.hi {
                additions.push(SubArea::new(e.area, e.hi, e.hi - s.hi));
            }
            if e.lo() < s.lo() {
                additions.push(SubArea::new(e.area, s.lo(), s.lo() - e.lo()));
            }
        } else {
            i += 1;
        }
    }
    list.extend(additions);
}

/// The live sub-areas at some program point, grouped by [`Area`].
#[derive(Debug, Clone, Default)]
pub struct SubAreaSet {
    areas: FxHashMap<Area, SubAreaList>,
}

impl SubAreaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubArea> {
        self.areas.values().flatten()
    }

    /// Add `s` as live, coalescing with anything already live in the same area.
    pub fn gen(&mut self, s: SubArea) -> bool {
        let list = self.areas.entry(s.area).or_default();
        let changed = live_gen(s, list);
        changed
    }

    /// Remove `s` from the live set.
    pub fn kill(&mut self, s: SubArea) {
        if let Some(list) = self.areas.get_mut(&s.area) {
            live_kill(s, list);
            if list.is_empty() {
                self.areas.remove(&s.area);
            }
        }
    }

    /// Drop every sub-area belonging to `area`, regardless of range.
    pub fn remove_area(&mut self, area: Area) {
        self.areas.remove(&area);
    }

    /// Whether any live sub-area in `self` overlaps `s`.
    pub fn overlaps_any(&self, s: &SubArea) -> bool {
        self.areas
            .get(&s.area)
            .is_some_and(|list| list.iter().any(|e| e.overlaps(s)))
    }

    /// Union every sub-area of `other` into `self`. Returns whether `self` changed.
    pub fn union_from(&mut self, other: &SubAreaSet) -> bool {
        let mut changed = false;
        for s in other.iter() {
            changed |= self.gen(*s);
        }
        changed
    }
}

impl PartialEq for SubAreaSet {
    fn eq(&self, other: &Self) -> bool {
        if self.areas.len() != other.areas.len() {
            return false;
        }
        for (area, list) in &self.areas {
            let Some(other_list) = other.areas.get(area) else {
                return false;
            };
            if list.len() != other_list.len() {
                return false;
            }
            let mut a: SmallVec<[(i64, i64); 4]> = list.iter().map(|s| (s.lo(), s.hi)).collect();
            let mut b: SmallVec<[(i64, i64); 4]> =
                other_list.iter().map(|s| (s.lo(), s.hi)).collect();
            a.sort_unstable();
            b.sort_unstable();
            if a != b {
                return false;
            }
        }
        true
    }
}

impl Eq for SubAreaSet {}

/// A running map from [`Area`] to something about it: a size in bytes (`sizing`, `allocate`), or
/// an assigned byte offset (`allocate`, `manifest`).
pub type AreaMap = FxHashMap<Area, i64>;
