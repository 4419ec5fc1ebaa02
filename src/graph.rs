use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::area::{Area, SubArea};

/// A basic block, identified by position in its owning [`Proc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");

/// Static facts about a block's own incoming-argument area, supplied by the surrounding code
/// generator rather than derived here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackInfo {
    /// Size in bytes of this block's incoming-argument area, if it is reached as a call
    /// continuation or is the procedure entry.
    pub arg_bytes: Option<i64>,
    /// Offset of the return address slot within this block's incoming area, for procedure
    /// points reached by a call.
    pub return_off: Option<i64>,
}

/// A stack-slot-shaped expression appearing in an instruction, before and after SP
/// manifestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprSlot {
    /// A symbolic reference to a sub-area, before manifestation.
    StackSlot(Area, i64),
    /// A symbolic reference to the procedure's high-water mark, before manifestation.
    HighWaterMark,
    /// A manifested stack-slot reference, relative to the current SP.
    SpRelative(i64),
    /// A manifested high-water-mark reference, as a concrete byte count.
    HighWaterMarkValue(i64),
    /// An expression this pass does not interpret.
    Opaque,
}

/// A literal stub value written to a dead pointer slot, tagged with the width it was computed
/// for (`stub_slots_on_death`'s caller decides the bit pattern; this crate only records where it
/// goes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubWrite {
    pub area: Area,
    pub offset: i64,
    pub width: i64,
    pub value: i64,
}

/// A non-branching instruction within a block.
#[derive(Debug, Clone, Default)]
pub struct Middle {
    pub uses: SmallVec<[SubArea; 2]>,
    pub defs: SmallVec<[SubArea; 2]>,
    pub exprs: Vec<ExprSlot>,
    /// Set when this instruction is a "safe" foreign call: one that does not itself appear as a
    /// procedure point, but still transiently uses a call area sized to its continuation.
    pub safe_foreign_call: Option<BlockId>,
    /// Set on synthetic instructions inserted by `manifest_sp`: the literal delta added to the
    /// physical SP register.
    pub sp_adjust: Option<i64>,
    /// Dead-pointer stub writes appended by `stub_slots_on_death`.
    pub stubs: Vec<StubWrite>,
}

impl Middle {
    pub fn new(uses: SmallVec<[SubArea; 2]>, defs: SmallVec<[SubArea; 2]>) -> Self {
        Self { uses, defs, ..Default::default() }
    }

    pub fn with_exprs(mut self, exprs: Vec<ExprSlot>) -> Self {
        self.exprs = exprs;
        self
    }

    pub fn safe_foreign_call(
        continuation: BlockId,
        uses: SmallVec<[SubArea; 2]>,
        defs: SmallVec<[SubArea; 2]>,
    ) -> Self {
        Self { uses, defs, safe_foreign_call: Some(continuation), ..Default::default() }
    }

    pub(crate) fn sp_adjust(delta: i64) -> Self {
        Self { sp_adjust: Some(delta), ..Default::default() }
    }
}

/// The final instruction of a block: either control transfer alone, or transfer plus a call.
#[derive(Debug, Clone)]
pub enum Last {
    /// Leaves the procedure: no successors.
    Exit { uses: SmallVec<[SubArea; 2]>, exprs: Vec<ExprSlot> },
    /// Unconditional control transfer, no call semantics.
    Branch { target: BlockId },
    /// A call, optionally returning to `continuation`.
    Call {
        target: BlockId,
        continuation: Option<BlockId>,
        outgoing_bytes: i64,
        /// Set when the callee may grow or shrink the frame in a way this procedure must account
        /// for on return (an "update frame" call).
        update_frame_bytes: Option<i64>,
        uses: SmallVec<[SubArea; 2]>,
        defs: SmallVec<[SubArea; 2]>,
        exprs: Vec<ExprSlot>,
    },
    /// Any other multi-way transfer (conditional branch, switch).
    Other { successors: SmallVec<[BlockId; 4]>, uses: SmallVec<[SubArea; 2]>, exprs: Vec<ExprSlot> },
}

impl Last {
    pub fn successors(&self) -> SmallVec<[BlockId; 4]> {
        match self {
            Last::Exit { .. } => SmallVec::new(),
            Last::Branch { target } => smallvec![*target],
            Last::Call { continuation, .. } => continuation.into_iter().collect(),
            Last::Other { successors, .. } => successors.clone(),
        }
    }

    pub fn uses(&self) -> &[SubArea] {
        match self {
            Last::Exit { uses, .. }
            | Last::Call { uses, .. }
            | Last::Other { uses, .. } => uses,
            Last::Branch { .. } => &[],
        }
    }

    pub fn defs(&self) -> &[SubArea] {
        match self {
            Last::Call { defs, .. } => defs,
            _ => &[],
        }
    }

    /// `None` for `Branch`, which carries no expressions to rewrite.
    pub(crate) fn exprs_mut(&mut self) -> Option<&mut Vec<ExprSlot>> {
        match self {
            Last::Exit { exprs, .. } | Last::Call { exprs, .. } | Last::Other { exprs, .. } => {
                Some(exprs)
            }
            Last::Branch { .. } => None,
        }
    }
}

/// A basic block: static incoming-area facts, a sequence of instructions, and a terminator.
#[derive(Debug, Clone)]
pub struct Block {
    pub stack_info: StackInfo,
    pub middles: Vec<Middle>,
    pub last: Last,
}

/// A procedure: an entity-indexed collection of blocks reachable from `entry`.
#[derive(Debug, Clone)]
pub struct Proc {
    pub entry: BlockId,
    pub arg_bytes: i64,
    blocks: PrimaryMap<BlockId, Block>,
}

impl Proc {
    /// Start building a procedure with the given incoming-argument area size, returning the
    /// procedure and the id reserved for its entry block. The caller must `set_block` the entry
    /// block before the procedure is used.
    pub fn new(arg_bytes: i64) -> (Self, BlockId) {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(Block {
            stack_info: StackInfo::default(),
            middles: Vec::new(),
            last: Last::Exit { uses: SmallVec::new(), exprs: Vec::new() },
        });
        (Self { entry, arg_bytes, blocks }, entry)
    }

    pub fn push_block(&mut self, stack_info: StackInfo, middles: Vec<Middle>, last: Last) -> BlockId {
        self.blocks.push(Block { stack_info, middles, last })
    }

    pub fn set_block(&mut self, id: BlockId, stack_info: StackInfo, middles: Vec<Middle>, last: Last) {
        self.blocks[id] = Block { stack_info, middles, last };
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys()
    }

    /// Predecessors of every block, derived from each block's terminator successors.
    pub fn predecessors(&self) -> FxHashMap<BlockId, SmallVec<[BlockId; 4]>> {
        let mut preds: FxHashMap<BlockId, SmallVec<[BlockId; 4]>> = FxHashMap::default();
        for (id, block) in self.blocks.iter() {
            for succ in block.last.successors() {
                preds.entry(succ).or_default().push(id);
            }
        }
        preds
    }

    /// A postorder traversal of the blocks reachable from `entry`.
    pub fn postorder(&self) -> Vec<BlockId> {
        let mut visited: FxHashMap<BlockId, bool> = FxHashMap::default();
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<(BlockId, bool)> = vec![(self.entry, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if visited.insert(id, true).is_some() {
                continue;
            }
            stack.push((id, true));
            for succ in self.block(id).last.successors() {
                if !visited.contains_key(&succ) {
                    stack.push((succ, false));
                }
            }
        }
        order
    }

    /// Splice a fresh single-instruction block performing `delta`'s SP adjustment onto the edge
    /// `from -> to`, rewiring `from`'s terminator to branch to it instead.
    pub fn insert_between(&mut self, from: BlockId, to: BlockId, delta: i64) -> BlockId {
        let new_id = self.blocks.push(Block {
            stack_info: StackInfo::default(),
            middles: vec![Middle::sp_adjust(delta)],
            last: Last::Branch { target: to },
        });

        let from_block = &mut self.blocks[from];
        let rewired = match &mut from_block.last {
            Last::Branch { target } if *target == to => {
                *target = new_id;
                true
            }
            Last::Other { successors, .. } => {
                let mut any = false;
                for s in successors.iter_mut() {
                    if *s == to {
                        *s = new_id;
                        any = true;
                    }
                }
                any
            }
            _ => false,
        };
        assert!(rewired, "insert_between: block {from:?} has no splice-able edge to {to:?}");
        new_id
    }
}
