use cranelift_entity::entity_impl;

/// A register-allocator-assigned local, referenced by a spill slot's `RegSlot` area.
///
/// Opaque outside of equality/ordering: this crate never inspects a `LocalReg`'s contents, only
/// uses it as a map key and asks the surrounding register allocator about it through
/// [`RegisterClassifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalReg(u32);
entity_impl!(LocalReg, "reg");

/// What this crate needs to know about a register from the surrounding register allocator.
///
/// A single boolean predicate rather than a richer register-type query: nothing in the layout
/// algorithm inspects a register's type beyond whether it must be kept GC-visible (and thus
/// word-aligned) on the stack.
pub trait RegisterClassifier {
    /// Whether `reg`'s spill slot must be treated as a GC root: aligned to a full word so the
    /// collector can scan it uniformly with the rest of the frame.
    fn is_gc_pointer(&self, reg: LocalReg) -> bool;
}
