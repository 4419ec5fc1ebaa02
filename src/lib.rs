//! Stack frame layout for CMM-style control-flow graphs.
//!
//! A procedure's instructions reference stack storage symbolically, grouped into *areas*: the
//! incoming-argument area, one outgoing-argument area per call site, and one spill slot per
//! register the surrounding allocator couldn't keep live in a register. This crate turns that
//! symbolic picture into a concrete one:
//!
//! 1. [`liveness::live_slot_anal`] — which sub-areas are live at each program point.
//! 2. [`allocate::layout`] — a byte offset for every area, built from the liveness facts.
//! 3. [`manifest::manifest_sp`] — symbolic stack-slot expressions rewritten to be relative to a
//!    physical stack pointer, with the SP adjustments the resulting layout requires spliced in.
//! 4. [`stub::stub_slots_on_death`] — optional GC hygiene: stub out slots the instant they die.
//!
//! The graph itself ([`graph::Proc`] and friends) is concrete rather than a trait the surrounding
//! code generator implements: this crate owns the representation it operates on, the way
//! `cranelift-codegen` owns `ir::Block`/`ir::Value` rather than abstracting over them.

pub mod allocate;
pub mod area;
pub mod config;
pub mod graph;
pub mod interference;
pub mod liveness;
pub mod manifest;
pub mod reg;
pub mod sizing;
pub mod stub;

pub use allocate::{layout, ProcPointStatus, ProcPoints};
pub use area::{Area, AreaMap, CallArea, SubArea, SubAreaSet};
pub use config::TargetConfig;
pub use graph::{Block, BlockId, ExprSlot, Last, Middle, Proc, StackInfo, StubWrite};
pub use interference::{build_igraph, AreaNodes, IGraph, InterferenceNodes};
pub use liveness::{live_slot_anal, BlockEnv};
pub use manifest::manifest_sp;
pub use reg::{LocalReg, RegisterClassifier};
pub use stub::stub_slots_on_death;
