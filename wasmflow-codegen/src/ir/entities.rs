//! SSA entity identifiers (§3.1). Each is a small typed index backed by
//! `cranelift_entity`, the same crate `cranelift-codegen` itself uses for
//! `Value`/`Block`/`Inst`.

use cranelift_entity::entity_impl;

/// A single SSA value: a unique id with a fixed type and exactly one
/// defining instruction or block-parameter position (§3.1 invariant).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// A basic block: an id, an ordered list of block parameters, an ordered
/// list of instructions, and a terminator.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An instruction id (stable identity distinct from its position in a
/// block's instruction list, so rewrites can replace operands in place).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");
