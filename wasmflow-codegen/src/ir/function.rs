use super::entities::{Block, Inst, Value};
use super::instructions::{InstructionData, Terminator, ValueListPool};
use super::types::Type;
use cranelift_entity::{PrimaryMap, SecondaryMap};
use std::collections::HashMap;

/// Where an SSA value comes from: the Nth result of an instruction, or the
/// Nth parameter of a block (§3.1: "exactly one definition").
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ValueDef {
    Result(Inst, u16),
    Param(Block, u16),
}

/// A basic block: its typed parameters, its straight-line instructions in
/// order, and its terminator (§3.1). `terminator` is `None` only
/// transiently while a block is mid-construction.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub params: Vec<Value>,
    pub insts: Vec<Inst>,
    pub terminator: Option<Terminator>,
    pub sealed: bool,
    /// Recorded for SSA construction (§4.1): which block and edge slot
    /// reach this block, so a later-discovered block-param fill-in can
    /// append the right argument to the right predecessor edge.
    pub predecessors: Vec<(Block, EdgeSlot)>,
}

/// Identifies one outgoing edge of a block's terminator, so the SSA
/// builder can append a block-argument to exactly that edge after the
/// terminator has already been built (§4.1 forward translation).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EdgeSlot {
    Jump,
    BrIfThen,
    BrIfElse,
    BrTable(u32),
    BrTableDefault,
}

/// The per-function dataflow graph: instruction data, per-instruction
/// results, and per-value type/definition (§3.1).
#[derive(Clone, Debug, Default)]
pub struct DataFlowGraph {
    pub insts: PrimaryMap<Inst, InstructionData>,
    pub results: SecondaryMap<Inst, smallvec::SmallVec<[Value; 2]>>,
    pub value_types: SecondaryMap<Value, Type>,
    pub value_defs: HashMap<Value, ValueDef>,
    pub value_list_pool: ValueListPool,
    next_value: u32,
}

impl DataFlowGraph {
    pub fn make_value(&mut self, ty: Type, def: ValueDef) -> Value {
        let v = Value::from_u32(self.next_value);
        self.next_value += 1;
        self.value_types[v] = ty;
        self.value_defs.insert(v, def);
        v
    }

    pub fn value_type(&self, v: Value) -> Type {
        self.value_types[v]
    }

    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        self.insts.push(data)
    }

    /// Append a new result value to `inst` and return it.
    pub fn append_result(&mut self, inst: Inst, ty: Type) -> Value {
        let num = self.results[inst].len() as u16;
        let v = self.make_value(ty, ValueDef::Result(inst, num));
        self.results[inst].push(v);
        v
    }

    pub fn inst_results(&self, inst: Inst) -> &[Value] {
        &self.results[inst]
    }

    pub fn first_result(&self, inst: Inst) -> Value {
        self.results[inst][0]
    }
}

#[derive(Clone, Debug, Default)]
pub struct Signature {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

/// A whole function: an ordered list of blocks with an entry block, the
/// dataflow graph backing every value/instruction, and its signature
/// (§3.1).
#[derive(Clone, Debug, Default)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    pub dfg: DataFlowGraph,
    pub layout: PrimaryMap<Block, BlockData>,
    /// Blocks in layout (emission) order; `layout` is keyed by `Block` id
    /// but doesn't itself imply order once blocks can be reordered by the
    /// optimizer's CFG cleanup (§4.2 stage 4).
    pub block_order: Vec<Block>,
    pub entry_block: Option<Block>,
}

impl Function {
    pub fn with_name_signature(name: impl Into<String>, signature: Signature) -> Function {
        Function {
            name: name.into(),
            signature,
            ..Default::default()
        }
    }

    pub fn make_block(&mut self) -> Block {
        let b = self.layout.push(BlockData::default());
        self.block_order.push(b);
        b
    }

    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        let num = self.layout[block].params.len() as u16;
        let v = self.dfg.make_value(ty, ValueDef::Param(block, num));
        self.layout[block].params.push(v);
        v
    }

    pub fn block_params(&self, block: Block) -> &[Value] {
        &self.layout[block].params
    }

    pub fn append_inst(&mut self, block: Block, inst: Inst) {
        self.layout[block].insts.push(inst);
    }

    pub fn set_terminator(&mut self, block: Block, term: Terminator) {
        self.layout[block].terminator = Some(term);
    }

    pub fn terminator(&self, block: Block) -> &Terminator {
        self.layout[block]
            .terminator
            .as_ref()
            .expect("block has no terminator yet")
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.block_order.iter().copied()
    }

    /// All instructions in a block, in order (does not include the
    /// terminator, which is not an `Inst`).
    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.layout[block].insts
    }
}
