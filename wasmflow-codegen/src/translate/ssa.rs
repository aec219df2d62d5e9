//! Incremental SSA construction for Wasm locals (§4.1): "Wasm locals become
//! SSA values re-bound at each write (standard SSA conversion with block
//! parameters at merges)".
//!
//! This is the algorithm `cranelift-frontend`'s `FunctionBuilder` exposes
//! through `declare_var`/`use_var`/`def_var`/`seal_block` (Braun et al.,
//! "Simple and Efficient Construction of Static Single Assignment Form"),
//! scoped down to what the Wasm translator needs: Wasm's operand stack
//! already carries merge values explicitly as branch arguments, so the only
//! values that need lazy phi resolution here are locals read across a
//! block boundary.

use crate::ir::{Block, EdgeSlot, Function, Type, Value};
use cranelift_entity::entity_impl;
use std::collections::HashMap;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Variable(u32);
entity_impl!(Variable, "var");

#[derive(Default)]
struct BlockSsaState {
    /// Current definition of each variable visible at the end of this
    /// block's instructions so far.
    current_def: HashMap<Variable, Value>,
    /// Block parameters inserted speculatively (before the block was
    /// sealed) to stand in for a not-yet-known incoming value, keyed by
    /// the variable they resolve.
    incomplete_params: HashMap<Variable, Value>,
}

/// Tracks per-(block, variable) current definitions and resolves reads
/// that cross block boundaries into block parameters, filling predecessor
/// edges as they become known.
#[derive(Default)]
pub struct SsaBuilder {
    blocks: HashMap<Block, BlockSsaState>,
    var_types: HashMap<Variable, Type>,
}

impl SsaBuilder {
    pub fn declare_var(&mut self, var: Variable, ty: Type) {
        self.var_types.insert(var, ty);
    }

    pub fn def_var(&mut self, block: Block, var: Variable, value: Value) {
        self.blocks
            .entry(block)
            .or_default()
            .current_def
            .insert(var, value);
    }

    /// Resolve a read of `var` as observed at the end of `block`'s
    /// instructions so far, inserting block parameters and back-filling
    /// predecessor edges as needed.
    pub fn use_var(&mut self, func: &mut Function, block: Block, var: Variable) -> Value {
        if let Some(v) = self
            .blocks
            .get(&block)
            .and_then(|b| b.current_def.get(&var).copied())
        {
            return v;
        }

        let ty = *self
            .var_types
            .get(&var)
            .unwrap_or_else(|| panic!("{:?} used before its type was declared", var));

        let value = if func.layout[block].sealed {
            let preds = func.layout[block].predecessors.clone();
            match preds.as_slice() {
                // No predecessors: this is the entry block reading an
                // unset local — Wasm locals are zero-initialized.
                [] => self.zero_value(func, block, ty),
                [(pred, _edge)] => {
                    // Single predecessor: inherit the dominating value
                    // directly, no block parameter required.
                    let pred = *pred;
                    self.use_var(func, pred, var)
                }
                _ => {
                    // Real merge: materialize a block parameter now and
                    // fill every predecessor edge with that predecessor's
                    // value for `var`.
                    let param = func.append_block_param(block, ty);
                    self.def_var(block, var, param);
                    for (pred, edge) in preds {
                        let incoming = self.use_var(func, pred, var);
                        append_edge_argument(func, pred, edge, incoming);
                    }
                    param
                }
            }
        } else {
            // Predecessors aren't all known yet: speculatively add a block
            // parameter; predecessor edges discovered later (and the
            // eventual `seal_block`) fill it in via `seal_block`.
            let param = func.append_block_param(block, ty);
            self.blocks
                .entry(block)
                .or_default()
                .incomplete_params
                .insert(var, param);
            param
        };

        self.def_var(block, var, value);
        value
    }

    fn zero_value(&mut self, func: &mut Function, block: Block, ty: Type) -> Value {
        match ty {
            Type::I32 | Type::I64 => crate::ir::InstBuilder::new(func, block).iconst(ty, 0),
            Type::F32 => crate::ir::InstBuilder::new(func, block).f32const(0),
            Type::F64 => crate::ir::InstBuilder::new(func, block).f64const(0),
            Type::FuncRef | Type::ExternRef | Type::AnyGcRef => {
                let inst = func
                    .dfg
                    .make_inst(crate::ir::InstructionData::RefNull { ty });
                func.append_inst(block, inst);
                func.dfg.append_result(inst, ty)
            }
            Type::V128 => {
                let inst = func.dfg.make_inst(crate::ir::InstructionData::UnaryImm {
                    opcode: crate::ir::Opcode::Vconst,
                    imm: crate::ir::Immediate::V128(0),
                });
                func.append_inst(block, inst);
                func.dfg.append_result(inst, ty)
            }
        }
    }

    /// Called once every branch that can reach `block` has been emitted.
    /// Resolves every parameter that was inserted speculatively while the
    /// block's predecessor set was still incomplete.
    pub fn seal_block(&mut self, func: &mut Function, block: Block) {
        func.layout[block].sealed = true;
        let incomplete = self
            .blocks
            .get(&block)
            .map(|b| b.incomplete_params.clone())
            .unwrap_or_default();
        let preds = func.layout[block].predecessors.clone();
        for (var, param) in incomplete {
            for (pred, edge) in &preds {
                let incoming = self.use_var(func, *pred, var);
                append_edge_argument(func, *pred, *edge, incoming);
            }
            let _ = param;
        }
    }

    /// Record that `pred` can reach `succ` via `edge`. Must be called for
    /// every branch as it is emitted, before `succ` is sealed.
    pub fn declare_predecessor(&mut self, func: &mut Function, succ: Block, pred: Block, edge: EdgeSlot) {
        func.layout[succ].predecessors.push((pred, edge));
    }
}

fn append_edge_argument(func: &mut Function, pred: Block, edge: EdgeSlot, value: Value) {
    use crate::ir::Terminator;
    let term = func
        .layout
        .get_mut(pred)
        .and_then(|b| b.terminator.as_mut())
        .expect("predecessor terminator must already be built before edges are filled");
    match (term, edge) {
        (Terminator::Jump { args, .. }, EdgeSlot::Jump) => args.push(value),
        (Terminator::BrIf { then_args, .. }, EdgeSlot::BrIfThen) => then_args.push(value),
        (Terminator::BrIf { else_args, .. }, EdgeSlot::BrIfElse) => else_args.push(value),
        (Terminator::BrTable { args, .. }, EdgeSlot::BrTable(_) | EdgeSlot::BrTableDefault) => {
            args.push(value)
        }
        _ => panic!("edge slot does not match predecessor terminator shape"),
    }
}
