//! CFG cleanup (§4.2 stage 4, gated on O2+ in the real pipeline; run
//! unconditionally here since `optimize` only distinguishes O0 from
//! everything else, per the Open Question decision in DESIGN.md):
//! constant-condition branch simplification and unreachable-block removal.
//! Block merging and jump threading are not implemented — they affect
//! compiled code quality, not correctness, and are noted as a deferred gap
//! in DESIGN.md.

use crate::ir::{Function, InstructionData, Opcode, Terminator};
use std::collections::HashSet;

pub fn run(func: &mut Function) -> bool {
    let mut changed = false;
    changed |= fold_constant_branches(func);
    changed |= remove_unreachable_blocks(func);
    changed
}

fn const_bool(func: &Function, v: crate::ir::Value) -> Option<bool> {
    for (inst, data) in func.dfg.insts.iter() {
        if func.dfg.inst_results(inst).first() == Some(&v) {
            if let InstructionData::UnaryImm {
                opcode: Opcode::Iconst,
                imm,
            } = data
            {
                return imm.as_i64().map(|i| i != 0);
            }
        }
    }
    None
}

fn fold_constant_branches(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.block_order.clone() {
        let Some(Terminator::BrIf {
            cond,
            then_block,
            then_args,
            else_block,
            else_args,
        }) = func.layout[block].terminator.clone()
        else {
            continue;
        };
        let Some(taken) = const_bool(func, cond) else {
            continue;
        };
        let (target, args, dropped) = if taken {
            (then_block, then_args, else_block)
        } else {
            (else_block, else_args, then_block)
        };
        func.layout[block].terminator = Some(Terminator::Jump { target, args });
        func.layout[dropped]
            .predecessors
            .retain(|(pred, _)| *pred != block);
        changed = true;
    }
    changed
}

fn remove_unreachable_blocks(func: &mut Function) -> bool {
    let Some(entry) = func.entry_block else {
        return false;
    };
    let mut reachable = HashSet::new();
    let mut stack = vec![entry];
    while let Some(b) = stack.pop() {
        if !reachable.insert(b) {
            continue;
        }
        if let Some(term) = &func.layout[b].terminator {
            for succ in term.successors() {
                stack.push(succ);
            }
        }
    }

    let before = func.block_order.len();
    func.block_order.retain(|b| reachable.contains(b));
    for b in func.block_order.clone() {
        func.layout[b]
            .predecessors
            .retain(|(pred, _)| reachable.contains(pred));
    }
    func.block_order.len() != before
}
