//! Mandatory canonicalization (§4.2 stage 1), run even at O0: copy/alias
//! resolution, trivial block-parameter removal (the Braun-paper "trivial
//! phi" case: every predecessor supplies the same incoming value), DCE over
//! pure instructions, and trailing dead-block-parameter elimination.

use crate::ir::{Block, EdgeSlot, Function, Inst, Terminator, Value, ValueDef};
use std::collections::{HashMap, HashSet, VecDeque};

pub fn run(func: &mut Function) -> bool {
    let mut changed = false;
    changed |= copy_resolution(func);
    changed |= trivial_block_params(func);
    changed |= dce(func);
    changed |= dead_trailing_block_params(func);
    changed
}

fn copy_resolution(func: &mut Function) -> bool {
    let mut map: HashMap<Value, Value> = HashMap::new();
    for (inst, data) in func.dfg.insts.iter() {
        if let crate::ir::InstructionData::Copy { arg } = data {
            if let Some(&result) = func.dfg.results[inst].first() {
                map.insert(result, *arg);
            }
        }
    }
    if map.is_empty() {
        return false;
    }

    fn canonical(map: &HashMap<Value, Value>, mut v: Value) -> Value {
        let mut steps = 0;
        while let Some(&next) = map.get(&v) {
            v = next;
            steps += 1;
            if steps > 10_000 {
                break;
            }
        }
        v
    }

    let mut changed = false;
    let blocks = func.block_order.clone();
    for block in blocks {
        let insts = func.layout[block].insts.clone();
        for inst in insts {
            let data = &mut func.dfg.insts[inst];
            let pool = &mut func.dfg.value_list_pool;
            data.map_args_mut(pool, |v| {
                let c = canonical(&map, v);
                changed |= c != v;
                c
            });
        }
        if let Some(mut term) = func.layout[block].terminator.take() {
            term.map_args_mut(|v| {
                let c = canonical(&map, v);
                changed |= c != v;
                c
            });
            func.layout[block].terminator = Some(term);
        }
    }
    changed
}

fn predecessor_arg_for_param(
    func: &Function,
    pred: Block,
    edge: EdgeSlot,
    idx: u16,
) -> Option<Value> {
    let term = func.layout[pred].terminator.as_ref()?;
    let idx = idx as usize;
    match (term, edge) {
        (Terminator::Jump { args, .. }, EdgeSlot::Jump) => args.get(idx).copied(),
        (Terminator::BrIf { then_args, .. }, EdgeSlot::BrIfThen) => then_args.get(idx).copied(),
        (Terminator::BrIf { else_args, .. }, EdgeSlot::BrIfElse) => else_args.get(idx).copied(),
        (Terminator::BrTable { args, .. }, EdgeSlot::BrTable(_) | EdgeSlot::BrTableDefault) => {
            args.get(idx).copied()
        }
        _ => None,
    }
}

fn trivial_block_params(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.block_order.clone() {
        let preds = func.layout[block].predecessors.clone();
        if preds.is_empty() {
            continue;
        }
        let nparams = func.layout[block].params.len();
        for idx in 0..nparams {
            let param_value = func.layout[block].params[idx];
            let mut incoming = Vec::with_capacity(preds.len());
            let mut ok = true;
            for (pred, edge) in &preds {
                match predecessor_arg_for_param(func, *pred, *edge, idx as u16) {
                    Some(v) => incoming.push(v),
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }
            let first = incoming[0];
            if first == param_value || !incoming.iter().all(|v| *v == first) {
                continue;
            }
            replace_value_everywhere(func, param_value, first);
            changed = true;
        }
    }
    changed
}

fn replace_value_everywhere(func: &mut Function, old: Value, new: Value) {
    for block in func.block_order.clone() {
        let insts = func.layout[block].insts.clone();
        for inst in insts {
            let data = &mut func.dfg.insts[inst];
            let pool = &mut func.dfg.value_list_pool;
            data.map_args_mut(pool, |v| if v == old { new } else { v });
        }
        if let Some(mut term) = func.layout[block].terminator.take() {
            term.map_args_mut(|v| if v == old { new } else { v });
            func.layout[block].terminator = Some(term);
        }
    }
}

fn dce(func: &mut Function) -> bool {
    let mut needed: HashSet<Value> = HashSet::new();
    let mut kept_insts: HashSet<Inst> = HashSet::new();
    let mut worklist: VecDeque<Value> = VecDeque::new();

    let mut seed = |v: Value, needed: &mut HashSet<Value>, worklist: &mut VecDeque<Value>| {
        if needed.insert(v) {
            worklist.push_back(v);
        }
    };

    for block in &func.block_order {
        for &inst in &func.layout[*block].insts {
            if func.dfg.insts[inst].opcode().has_side_effects() && kept_insts.insert(inst) {
                for v in func.dfg.insts[inst].all_args(&func.dfg.value_list_pool) {
                    seed(v, &mut needed, &mut worklist);
                }
            }
        }
        if let Some(term) = &func.layout[*block].terminator {
            for v in term.all_args() {
                seed(v, &mut needed, &mut worklist);
            }
        }
    }

    while let Some(v) = worklist.pop_front() {
        match func.dfg.value_defs.get(&v).copied() {
            Some(ValueDef::Result(inst, _)) => {
                if kept_insts.insert(inst) {
                    for a in func.dfg.insts[inst].all_args(&func.dfg.value_list_pool) {
                        seed(a, &mut needed, &mut worklist);
                    }
                }
            }
            Some(ValueDef::Param(block, idx)) => {
                let preds = func.layout[block].predecessors.clone();
                for (pred, edge) in preds {
                    if let Some(arg) = predecessor_arg_for_param(func, pred, edge, idx) {
                        seed(arg, &mut needed, &mut worklist);
                    }
                }
            }
            None => {}
        }
    }

    let mut changed = false;
    for block in func.block_order.clone() {
        let before = func.layout[block].insts.len();
        func.layout[block].insts.retain(|inst| kept_insts.contains(inst));
        changed |= func.layout[block].insts.len() != before;
    }
    changed
}

/// Removes block parameters that are unused *and* at the tail of the
/// parameter list, avoiding the index-renumbering a fully general
/// dead-parameter pass would need (every use records its param by position).
fn dead_trailing_block_params(func: &mut Function) -> bool {
    let mut used: HashSet<Value> = HashSet::new();
    for block in &func.block_order {
        for &inst in &func.layout[*block].insts {
            used.extend(func.dfg.insts[inst].all_args(&func.dfg.value_list_pool));
        }
        if let Some(term) = &func.layout[*block].terminator {
            used.extend(term.all_args());
        }
    }

    let mut changed = false;
    for block in func.block_order.clone() {
        loop {
            let Some(&last) = func.layout[block].params.last() else {
                break;
            };
            if used.contains(&last) {
                break;
            }
            let idx = (func.layout[block].params.len() - 1) as u16;
            func.layout[block].params.pop();
            let preds = func.layout[block].predecessors.clone();
            for (pred, edge) in preds {
                remove_predecessor_arg(func, pred, edge, idx);
            }
            changed = true;
        }
    }
    changed
}

fn remove_predecessor_arg(func: &mut Function, pred: Block, edge: EdgeSlot, idx: u16) {
    let Some(term) = func.layout[pred].terminator.as_mut() else {
        return;
    };
    let idx = idx as usize;
    match (term, edge) {
        (Terminator::Jump { args, .. }, EdgeSlot::Jump) => {
            if idx < args.len() {
                args.remove(idx);
            }
        }
        (Terminator::BrIf { then_args, .. }, EdgeSlot::BrIfThen) => {
            if idx < then_args.len() {
                then_args.remove(idx);
            }
        }
        (Terminator::BrIf { else_args, .. }, EdgeSlot::BrIfElse) => {
            if idx < else_args.len() {
                else_args.remove(idx);
            }
        }
        (Terminator::BrTable { args, .. }, EdgeSlot::BrTable(_) | EdgeSlot::BrTableDefault) => {
            if idx < args.len() {
                args.remove(idx);
            }
        }
        _ => {}
    }
}
