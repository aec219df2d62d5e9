//! Rematerialization (§4.2 stage 5): clone cheap pure values into each
//! use-block rather than letting them live across block boundaries in a
//! register, then rely on the next DCE round to drop a use-block's clone if
//! the register allocator later proves it unnecessary. Non-recursive: a
//! clone's own (empty) operand list never re-triggers this pass.

use crate::ir::{Block, Function, Inst, Value};
use std::collections::{HashMap, HashSet};

pub fn run(func: &mut Function) {
    let candidates: Vec<(Inst, Block, crate::ir::InstructionData, Value)> = func
        .block_order
        .iter()
        .flat_map(|&block| {
            func.layout[block]
                .insts
                .iter()
                .filter_map(move |&inst| {
                    let data = &func.dfg.insts[inst];
                    if data.opcode().is_remat_candidate() {
                        let result = *func.dfg.inst_results(inst).first()?;
                        Some((inst, block, data.clone(), result))
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect();

    for (_inst, home_block, data, result) in candidates {
        let use_blocks = find_use_blocks(func, result);
        if use_blocks.len() <= 1 && use_blocks.contains(&home_block) {
            continue;
        }
        let ty = func.dfg.value_type(result);
        let mut clones: HashMap<Block, Value> = HashMap::new();
        for block in use_blocks {
            if block == home_block {
                continue;
            }
            let clone_value = *clones.entry(block).or_insert_with(|| {
                let new_inst = func.dfg.make_inst(data.clone());
                func.layout[block].insts.insert(0, new_inst);
                func.dfg.append_result(new_inst, ty)
            });
            rewrite_uses_in_block(func, block, result, clone_value);
        }
    }
}

fn find_use_blocks(func: &Function, v: Value) -> HashSet<Block> {
    let mut blocks = HashSet::new();
    for &block in &func.block_order {
        let used_in_insts = func.layout[block].insts.iter().any(|&inst| {
            func.dfg.insts[inst]
                .all_args(&func.dfg.value_list_pool)
                .contains(&v)
        });
        let used_in_term = func.layout[block]
            .terminator
            .as_ref()
            .map(|t| t.all_args().contains(&v))
            .unwrap_or(false);
        if used_in_insts || used_in_term {
            blocks.insert(block);
        }
    }
    blocks
}

fn rewrite_uses_in_block(func: &mut Function, block: Block, old: Value, new: Value) {
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
