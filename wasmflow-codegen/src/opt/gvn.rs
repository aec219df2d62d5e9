//! GVN/CSE (§4.2 stage 3). A full dominator-tree walk isn't built for this
//! IR; scoping the common-subexpression map per basic block is a safe
//! (if weaker) approximation — same-block instructions are always
//! dominated by their predecessors in program order. Any side-effectful
//! instruction clears the map outright rather than only its load-keyed
//! entries, which is the conservative end of the invalidation model §4.2
//! allows ("may skip invalidation" for provably distinct regions is an
//! optimization this pass doesn't attempt).

use crate::ir::InstructionData;
use crate::ir::Function;
use std::collections::HashMap;

pub fn run(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.block_order.clone() {
        let mut seen: HashMap<String, crate::ir::Value> = HashMap::new();
        let insts = func.layout[block].insts.clone();
        for inst in insts {
            let data = func.dfg.insts[inst].clone();
            let opcode = data.opcode();
            if opcode.has_side_effects() {
                seen.clear();
                continue;
            }
            let Some(&result) = func.dfg.inst_results(inst).first() else {
                continue;
            };
            let key = format!("{:?}", data);
            if let Some(&existing) = seen.get(&key) {
                func.dfg.insts[inst] = InstructionData::Copy { arg: existing };
                changed = true;
            } else {
                seen.insert(key, result);
            }
        }
    }
    changed
}
