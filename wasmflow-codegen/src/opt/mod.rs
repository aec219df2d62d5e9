//! IR optimizer (§4.2): mandatory canonicalization, bounded e-graph
//! rewriting, dominator-order GVN/CSE, CFG cleanup, and post-fixpoint
//! rematerialization. Mirrors the stage layout of
//! `cranelift-codegen::egraph`/`cranelift-codegen::context`, scaled down to
//! this IR's opcode set.

mod canon;
mod cfg;
mod egraph;
mod gvn;
mod remat;

use crate::ir::Function;
use crate::OptLevel;
use log::debug;

/// Driver iteration cap (§4.2 stage 6).
const MAX_ITERATIONS: u32 = 100;

pub fn optimize(mut func: Function, level: OptLevel) -> Function {
    canon::run(&mut func);
    if level == OptLevel::None {
        return func;
    }

    let mut iterations = 0;
    loop {
        iterations += 1;
        let mut changed = false;
        changed |= egraph::run(&mut func);
        changed |= gvn::run(&mut func);
        changed |= cfg::run(&mut func);
        changed |= canon::run(&mut func);
        debug!(
            "optimize: iteration {} changed={} func={}",
            iterations, changed, func.name
        );
        if !changed || iterations >= MAX_ITERATIONS {
            break;
        }
    }

    remat::run(&mut func);
    canon::run(&mut func);
    func
}
