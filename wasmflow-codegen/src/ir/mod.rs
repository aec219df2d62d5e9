//! The mid-level SSA IR (§3.1): typed values, block parameters standing in
//! for phi nodes at merges, and a small opcode set covering Wasm 1.0 plus
//! the multi-value/reference-types/tail-call/bulk-memory/partial-GC/
//! exception-handling extensions named in spec.md §1.

pub mod builder;
pub mod condcodes;
pub mod entities;
pub mod function;
pub mod instructions;
pub mod trapcode;
pub mod types;

pub use builder::InstBuilder;
pub use condcodes::{FloatCC, IntCC};
pub use entities::{Block, Inst, Value};
pub use function::{BlockData, DataFlowGraph, EdgeSlot, Function, Signature, ValueDef};
pub use instructions::{Immediate, InstructionData, MemFlags, Opcode, Terminator, ValueList};
pub use trapcode::TrapCode;
pub use types::Type;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_add_function() {
        let sig = Signature {
            params: vec![Type::I32, Type::I32],
            results: vec![Type::I32],
        };
        let mut func = Function::with_name_signature("add", sig);
        let entry = func.make_block();
        func.entry_block = Some(entry);
        let a = func.append_block_param(entry, Type::I32);
        let b = func.append_block_param(entry, Type::I32);

        let sum = {
            let mut ins = InstBuilder::new(&mut func, entry);
            ins.binary(Opcode::Iadd, Type::I32, a, b)
        };
        func.set_terminator(
            entry,
            Terminator::Return {
                values: vec![sum],
            },
        );

        assert_eq!(func.dfg.value_type(sum), Type::I32);
        assert_eq!(func.block_insts(entry).len(), 1);
        match func.terminator(entry) {
            Terminator::Return { values } => assert_eq!(values, &[sum]),
            _ => panic!("expected return"),
        }
    }
}
