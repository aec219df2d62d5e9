//! IR Translator (§4.1): converts a validated Wasm function body into an
//! `ir::Function`. The Wasm operand stack becomes SSA values directly;
//! locals become SSA values managed by [`ssa::SsaBuilder`]; structured
//! control (`block`/`loop`/`if`) becomes basic blocks joined by block
//! parameters at merges.

mod control;
mod environment;
mod ssa;

pub use environment::{StandaloneEnvironment, TranslationEnvironment};
pub use ssa::Variable;

use crate::ir::{
    Block, EdgeSlot, FloatCC, Function, InstBuilder, Immediate, InstructionData, IntCC, Opcode,
    Signature, Terminator, TrapCode, Type, Value,
};
use crate::result::TranslationError;
use control::ControlFrame;
use wasmflow_environ::{DefinedFuncIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TypeIndex};
use wasmparser::{BlockType, Operator};

pub struct FuncTranslator<'env> {
    env: &'env dyn TranslationEnvironment,
    func: Function,
    ssa: ssa::SsaBuilder,
    operand_stack: Vec<Value>,
    control_stack: Vec<ControlFrame>,
    cur_block: Block,
    reachable: bool,
    num_locals: u32,
    body_offset: usize,
    body_bytes: Vec<u8>,
}

/// Translate one module-defined function into IR (§4.1's public contract).
pub fn translate_function(
    env: &dyn TranslationEnvironment,
    defined_index: DefinedFuncIndex,
) -> Result<Function, TranslationError> {
    let mut t = FuncTranslator::new(env, defined_index)?;
    t.translate_body()?;
    Ok(t.func)
}

impl<'env> FuncTranslator<'env> {
    fn new(
        env: &'env dyn TranslationEnvironment,
        defined_index: DefinedFuncIndex,
    ) -> Result<Self, TranslationError> {
        let module = env.module();
        let func_index = module.func_index(defined_index);
        let wasm_sig = module.signature(func_index).clone();
        let params: Vec<Type> = wasm_sig.params.iter().copied().map(Type::from).collect();
        let results: Vec<Type> = wasm_sig.results.iter().copied().map(Type::from).collect();

        let name = format!("wasm_func_{}", func_index.as_u32());
        let mut func = Function::with_name_signature(
            name,
            Signature {
                params: params.clone(),
                results,
            },
        );
        let entry = func.make_block();
        func.entry_block = Some(entry);

        let body = &module.function_bodies[defined_index];
        let body_offset = body.offset;
        let body_bytes = body.bytes.clone();

        let mut this = FuncTranslator {
            env,
            func,
            ssa: ssa::SsaBuilder::default(),
            operand_stack: Vec::new(),
            control_stack: Vec::new(),
            cur_block: entry,
            reachable: true,
            num_locals: 0,
            body_offset,
            body_bytes,
        };

        for ty in &params {
            let param_value = this.func.append_block_param(entry, *ty);
            let var = this.declare_local(*ty);
            this.ssa.def_var(entry, var, param_value);
        }

        let reader = body.reader();
        let mut locals_reader =
            reader
                .get_locals_reader()
                .map_err(|e| TranslationError::Malformed {
                    offset: body_offset,
                    reason: e.to_string(),
                })?;
        for _ in 0..locals_reader.get_count() {
            let (count, val_type) =
                locals_reader
                    .read()
                    .map_err(|e| TranslationError::Malformed {
                        offset: body_offset,
                        reason: e.to_string(),
                    })?;
            let ty = Type::from(val_type);
            for _ in 0..count {
                let var = this.declare_local(ty);
                let zero = this.zero_value(ty);
                this.ssa.def_var(entry, var, zero);
            }
        }

        this.ssa.seal_block(&mut this.func, entry);
        Ok(this)
    }

    fn declare_local(&mut self, ty: Type) -> Variable {
        let var = Variable::new(self.num_locals as usize);
        self.num_locals += 1;
        self.ssa.declare_var(var, ty);
        var
    }

    fn zero_value(&mut self, ty: Type) -> Value {
        match ty {
            Type::I32 | Type::I64 => self.ins().iconst(ty, 0),
            Type::F32 => self.ins().f32const(0),
            Type::F64 => self.ins().f64const(0),
            Type::FuncRef | Type::ExternRef | Type::AnyGcRef => {
                let inst = self.func.dfg.make_inst(InstructionData::RefNull { ty });
                self.func.append_inst(self.cur_block, inst);
                self.func.dfg.append_result(inst, ty)
            }
            Type::V128 => {
                let inst = self.func.dfg.make_inst(InstructionData::UnaryImm {
                    opcode: Opcode::Vconst,
                    imm: Immediate::V128(0),
                });
                self.func.append_inst(self.cur_block, inst);
                self.func.dfg.append_result(inst, ty)
            }
        }
    }

    fn push(&mut self, v: Value) {
        self.operand_stack.push(v);
    }

    fn pop(&mut self) -> Value {
        self.operand_stack
            .pop()
            .expect("operand stack underflow (module was supposed to be validated)")
    }

    fn ins(&mut self) -> InstBuilder<'_> {
        InstBuilder::new(&mut self.func, self.cur_block)
    }

    fn block_type_arities(&self, bt: BlockType) -> (Vec<Type>, Vec<Type>) {
        match bt {
            BlockType::Empty => (vec![], vec![]),
            BlockType::Type(vt) => (vec![], vec![Type::from(vt)]),
            BlockType::FuncType(idx) => {
                let sig = &self.env.module().types[TypeIndex::from_u32(idx)];
                (
                    sig.params.iter().copied().map(Type::from).collect(),
                    sig.results.iter().copied().map(Type::from).collect(),
                )
            }
        }
    }

    /// Truncate the operand stack back to `height` for unreachable code
    /// that wasm validation still assigns types to (everything after an
    /// `unreachable`/`br`/`return` until the matching `else`/`end`).
    fn mark_unreachable(&mut self, height: usize) {
        self.reachable = false;
        self.operand_stack.truncate(height);
    }

    fn translate_body(&mut self) -> Result<(), TranslationError> {
        let func_body = wasmflow_environ::FunctionBody {
            offset: self.body_offset,
            bytes: self.body_bytes.clone(),
        };
        let reader = func_body.reader();
        let operators = reader
            .get_operators_reader()
            .map_err(|e| TranslationError::Malformed {
                offset: self.body_offset,
                reason: e.to_string(),
            })?;
        for op in operators.into_iter_with_offsets() {
            let (op, offset) = op.map_err(|e| TranslationError::Malformed {
                offset: self.body_offset,
                reason: e.to_string(),
            })?;
            self.translate_operator(op, offset)?;
        }
        Ok(())
    }

    fn translate_operator(&mut self, op: Operator<'_>, offset: usize) -> Result<(), TranslationError> {
        // Once unreachable, only control-flow operators that affect nesting
        // (`block`/`loop`/`if`/`else`/`end`) still have observable effect;
        // everything else is skipped without touching IR, matching how
        // `cranelift-wasm` handles dead code within a validated module.
        if !self.reachable
            && !matches!(
                op,
                Operator::Block { .. }
                    | Operator::Loop { .. }
                    | Operator::If { .. }
                    | Operator::Else
                    | Operator::End
            )
        {
            return Ok(());
        }

        match op {
            Operator::Unreachable => {
                self.ins().trap(TrapCode::Unreachable);
                self.close_block(Terminator::Unreachable {
                    code: TrapCode::Unreachable,
                });
            }
            Operator::Nop => {}

            Operator::Block { blockty } => self.translate_block(blockty),
            Operator::Loop { blockty } => self.translate_loop(blockty),
            Operator::If { blockty } => self.translate_if(blockty),
            Operator::Else => self.translate_else(),
            Operator::End => self.translate_end(),

            Operator::Br { relative_depth } => self.translate_br(relative_depth),
            Operator::BrIf { relative_depth } => self.translate_br_if(relative_depth),
            Operator::BrTable { targets } => self.translate_br_table(&targets),
            Operator::Return => self.translate_return(),

            Operator::Call { function_index } => {
                self.translate_call(FuncIndex::from_u32(function_index), false)
            }
            Operator::ReturnCall { function_index } => {
                self.translate_call(FuncIndex::from_u32(function_index), true)
            }
            Operator::CallIndirect {
                type_index,
                table_index,
                ..
            } => self.translate_call_indirect(type_index, table_index, false),
            Operator::ReturnCallIndirect {
                type_index,
                table_index,
            } => self.translate_call_indirect(type_index, table_index, true),

            Operator::Drop => {
                self.pop();
            }
            Operator::Select | Operator::TypedSelect { .. } => self.translate_select(),

            Operator::LocalGet { local_index } => {
                let var = Variable::new(local_index as usize);
                let v = self.ssa.use_var(&mut self.func, self.cur_block, var);
                self.push(v);
            }
            Operator::LocalSet { local_index } => {
                let v = self.pop();
                self.ssa
                    .def_var(self.cur_block, Variable::new(local_index as usize), v);
            }
            Operator::LocalTee { local_index } => {
                let v = *self.operand_stack.last().unwrap();
                self.ssa
                    .def_var(self.cur_block, Variable::new(local_index as usize), v);
            }

            Operator::GlobalGet { global_index } => self.translate_global_get(global_index),
            Operator::GlobalSet { global_index } => self.translate_global_set(global_index),

            Operator::I32Const { value } => {
                let v = self.ins().iconst(Type::I32, value as i64);
                self.push(v);
            }
            Operator::I64Const { value } => {
                let v = self.ins().iconst(Type::I64, value);
                self.push(v);
            }
            Operator::F32Const { value } => {
                let v = self.ins().f32const(value.bits());
                self.push(v);
            }
            Operator::F64Const { value } => {
                let v = self.ins().f64const(value.bits());
                self.push(v);
            }

            // --- integer arithmetic ---
            Operator::I32Add => self.bin(Opcode::Iadd, Type::I32),
            Operator::I32Sub => self.bin(Opcode::Isub, Type::I32),
            Operator::I32Mul => self.bin(Opcode::Imul, Type::I32),
            Operator::I32DivS => self.bin(Opcode::SDiv, Type::I32),
            Operator::I32DivU => self.bin(Opcode::UDiv, Type::I32),
            Operator::I32RemS => self.bin(Opcode::SRem, Type::I32),
            Operator::I32RemU => self.bin(Opcode::URem, Type::I32),
            Operator::I32And => self.bin(Opcode::Band, Type::I32),
            Operator::I32Or => self.bin(Opcode::Bor, Type::I32),
            Operator::I32Xor => self.bin(Opcode::Bxor, Type::I32),
            Operator::I32Shl => self.bin(Opcode::Ishl, Type::I32),
            Operator::I32ShrS => self.bin(Opcode::Sshr, Type::I32),
            Operator::I32ShrU => self.bin(Opcode::Ushr, Type::I32),
            Operator::I32Rotl => self.bin(Opcode::Rotl, Type::I32),
            Operator::I32Rotr => self.bin(Opcode::Rotr, Type::I32),
            Operator::I32Clz => self.un(Opcode::Clz, Type::I32),
            Operator::I32Ctz => self.un(Opcode::Ctz, Type::I32),
            Operator::I32Popcnt => self.un(Opcode::Popcnt, Type::I32),
            Operator::I32Eqz => {
                let a = self.pop();
                let zero = self.ins().iconst(Type::I32, 0);
                let v = self.ins().icmp(IntCC::Eq, a, zero);
                self.push(v);
            }

            Operator::I64Add => self.bin(Opcode::Iadd, Type::I64),
            Operator::I64Sub => self.bin(Opcode::Isub, Type::I64),
            Operator::I64Mul => self.bin(Opcode::Imul, Type::I64),
            Operator::I64DivS => self.bin(Opcode::SDiv, Type::I64),
            Operator::I64DivU => self.bin(Opcode::UDiv, Type::I64),
            Operator::I64RemS => self.bin(Opcode::SRem, Type::I64),
            Operator::I64RemU => self.bin(Opcode::URem, Type::I64),
            Operator::I64And => self.bin(Opcode::Band, Type::I64),
            Operator::I64Or => self.bin(Opcode::Bor, Type::I64),
            Operator::I64Xor => self.bin(Opcode::Bxor, Type::I64),
            Operator::I64Shl => self.bin(Opcode::Ishl, Type::I64),
            Operator::I64ShrS => self.bin(Opcode::Sshr, Type::I64),
            Operator::I64ShrU => self.bin(Opcode::Ushr, Type::I64),
            Operator::I64Rotl => self.bin(Opcode::Rotl, Type::I64),
            Operator::I64Rotr => self.bin(Opcode::Rotr, Type::I64),
            Operator::I64Clz => self.un(Opcode::Clz, Type::I64),
            Operator::I64Ctz => self.un(Opcode::Ctz, Type::I64),
            Operator::I64Popcnt => self.un(Opcode::Popcnt, Type::I64),
            Operator::I64Eqz => {
                let a = self.pop();
                let zero = self.ins().iconst(Type::I64, 0);
                let v = self.ins().icmp(IntCC::Eq, a, zero);
                self.push(v);
            }

            // --- integer comparisons ---
            Operator::I32Eq => self.icmp(IntCC::Eq),
            Operator::I32Ne => self.icmp(IntCC::Ne),
            Operator::I32LtS => self.icmp(IntCC::SignedLt),
            Operator::I32LeS => self.icmp(IntCC::SignedLe),
            Operator::I32GtS => self.icmp(IntCC::SignedGt),
            Operator::I32GeS => self.icmp(IntCC::SignedGe),
            Operator::I32LtU => self.icmp(IntCC::UnsignedLt),
            Operator::I32LeU => self.icmp(IntCC::UnsignedLe),
            Operator::I32GtU => self.icmp(IntCC::UnsignedGt),
            Operator::I32GeU => self.icmp(IntCC::UnsignedGe),
            Operator::I64Eq => self.icmp(IntCC::Eq),
            Operator::I64Ne => self.icmp(IntCC::Ne),
            Operator::I64LtS => self.icmp(IntCC::SignedLt),
            Operator::I64LeS => self.icmp(IntCC::SignedLe),
            Operator::I64GtS => self.icmp(IntCC::SignedGt),
            Operator::I64GeS => self.icmp(IntCC::SignedGe),
            Operator::I64LtU => self.icmp(IntCC::UnsignedLt),
            Operator::I64LeU => self.icmp(IntCC::UnsignedLe),
            Operator::I64GtU => self.icmp(IntCC::UnsignedGt),
            Operator::I64GeU => self.icmp(IntCC::UnsignedGe),

            // --- float arithmetic ---
            Operator::F32Add => self.bin(Opcode::Fadd, Type::F32),
            Operator::F32Sub => self.bin(Opcode::Fsub, Type::F32),
            Operator::F32Mul => self.bin(Opcode::Fmul, Type::F32),
            Operator::F32Div => self.bin(Opcode::Fdiv, Type::F32),
            Operator::F32Min => self.bin(Opcode::Fmin, Type::F32),
            Operator::F32Max => self.bin(Opcode::Fmax, Type::F32),
            Operator::F32Copysign => self.bin(Opcode::Fcopysign, Type::F32),
            Operator::F32Neg => self.un(Opcode::Fneg, Type::F32),
            Operator::F32Abs => self.un(Opcode::Fabs, Type::F32),
            Operator::F32Sqrt => self.un(Opcode::Fsqrt, Type::F32),
            Operator::F32Ceil => self.un(Opcode::Fceil, Type::F32),
            Operator::F32Floor => self.un(Opcode::Ffloor, Type::F32),
            Operator::F32Trunc => self.un(Opcode::Ftrunc, Type::F32),
            Operator::F32Nearest => self.un(Opcode::Fnearest, Type::F32),

            Operator::F64Add => self.bin(Opcode::Fadd, Type::F64),
            Operator::F64Sub => self.bin(Opcode::Fsub, Type::F64),
            Operator::F64Mul => self.bin(Opcode::Fmul, Type::F64),
            Operator::F64Div => self.bin(Opcode::Fdiv, Type::F64),
            Operator::F64Min => self.bin(Opcode::Fmin, Type::F64),
            Operator::F64Max => self.bin(Opcode::Fmax, Type::F64),
            Operator::F64Copysign => self.bin(Opcode::Fcopysign, Type::F64),
            Operator::F64Neg => self.un(Opcode::Fneg, Type::F64),
            Operator::F64Abs => self.un(Opcode::Fabs, Type::F64),
            Operator::F64Sqrt => self.un(Opcode::Fsqrt, Type::F64),
            Operator::F64Ceil => self.un(Opcode::Fceil, Type::F64),
            Operator::F64Floor => self.un(Opcode::Ffloor, Type::F64),
            Operator::F64Trunc => self.un(Opcode::Ftrunc, Type::F64),
            Operator::F64Nearest => self.un(Opcode::Fnearest, Type::F64),

            Operator::F32Eq => self.fcmp(FloatCC::Eq),
            Operator::F32Ne => self.fcmp(FloatCC::Ne),
            Operator::F32Lt => self.fcmp(FloatCC::Lt),
            Operator::F32Le => self.fcmp(FloatCC::Le),
            Operator::F32Gt => self.fcmp(FloatCC::Gt),
            Operator::F32Ge => self.fcmp(FloatCC::Ge),
            Operator::F64Eq => self.fcmp(FloatCC::Eq),
            Operator::F64Ne => self.fcmp(FloatCC::Ne),
            Operator::F64Lt => self.fcmp(FloatCC::Lt),
            Operator::F64Le => self.fcmp(FloatCC::Le),
            Operator::F64Gt => self.fcmp(FloatCC::Gt),
            Operator::F64Ge => self.fcmp(FloatCC::Ge),

            // --- conversions ---
            Operator::I32WrapI64 => self.un(Opcode::Ireduce, Type::I32),
            Operator::I64ExtendI32S => self.un(Opcode::Sextend, Type::I64),
            Operator::I64ExtendI32U => self.un(Opcode::Uextend, Type::I64),
            Operator::I32TruncF32S
            | Operator::I32TruncF32U
            | Operator::I32TruncF64S
            | Operator::I32TruncF64U => self.un(Opcode::FcvtToIntTrapping, Type::I32),
            Operator::I64TruncF32S
            | Operator::I64TruncF32U
            | Operator::I64TruncF64S
            | Operator::I64TruncF64U => self.un(Opcode::FcvtToIntTrapping, Type::I64),
            Operator::I32TruncSatF32S
            | Operator::I32TruncSatF32U
            | Operator::I32TruncSatF64S
            | Operator::I32TruncSatF64U => self.un(Opcode::FcvtToIntSat, Type::I32),
            Operator::I64TruncSatF32S
            | Operator::I64TruncSatF32U
            | Operator::I64TruncSatF64S
            | Operator::I64TruncSatF64U => self.un(Opcode::FcvtToIntSat, Type::I64),
            Operator::F32ConvertI32S
            | Operator::F32ConvertI32U
            | Operator::F32ConvertI64S
            | Operator::F32ConvertI64U => self.un(Opcode::FcvtFromInt, Type::F32),
            Operator::F64ConvertI32S
            | Operator::F64ConvertI32U
            | Operator::F64ConvertI64S
            | Operator::F64ConvertI64U => self.un(Opcode::FcvtFromInt, Type::F64),
            Operator::F32DemoteF64 => self.un(Opcode::FdemoteF64ToF32, Type::F32),
            Operator::F64PromoteF32 => self.un(Opcode::FpromoteF32ToF64, Type::F64),
            Operator::I32ReinterpretF32 => self.un(Opcode::Bitcast, Type::I32),
            Operator::I64ReinterpretF64 => self.un(Opcode::Bitcast, Type::I64),
            Operator::F32ReinterpretI32 => self.un(Opcode::Bitcast, Type::F32),
            Operator::F64ReinterpretI64 => self.un(Opcode::Bitcast, Type::F64),
            Operator::I32Extend8S | Operator::I32Extend16S => self.un(Opcode::Sextend, Type::I32),
            Operator::I64Extend8S | Operator::I64Extend16S | Operator::I64Extend32S => {
                self.un(Opcode::Sextend, Type::I64)
            }

            // --- memory ---
            Operator::I32Load { memarg } => self.translate_load(Type::I32, 4, false, memarg.offset as u32),
            Operator::I64Load { memarg } => self.translate_load(Type::I64, 8, false, memarg.offset as u32),
            Operator::F32Load { memarg } => self.translate_load(Type::F32, 4, false, memarg.offset as u32),
            Operator::F64Load { memarg } => self.translate_load(Type::F64, 8, false, memarg.offset as u32),
            Operator::I32Load8S { memarg } => self.translate_load(Type::I32, 1, true, memarg.offset as u32),
            Operator::I32Load8U { memarg } => self.translate_load(Type::I32, 1, false, memarg.offset as u32),
            Operator::I32Load16S { memarg } => self.translate_load(Type::I32, 2, true, memarg.offset as u32),
            Operator::I32Load16U { memarg } => self.translate_load(Type::I32, 2, false, memarg.offset as u32),
            Operator::I64Load8S { memarg } => self.translate_load(Type::I64, 1, true, memarg.offset as u32),
            Operator::I64Load8U { memarg } => self.translate_load(Type::I64, 1, false, memarg.offset as u32),
            Operator::I64Load16S { memarg } => self.translate_load(Type::I64, 2, true, memarg.offset as u32),
            Operator::I64Load16U { memarg } => self.translate_load(Type::I64, 2, false, memarg.offset as u32),
            Operator::I64Load32S { memarg } => self.translate_load(Type::I64, 4, true, memarg.offset as u32),
            Operator::I64Load32U { memarg } => self.translate_load(Type::I64, 4, false, memarg.offset as u32),

            Operator::I32Store { memarg } => self.translate_store(4, memarg.offset as u32),
            Operator::I64Store { memarg } => self.translate_store(8, memarg.offset as u32),
            Operator::F32Store { memarg } => self.translate_store(4, memarg.offset as u32),
            Operator::F64Store { memarg } => self.translate_store(8, memarg.offset as u32),
            Operator::I32Store8 { memarg } => self.translate_store(1, memarg.offset as u32),
            Operator::I32Store16 { memarg } => self.translate_store(2, memarg.offset as u32),
            Operator::I64Store8 { memarg } => self.translate_store(1, memarg.offset as u32),
            Operator::I64Store16 { memarg } => self.translate_store(2, memarg.offset as u32),
            Operator::I64Store32 { memarg } => self.translate_store(4, memarg.offset as u32),

            Operator::MemorySize { mem, .. } => {
                let inst = self.func.dfg.make_inst(InstructionData::Nullary {
                    opcode: Opcode::MemorySize,
                    imm: mem,
                });
                self.func.append_inst(self.cur_block, inst);
                let v = self.func.dfg.append_result(inst, Type::I32);
                self.push(v);
            }
            Operator::MemoryGrow { mem, .. } => {
                let delta = self.pop();
                let inst = self.func.dfg.make_inst(InstructionData::MemoryOp {
                    opcode: Opcode::MemoryGrow,
                    args: {
                        let mut l = crate::ir::ValueList::default();
                        l.push(delta, &mut self.func.dfg.value_list_pool);
                        l
                    },
                    segment_or_zero: mem,
                });
                self.func.append_inst(self.cur_block, inst);
                let v = self.func.dfg.append_result(inst, Type::I32);
                self.push(v);
            }
            Operator::MemoryCopy { dst_mem, src_mem } => {
                let len = self.pop();
                let src = self.pop();
                let dst = self.pop();
                self.memory_op3(Opcode::MemoryCopy, dst, src, len, dst_mem ^ src_mem);
            }
            Operator::MemoryFill { mem } => {
                let len = self.pop();
                let val = self.pop();
                let dst = self.pop();
                self.memory_op3(Opcode::MemoryFill, dst, val, len, mem);
            }
            Operator::MemoryInit { data_index, mem } => {
                let len = self.pop();
                let src = self.pop();
                let dst = self.pop();
                self.memory_op3(Opcode::MemoryInit, dst, src, len, data_index ^ mem);
            }
            Operator::DataDrop { data_index } => {
                let inst = self.func.dfg.make_inst(InstructionData::Nullary {
                    opcode: Opcode::DataDrop,
                    imm: data_index,
                });
                self.func.append_inst(self.cur_block, inst);
            }

            // --- tables / reference types / bulk memory ---
            Operator::TableGet { table } => {
                let idx = self.pop();
                let ty = self.env.module().tables[TableIndex::from_u32(table)]
                    .element
                    .clone();
                let ty = Type::from(ty);
                let inst = self.func.dfg.make_inst(InstructionData::TableOp {
                    opcode: Opcode::TableGet,
                    table_index: table,
                    args: single(&mut self.func, idx),
                });
                self.func.append_inst(self.cur_block, inst);
                let v = self.func.dfg.append_result(inst, ty);
                self.push(v);
            }
            Operator::TableSet { table } => {
                let val = self.pop();
                let idx = self.pop();
                let inst = self.func.dfg.make_inst(InstructionData::TableOp {
                    opcode: Opcode::TableSet,
                    table_index: table,
                    args: pair(&mut self.func, idx, val),
                });
                self.func.append_inst(self.cur_block, inst);
            }
            Operator::TableGrow { table } => {
                let delta = self.pop();
                let init = self.pop();
                let inst = self.func.dfg.make_inst(InstructionData::TableOp {
                    opcode: Opcode::TableGrow,
                    table_index: table,
                    args: pair(&mut self.func, init, delta),
                });
                self.func.append_inst(self.cur_block, inst);
                let v = self.func.dfg.append_result(inst, Type::I32);
                self.push(v);
            }
            Operator::TableSize { table } => {
                let inst = self.func.dfg.make_inst(InstructionData::Nullary {
                    opcode: Opcode::TableSize,
                    imm: table,
                });
                self.func.append_inst(self.cur_block, inst);
                let v = self.func.dfg.append_result(inst, Type::I32);
                self.push(v);
            }
            Operator::TableFill { table } => {
                let len = self.pop();
                let val = self.pop();
                let idx = self.pop();
                let inst = self.func.dfg.make_inst(InstructionData::TableOp {
                    opcode: Opcode::TableFill,
                    table_index: table,
                    args: triple(&mut self.func, idx, val, len),
                });
                self.func.append_inst(self.cur_block, inst);
            }
            Operator::TableCopy {
                dst_table,
                src_table,
            } => {
                let len = self.pop();
                let src = self.pop();
                let dst = self.pop();
                let inst = self.func.dfg.make_inst(InstructionData::TableOp {
                    opcode: Opcode::TableCopy,
                    table_index: dst_table ^ src_table,
                    args: triple(&mut self.func, dst, src, len),
                });
                self.func.append_inst(self.cur_block, inst);
            }
            Operator::TableInit { elem_index, table } => {
                let len = self.pop();
                let src = self.pop();
                let dst = self.pop();
                let inst = self.func.dfg.make_inst(InstructionData::TableOp {
                    opcode: Opcode::TableInit,
                    table_index: table ^ elem_index,
                    args: triple(&mut self.func, dst, src, len),
                });
                self.func.append_inst(self.cur_block, inst);
            }
            Operator::ElemDrop { elem_index } => {
                let inst = self.func.dfg.make_inst(InstructionData::Nullary {
                    opcode: Opcode::ElemDrop,
                    imm: elem_index,
                });
                self.func.append_inst(self.cur_block, inst);
            }

            Operator::RefNull { hty } => {
                let ty = if hty.is_func() {
                    Type::FuncRef
                } else {
                    Type::ExternRef
                };
                let inst = self.func.dfg.make_inst(InstructionData::RefNull { ty });
                self.func.append_inst(self.cur_block, inst);
                let v = self.func.dfg.append_result(inst, ty);
                self.push(v);
            }
            Operator::RefIsNull => {
                let arg = self.pop();
                let v = self.ins().unary(Opcode::RefIsNull, Type::I32, arg);
                self.push(v);
            }
            Operator::RefFunc { function_index } => {
                let inst = self
                    .func
                    .dfg
                    .make_inst(InstructionData::RefFunc { func_index: function_index });
                self.func.append_inst(self.cur_block, inst);
                let v = self.func.dfg.append_result(inst, Type::FuncRef);
                self.push(v);
            }

            other => {
                return Err(TranslationError::Unsupported(format!(
                    "{:?} at offset {}",
                    OperatorDebug(&other),
                    offset
                )))
            }
        }
        Ok(())
    }

    fn bin(&mut self, op: Opcode, ty: Type) {
        let b = self.pop();
        let a = self.pop();
        let v = self.ins().binary(op, ty, a, b);
        self.push(v);
    }

    fn un(&mut self, op: Opcode, ty: Type) {
        let a = self.pop();
        let v = self.ins().unary(op, ty, a);
        self.push(v);
    }

    fn icmp(&mut self, cc: IntCC) {
        let b = self.pop();
        let a = self.pop();
        let v = self.ins().icmp(cc, a, b);
        self.push(v);
    }

    fn fcmp(&mut self, cc: FloatCC) {
        let b = self.pop();
        let a = self.pop();
        let v = self.ins().fcmp(cc, a, b);
        self.push(v);
    }

    fn memory_op3(&mut self, op: Opcode, a: Value, b: Value, c: Value, seg: u32) {
        let inst = self.func.dfg.make_inst(InstructionData::MemoryOp {
            opcode: op,
            args: triple(&mut self.func, a, b, c),
            segment_or_zero: seg,
        });
        self.func.append_inst(self.cur_block, inst);
    }

    fn translate_load(&mut self, ty: Type, width: u32, signed: bool, offset: u32) {
        let addr = self.pop();
        let v = self
            .ins()
            .load_sized(ty, Opcode::Load, addr, offset, width, signed);
        self.push(v);
    }

    fn translate_store(&mut self, width: u32, offset: u32) {
        let val = self.pop();
        let addr = self.pop();
        self.ins().store(Opcode::Store, addr, val, offset, width);
    }

    fn translate_global_get(&mut self, global_index: u32) {
        let idx = GlobalIndex::from_u32(global_index);
        let ty = Type::from(self.env.module().globals[idx].value_type);
        let addr = self.env.global_address(idx) as i64;
        let addr_val = self.ins().iconst(Type::I64, addr);
        let v = self.ins().load(ty, Opcode::Load, addr_val, 0);
        self.push(v);
    }

    fn translate_global_set(&mut self, global_index: u32) {
        let idx = GlobalIndex::from_u32(global_index);
        let val = self.pop();
        let addr = self.env.global_address(idx) as i64;
        let addr_val = self.ins().iconst(Type::I64, addr);
        let width = self.func.dfg.value_type(val).bytes();
        self.ins().store(Opcode::Store, addr_val, val, 0, width);
    }

    fn translate_select(&mut self) {
        let cond = self.pop();
        let if_false = self.pop();
        let if_true = self.pop();
        let ty = self.func.dfg.value_type(if_true);
        let v = self.ins().select(ty, cond, if_true, if_false);
        self.push(v);
    }

    fn translate_call(&mut self, func_index: FuncIndex, is_tail: bool) {
        let sig = self.env.module().signature(func_index).clone();
        let nargs = sig.params.len();
        let args_start = self.operand_stack.len() - nargs;
        let arg_values: Vec<Value> = self.operand_stack.split_off(args_start);

        if is_tail {
            self.close_block(Terminator::ReturnCall {
                func_index: func_index.as_u32(),
                args: arg_values,
            });
            return;
        }

        let mut list = crate::ir::ValueList::default();
        for v in &arg_values {
            list.push(*v, &mut self.func.dfg.value_list_pool);
        }
        let inst = self.func.dfg.make_inst(InstructionData::Call {
            func_index: func_index.as_u32(),
            args: list,
        });
        self.func.append_inst(self.cur_block, inst);
        for rty in sig.results.iter().copied().map(Type::from) {
            let v = self.func.dfg.append_result(inst, rty);
            self.push(v);
        }
    }

    fn translate_call_indirect(&mut self, type_index: u32, table_index: u32, is_tail: bool) {
        let sig = self.env.module().types[TypeIndex::from_u32(type_index)].clone();
        let callee = self.pop();
        let nargs = sig.params.len();
        let args_start = self.operand_stack.len() - nargs;
        let arg_values: Vec<Value> = self.operand_stack.split_off(args_start);

        if is_tail {
            self.close_block(Terminator::ReturnCallIndirect {
                table_index,
                type_index,
                callee,
                args: arg_values,
            });
            return;
        }

        let mut list = crate::ir::ValueList::default();
        for v in &arg_values {
            list.push(*v, &mut self.func.dfg.value_list_pool);
        }
        let inst = self.func.dfg.make_inst(InstructionData::CallIndirect {
            table_index,
            type_index,
            callee,
            args: list,
        });
        self.func.append_inst(self.cur_block, inst);
        for rty in sig.results.iter().copied().map(Type::from) {
            let v = self.func.dfg.append_result(inst, rty);
            self.push(v);
        }
    }

    fn close_block(&mut self, term: Terminator) {
        self.func.set_terminator(self.cur_block, term);
        self.mark_unreachable(self.operand_stack.len());
    }

    fn translate_return(&mut self) {
        let n = self.func.signature.results.len();
        let start = self.operand_stack.len() - n;
        let values = self.operand_stack.split_off(start);
        self.close_block(Terminator::Return { values });
    }

    fn translate_block(&mut self, blockty: BlockType) {
        let (_params, results) = self.block_type_arities(blockty);
        let merge_block = self.func.make_block();
        for ty in &results {
            self.func.append_block_param(merge_block, *ty);
        }
        self.control_stack.push(ControlFrame::Block {
            merge_block,
            result_types: results,
            stack_height: self.operand_stack.len(),
            reachable: self.reachable,
        });
    }

    fn translate_loop(&mut self, blockty: BlockType) {
        let (params, _results) = self.block_type_arities(blockty);
        let header = self.func.make_block();
        for ty in &params {
            self.func.append_block_param(header, *ty);
        }

        // Jump from the current block into the loop header with the
        // params already on the operand stack.
        let n = params.len();
        let start = self.operand_stack.len() - n;
        let args = self.operand_stack.split_off(start);
        self.ssa
            .declare_predecessor(&mut self.func, header, self.cur_block, EdgeSlot::Jump);
        self.func
            .set_terminator(self.cur_block, Terminator::Jump { target: header, args });

        self.control_stack.push(ControlFrame::Loop {
            header_block: header,
            param_types: params,
            stack_height: self.operand_stack.len(),
            reachable: self.reachable,
        });
        self.cur_block = header;
        self.operand_stack
            .extend_from_slice(self.func.block_params(header));
    }

    fn translate_if(&mut self, blockty: BlockType) {
        let (_params, results) = self.block_type_arities(blockty);
        let cond = self.pop();
        let merge_block = self.func.make_block();
        for ty in &results {
            self.func.append_block_param(merge_block, *ty);
        }
        let then_block = self.func.make_block();
        let else_block = self.func.make_block();

        self.ssa
            .declare_predecessor(&mut self.func, then_block, self.cur_block, EdgeSlot::BrIfThen);
        self.ssa
            .declare_predecessor(&mut self.func, else_block, self.cur_block, EdgeSlot::BrIfElse);
        self.func.set_terminator(
            self.cur_block,
            Terminator::BrIf {
                cond,
                then_block,
                then_args: vec![],
                else_block,
                else_args: vec![],
            },
        );
        self.ssa.seal_block(&mut self.func, then_block);

        self.control_stack.push(ControlFrame::If {
            merge_block,
            else_block,
            has_else: false,
            result_types: results,
            stack_height: self.operand_stack.len(),
            reachable: self.reachable,
        });
        self.cur_block = then_block;
    }

    fn translate_else(&mut self) {
        let frame = self.control_stack.last_mut().expect("else without if");
        let (merge_block, else_block, result_types, stack_height) = match frame {
            ControlFrame::If {
                merge_block,
                else_block,
                has_else,
                result_types,
                stack_height,
                ..
            } => {
                *has_else = true;
                (*merge_block, *else_block, result_types.clone(), *stack_height)
            }
            _ => panic!("else without if"),
        };

        if self.reachable {
            let args = self.operand_stack.split_off(stack_height);
            self.ssa
                .declare_predecessor(&mut self.func, merge_block, self.cur_block, EdgeSlot::Jump);
            self.func
                .set_terminator(self.cur_block, Terminator::Jump { target: merge_block, args });
        }
        self.ssa.seal_block(&mut self.func, else_block);
        self.operand_stack.truncate(stack_height);
        self.cur_block = else_block;
        self.reachable = true;
        let _ = result_types;
    }

    fn translate_end(&mut self) {
        let frame = self.control_stack.pop().expect("end without matching open");
        match frame {
            ControlFrame::Block {
                merge_block,
                stack_height,
                reachable,
                ..
            } => {
                if self.reachable {
                    let args = self.operand_stack.split_off(stack_height);
                    self.ssa.declare_predecessor(
                        &mut self.func,
                        merge_block,
                        self.cur_block,
                        EdgeSlot::Jump,
                    );
                    self.func
                        .set_terminator(self.cur_block, Terminator::Jump { target: merge_block, args });
                }
                self.ssa.seal_block(&mut self.func, merge_block);
                self.cur_block = merge_block;
                self.operand_stack.truncate(stack_height);
                self.operand_stack
                    .extend_from_slice(self.func.block_params(merge_block));
                self.reachable = reachable || self.block_has_predecessors(merge_block);
            }
            ControlFrame::Loop {
                header_block,
                stack_height,
                reachable,
                ..
            } => {
                if self.reachable {
                    self.ssa.declare_predecessor(
                        &mut self.func,
                        header_block,
                        self.cur_block,
                        EdgeSlot::Jump,
                    );
                    let args = self.operand_stack.split_off(stack_height);
                    self.func.set_terminator(
                        self.cur_block,
                        Terminator::Jump {
                            target: header_block,
                            args,
                        },
                    );
                }
                self.ssa.seal_block(&mut self.func, header_block);
                // A `loop ... end` without a trailing branch just falls
                // through; leave the stack as the loop's param values were
                // already pushed on entry and nothing new merges here.
                self.reachable = reachable;
            }
            ControlFrame::If {
                merge_block,
                else_block,
                has_else,
                result_types,
                stack_height,
                reachable,
                ..
            } => {
                if !has_else {
                    // No `else`: the implicit else branches straight to the
                    // merge block carrying the same values the `if` found
                    // on entry (valid only when params == results, which
                    // Wasm validation guarantees for a missing else). Those
                    // values still sit untouched below `stack_height` since
                    // the `then` arm can only push/pop above it.
                    let arity = result_types.len();
                    let args = self.operand_stack[stack_height - arity..stack_height].to_vec();
                    self.ssa.declare_predecessor(
                        &mut self.func,
                        merge_block,
                        else_block,
                        EdgeSlot::Jump,
                    );
                    self.func.set_terminator(
                        else_block,
                        Terminator::Jump {
                            target: merge_block,
                            args,
                        },
                    );
                    self.ssa.seal_block(&mut self.func, else_block);
                }
                if self.reachable {
                    let args = self.operand_stack.split_off(stack_height);
                    self.ssa.declare_predecessor(
                        &mut self.func,
                        merge_block,
                        self.cur_block,
                        EdgeSlot::Jump,
                    );
                    self.func
                        .set_terminator(self.cur_block, Terminator::Jump { target: merge_block, args });
                }
                self.ssa.seal_block(&mut self.func, merge_block);
                self.cur_block = merge_block;
                self.operand_stack.truncate(stack_height);
                self.operand_stack
                    .extend_from_slice(self.func.block_params(merge_block));
                self.reachable = reachable || self.block_has_predecessors(merge_block);
            }
        }
    }

    fn block_has_predecessors(&self, block: Block) -> bool {
        !self.func.layout[block].predecessors.is_empty()
    }

    fn translate_br(&mut self, relative_depth: u32) {
        let frame = &self.control_stack[self.control_stack.len() - 1 - relative_depth as usize];
        let (target, arity) = frame.branch_target();
        let start = self.operand_stack.len() - arity;
        let args = self.operand_stack[start..].to_vec();
        self.ssa
            .declare_predecessor(&mut self.func, target, self.cur_block, EdgeSlot::Jump);
        self.close_block(Terminator::Jump { target, args });
    }

    fn translate_br_if(&mut self, relative_depth: u32) {
        let cond = self.pop();
        let frame = &self.control_stack[self.control_stack.len() - 1 - relative_depth as usize];
        let (target, arity) = frame.branch_target();
        let start = self.operand_stack.len() - arity;
        let args = self.operand_stack[start..].to_vec();

        let fallthrough = self.func.make_block();
        self.ssa
            .declare_predecessor(&mut self.func, target, self.cur_block, EdgeSlot::BrIfThen);
        self.ssa.declare_predecessor(
            &mut self.func,
            fallthrough,
            self.cur_block,
            EdgeSlot::BrIfElse,
        );
        self.func.set_terminator(
            self.cur_block,
            Terminator::BrIf {
                cond,
                then_block: target,
                then_args: args,
                else_block: fallthrough,
                else_args: vec![],
            },
        );
        self.ssa.seal_block(&mut self.func, fallthrough);
        self.cur_block = fallthrough;
    }

    fn translate_br_table(&mut self, targets: &wasmparser::BrTable<'_>) {
        let index = self.pop();
        let default_rel = targets.default();
        let default_frame =
            &self.control_stack[self.control_stack.len() - 1 - default_rel as usize];
        let (default_block, arity) = default_frame.branch_target();
        let start = self.operand_stack.len() - arity;
        let args = self.operand_stack[start..].to_vec();

        let mut target_blocks = Vec::new();
        for rel in targets.targets() {
            let rel = rel.expect("br_table target");
            let frame = &self.control_stack[self.control_stack.len() - 1 - rel as usize];
            let (b, _) = frame.branch_target();
            target_blocks.push(b);
        }

        for (i, b) in target_blocks.iter().enumerate() {
            self.ssa.declare_predecessor(
                &mut self.func,
                *b,
                self.cur_block,
                EdgeSlot::BrTable(i as u32),
            );
        }
        self.ssa.declare_predecessor(
            &mut self.func,
            default_block,
            self.cur_block,
            EdgeSlot::BrTableDefault,
        );

        self.close_block(Terminator::BrTable {
            index,
            targets: target_blocks,
            default: default_block,
            args,
        });
    }
}

fn single(func: &mut Function, a: Value) -> crate::ir::ValueList {
    let mut l = crate::ir::ValueList::default();
    l.push(a, &mut func.dfg.value_list_pool);
    l
}

fn pair(func: &mut Function, a: Value, b: Value) -> crate::ir::ValueList {
    let mut l = crate::ir::ValueList::default();
    l.push(a, &mut func.dfg.value_list_pool);
    l.push(b, &mut func.dfg.value_list_pool);
    l
}

fn triple(func: &mut Function, a: Value, b: Value, c: Value) -> crate::ir::ValueList {
    let mut l = crate::ir::ValueList::default();
    l.push(a, &mut func.dfg.value_list_pool);
    l.push(b, &mut func.dfg.value_list_pool);
    l.push(c, &mut func.dfg.value_list_pool);
    l
}

/// `wasmparser::Operator` doesn't implement `Debug` for every payload in
/// some builds with reduced feature sets; this newtype gives the
/// `Unsupported` error message a stable, always-available rendering.
struct OperatorDebug<'a, 'b>(&'a Operator<'b>);
impl<'a, 'b> std::fmt::Debug for OperatorDebug<'a, 'b> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0.clone())
    }
}
