//! IR → VCode lowering (§4.3): a pattern table keyed by opcode, a
//! defining-instruction cache for O(1) pattern roots, and the AArch64
//! fusions spec.md names explicitly (immediate folding, shifted
//! operands, MADD/MSUB/MNEG, compare+branch, select+compare, memory
//! addressing, trap-preserving bounds checks).
//!
//! Block parameters are resolved before any terminator is built: each IR
//! block param gets one persistent vreg, and every predecessor edge gets
//! a `Copy` into that vreg emitted just before its terminator. This is
//! the classic "parallel copy" phi-elimination, standing in for carrying
//! block arguments as a first-class VCode terminator field.

use crate::ir::{
    Block, Function, Immediate, InstructionData, Inst, IntCC, Opcode, Terminator, Type, Value,
};
use crate::isa::aarch64::regs::{self, RegClass};
use crate::isa::aarch64::vcode::{MemWidth, Reg, VCodeBlock, VCodeFunction, VCodeInst, VCodeTerminator};
use crate::result::{CompileError, CompileResult};
use std::collections::{HashMap, HashSet};

/// AArch64 `ADD`/`SUB`/logical immediate encodings top out well short of
/// the full 32/64-bit range; this is a conservative stand-in for the
/// real imm12/bitmask-immediate legality check.
fn fits_add_imm(v: i64) -> bool {
    (0..=0xFFF).contains(&v) || (0..=0xFFF).contains(&(-v))
}

struct Lowering<'f> {
    func: &'f Function,
    vcode: VCodeFunction,
    block_index: HashMap<Block, usize>,
    definers: HashMap<Value, Inst>,
    use_count: HashMap<Value, u32>,
    param_regs: HashMap<Value, Reg>,
    reg_of: HashMap<Value, Reg>,
    fused: HashSet<Inst>,
}

pub fn lower(func: &Function) -> CompileResult<VCodeFunction> {
    let mut l = Lowering {
        func,
        vcode: VCodeFunction::default(),
        block_index: HashMap::new(),
        definers: HashMap::new(),
        use_count: HashMap::new(),
        param_regs: HashMap::new(),
        reg_of: HashMap::new(),
        fused: HashSet::new(),
    };
    l.vcode.name = func.name.clone();
    l.build_definers();
    l.build_use_counts();
    l.assign_block_indices();
    l.assign_param_regs();
    l.assign_abi_regs();
    for &block in &func.block_order {
        l.lower_block(block)?;
    }
    Ok(l.vcode)
}

impl<'f> Lowering<'f> {
    fn build_definers(&mut self) {
        for (inst, _) in self.func.dfg.insts.iter() {
            for &v in self.func.dfg.inst_results(inst) {
                self.definers.insert(v, inst);
            }
        }
    }

    fn build_use_counts(&mut self) {
        for (inst, data) in self.func.dfg.insts.iter() {
            for v in data.all_args(&self.func.dfg.value_list_pool) {
                *self.use_count.entry(v).or_insert(0) += 1;
            }
            let _ = inst;
        }
        for &block in &self.func.block_order {
            if let Some(term) = &self.func.layout[block].terminator {
                for v in term.all_args() {
                    *self.use_count.entry(v).or_insert(0) += 1;
                }
            }
        }
    }

    fn assign_block_indices(&mut self) {
        for (i, &b) in self.func.block_order.iter().enumerate() {
            self.block_index.insert(b, i);
            self.vcode.blocks.push(VCodeBlock::default());
        }
        if let Some(entry) = self.func.entry_block {
            self.vcode.entry = self.block_index[&entry];
        }
    }

    fn assign_param_regs(&mut self) {
        for &block in &self.func.block_order {
            for &p in self.func.block_params(block) {
                let ty = self.func.dfg.value_type(p);
                let r = self.vcode.new_vreg(ty.reg_class());
                self.param_regs.insert(p, r);
                self.reg_of.insert(p, r);
            }
        }
    }

    fn assign_abi_regs(&mut self) {
        let mut next_int = 0usize;
        let mut next_float = 0usize;
        let entry = match self.func.entry_block {
            Some(b) => b,
            None => return,
        };
        let entry_idx = self.block_index[&entry];
        for &p in self.func.block_params(entry) {
            let ty = self.func.dfg.value_type(p);
            let dest = self.reg_of[&p];
            if ty.is_float() {
                if let Some(preg) = regs::float_arg_reg(next_float) {
                    next_float += 1;
                    self.vcode.float_param_regs.push(dest);
                    self.vcode.blocks[entry_idx]
                        .insts
                        .push(VCodeInst::Copy { dst: dest, src: Reg::P(preg) });
                }
            } else if let Some(preg) = regs::int_arg_reg(next_int) {
                next_int += 1;
                self.vcode.int_param_regs.push(dest);
                self.vcode.blocks[entry_idx]
                    .insts
                    .push(VCodeInst::Copy { dst: dest, src: Reg::P(preg) });
            }
        }
        // Only the first two results of each class get a fixed register
        // (§4.5 return-value ABI); the rest are written through the
        // extra-results buffer by the terminator lowering below.
        let mut ret_int_i = 0usize;
        let mut ret_float_i = 0usize;
        for ty in self.func.signature.results.iter() {
            match ty.reg_class() {
                RegClass::Int => {
                    if ret_int_i < 2 {
                        self.vcode.int_return_regs.push(Reg::P(regs::PReg::int(ret_int_i as u8)));
                    }
                    ret_int_i += 1;
                }
                RegClass::Float => {
                    if ret_float_i < 2 {
                        self.vcode
                            .float_return_regs
                            .push(Reg::P(regs::PReg::float(ret_float_i as u8)));
                    }
                    ret_float_i += 1;
                }
            }
        }
        self.vcode.needs_extra_results_buffer = self.func.signature.results.len() > 2;
    }

    fn single_use(&self, v: Value) -> bool {
        self.use_count.get(&v).copied().unwrap_or(0) == 1
    }

    fn definer_in_block(&self, v: Value, block: Block) -> Option<Inst> {
        let inst = *self.definers.get(&v)?;
        self.func.layout[block].insts.contains(&inst).then_some(inst)
    }

    fn const_i64(&self, v: Value) -> Option<i64> {
        let inst = *self.definers.get(&v)?;
        match &self.func.dfg.insts[inst] {
            InstructionData::UnaryImm { opcode: Opcode::Iconst, imm } => imm.as_i64(),
            _ => None,
        }
    }

    fn emit(&mut self, block_idx: usize, inst: VCodeInst) {
        self.vcode.blocks[block_idx].insts.push(inst);
    }

    fn new_reg(&mut self, ty: Type) -> Reg {
        self.vcode.new_vreg(ty.reg_class())
    }

    /// Materialize (or fetch the cached materialization of) a plain
    /// operand register. Constants are lazily loaded on first use and
    /// cached so repeated uses in a block don't reload them.
    fn operand_reg(&mut self, block_idx: usize, v: Value) -> Reg {
        if let Some(&r) = self.reg_of.get(&v) {
            return r;
        }
        let ty = self.func.dfg.value_type(v);
        let inst = self.definers.get(&v).copied();
        let r = match inst.map(|i| self.func.dfg.insts[i].clone()) {
            Some(InstructionData::UnaryImm { opcode: Opcode::Iconst, imm }) => {
                let dst = self.new_reg(ty);
                self.materialize_int(block_idx, dst, imm.as_i64().unwrap_or(0), ty.bytes());
                dst
            }
            Some(InstructionData::UnaryImm { opcode: Opcode::Fconst, imm }) => {
                let dst = self.new_reg(ty);
                let bits = match imm {
                    Immediate::F32(b) => b as u64,
                    Immediate::F64(b) => b,
                    _ => 0,
                };
                let pool_index = self.vcode.push_constant(bits);
                self.emit(block_idx, VCodeInst::LoadConst { rd: dst, pool_index });
                dst
            }
            _ => self.new_reg(ty),
        };
        self.reg_of.insert(v, r);
        r
    }

    /// Emits a MOVZ/MOVK sequence materializing `value` truncated to
    /// `width_bytes` (4 or 8), so a sign-extended negative `i32` constant
    /// doesn't spuriously touch the upper word of a 32-bit register.
    fn materialize_int(&mut self, block_idx: usize, dst: Reg, value: i64, width_bytes: u32) {
        let bits = if width_bytes <= 4 {
            (value as u32) as u64
        } else {
            value as u64
        };
        let width_bits = width_bytes * 8;
        self.emit(block_idx, VCodeInst::MovZ { rd: dst, imm: (bits & 0xFFFF) as u16, shift: 0 });
        for shift in [16u8, 32, 48] {
            if shift as u32 >= width_bits {
                break;
            }
            let chunk = ((bits >> shift) & 0xFFFF) as u16;
            if chunk != 0 {
                self.emit(block_idx, VCodeInst::MovK { rd: dst, imm: chunk, shift });
            }
        }
    }

    fn lower_block(&mut self, block: Block) -> CompileResult<()> {
        let idx = self.block_index[&block];
        let term = self.func.layout[block].terminator.clone();

        // Pre-scan: is this block's terminator a branch-on-compare fusion?
        let branch_fusion = self.scan_branch_fusion(block, &term);

        let insts = self.func.layout[block].insts.clone();
        for inst in insts {
            if self.fused.contains(&inst) {
                continue;
            }
            self.lower_inst(idx, block, inst)?;
        }

        self.lower_terminator(idx, term, branch_fusion)?;
        Ok(())
    }

    /// Returns `Some(cmp_inst, cond, a, b)` when the block's `BrIf`
    /// condition is a same-block, single-use comparison eligible for
    /// compare+branch fusion (§4.3).
    fn scan_branch_fusion(
        &mut self,
        block: Block,
        term: &Option<Terminator>,
    ) -> Option<(IntCC, Value, Value)> {
        let Some(Terminator::BrIf { cond, .. }) = term else {
            return None;
        };
        if !self.single_use(*cond) {
            return None;
        }
        let inst = self.definer_in_block(*cond, block)?;
        match &self.func.dfg.insts[inst] {
            InstructionData::IntCompare { cond: icc, args: [a, b] } => {
                self.fused.insert(inst);
                Some((*icc, *a, *b))
            }
            _ => None,
        }
    }

    fn lower_terminator(
        &mut self,
        idx: usize,
        term: Option<Terminator>,
        branch_fusion: Option<(IntCC, Value, Value)>,
    ) -> CompileResult<()> {
        let Some(term) = term else {
            return Ok(());
        };
        match term {
            Terminator::Jump { target, args } => {
                self.emit_edge_copies(idx, target, &args);
                self.vcode.blocks[idx].terminator =
                    Some(VCodeTerminator::Jump { target: self.block_index[&target] });
            }
            Terminator::BrIf {
                cond: raw_cond,
                then_block,
                then_args,
                else_block,
                else_args,
            } => {
                self.emit_edge_copies(idx, then_block, &then_args);
                self.emit_edge_copies(idx, else_block, &else_args);
                let then_i = self.block_index[&then_block];
                let else_i = self.block_index[&else_block];
                let t = if let Some((cond, a, b)) = branch_fusion {
                    if let Some(0) = self.const_i64(b) {
                        if matches!(cond, IntCC::Eq | IntCC::Ne) {
                            let rn = self.operand_reg(idx, a);
                            VCodeTerminator::BranchZero {
                                rn,
                                branch_if_nonzero: cond == IntCC::Ne,
                                then_block: then_i,
                                else_block: else_i,
                            }
                        } else {
                            let rn = self.operand_reg(idx, a);
                            VCodeTerminator::BranchCmpImm {
                                rn,
                                imm: 0,
                                cond,
                                then_block: then_i,
                                else_block: else_i,
                            }
                        }
                    } else if let Some(imm) = self.const_i64(b) {
                        let rn = self.operand_reg(idx, a);
                        VCodeTerminator::BranchCmpImm { rn, imm, cond, then_block: then_i, else_block: else_i }
                    } else {
                        let rn = self.operand_reg(idx, a);
                        let rm = self.operand_reg(idx, b);
                        VCodeTerminator::BranchCmp { rn, rm, cond, then_block: then_i, else_block: else_i }
                    }
                } else {
                    // Unfused fallback: cond already materialized to a
                    // plain 0/1 register by a prior Icmp/Cset lowering.
                    let rn = self.operand_reg(idx, raw_cond);
                    VCodeTerminator::BranchZero {
                        rn,
                        branch_if_nonzero: true,
                        then_block: then_i,
                        else_block: else_i,
                    }
                };
                self.vcode.blocks[idx].terminator = Some(t);
            }
            Terminator::BrTable { index, targets, default, args } => {
                for &t in &targets {
                    self.emit_edge_copies(idx, t, &args);
                }
                self.emit_edge_copies(idx, default, &args);
                let index_reg = self.operand_reg(idx, index);
                let targets_i = targets.iter().map(|t| self.block_index[t]).collect();
                let default_i = self.block_index[&default];
                self.vcode.blocks[idx].terminator = Some(VCodeTerminator::BrTable {
                    index: index_reg,
                    targets: targets_i,
                    default: default_i,
                });
            }
            Terminator::Return { values } => {
                let mut int_i = 0usize;
                let mut float_i = 0usize;
                let mut extra_k = 0u32;
                let mut regs_out = Vec::new();
                for v in values {
                    let r = self.operand_reg(idx, v);
                    let ty = self.func.dfg.value_type(v);
                    if ty.is_float() {
                        if float_i < 2 {
                            let dest = regs::PReg::float(float_i as u8);
                            self.emit(idx, VCodeInst::Copy { dst: Reg::P(dest), src: r });
                            regs_out.push(Reg::P(dest));
                        } else {
                            self.emit(
                                idx,
                                VCodeInst::StrImm {
                                    rt: r,
                                    rn: Reg::P(regs::EXTRA_RESULTS),
                                    offset: 8 * extra_k as i32,
                                    width: MemWidth::B64,
                                },
                            );
                            extra_k += 1;
                        }
                        float_i += 1;
                    } else {
                        if int_i < 2 {
                            let dest = regs::PReg::int(int_i as u8);
                            self.emit(idx, VCodeInst::Copy { dst: Reg::P(dest), src: r });
                            regs_out.push(Reg::P(dest));
                        } else {
                            self.emit(
                                idx,
                                VCodeInst::StrImm {
                                    rt: r,
                                    rn: Reg::P(regs::EXTRA_RESULTS),
                                    offset: 8 * extra_k as i32,
                                    width: MemWidth::B64,
                                },
                            );
                            extra_k += 1;
                        }
                        int_i += 1;
                    }
                }
                self.vcode.blocks[idx].terminator = Some(VCodeTerminator::Return { values: regs_out });
            }
            Terminator::ReturnCall { func_index, args } => {
                let arg_regs = self.call_arg_regs(idx, &args);
                self.emit(
                    idx,
                    VCodeInst::Call {
                        func_index,
                        arg_regs,
                        ret_regs: vec![],
                        clobbers: caller_saved_clobbers(),
                    },
                );
                self.vcode.blocks[idx].terminator = Some(VCodeTerminator::Return { values: vec![] });
            }
            Terminator::ReturnCallIndirect { table_index, type_index, callee, args } => {
                let callee_reg = self.operand_reg(idx, callee);
                let arg_regs = self.call_arg_regs(idx, &args);
                self.emit(
                    idx,
                    VCodeInst::CallIndirect {
                        table_index,
                        type_index,
                        callee: callee_reg,
                        arg_regs,
                        ret_regs: vec![],
                        clobbers: caller_saved_clobbers(),
                    },
                );
                self.vcode.blocks[idx].terminator = Some(VCodeTerminator::Return { values: vec![] });
            }
            Terminator::Unreachable { code } => {
                self.vcode.blocks[idx].terminator = Some(VCodeTerminator::Unreachable { code });
            }
        }
        Ok(())
    }

    fn emit_edge_copies(&mut self, idx: usize, target: Block, args: &[Value]) {
        let params = self.func.block_params(target).to_vec();
        for (p, a) in params.iter().zip(args.iter()) {
            let dst = self.param_regs[p];
            let src = self.operand_reg(idx, *a);
            if dst != src {
                self.emit(idx, VCodeInst::Copy { dst, src });
            }
        }
    }

    fn call_arg_regs(&mut self, idx: usize, args: &[Value]) -> Vec<Reg> {
        args.iter().map(|&v| self.operand_reg(idx, v)).collect()
    }

    fn lower_inst(&mut self, idx: usize, block: Block, inst: Inst) -> CompileResult<()> {
        let data = self.func.dfg.insts[inst].clone();
        let result = self.func.dfg.inst_results(inst).first().copied();
        let ty = result.map(|v| self.func.dfg.value_type(v)).unwrap_or(Type::I32);

        match data {
            InstructionData::UnaryImm { opcode: Opcode::Iconst, .. }
            | InstructionData::UnaryImm { opcode: Opcode::Fconst, .. } => {
                // Materialized lazily by whichever use calls `operand_reg`;
                // if nobody does (fully dead), DCE should already have
                // removed it. No-op here.
            }
            InstructionData::UnaryImm { opcode: Opcode::Vconst, .. } => {
                let dst = self.new_reg(ty);
                self.emit(idx, VCodeInst::LoadConst { rd: dst, pool_index: 0 });
                self.reg_of.insert(result.unwrap(), dst);
            }
            InstructionData::Binary { opcode, args: [a, b] } => {
                self.lower_binary(idx, block, opcode, ty, result.unwrap(), a, b)?;
            }
            InstructionData::BinaryImm { opcode, arg, imm } => {
                self.lower_binary_imm(idx, opcode, ty, result.unwrap(), arg, imm)?;
            }
            InstructionData::Unary { opcode, arg } => {
                self.lower_unary(idx, opcode, ty, result.unwrap(), arg)?;
            }
            InstructionData::IntCompare { cond, args: [a, b] } => {
                let rn = self.operand_reg(idx, a);
                let rm = self.operand_reg(idx, b);
                self.emit(idx, VCodeInst::Cmp { rn, rm });
                let dst = self.new_reg(Type::I32);
                self.emit(idx, VCodeInst::Cset { rd: dst, cond });
                self.reg_of.insert(result.unwrap(), dst);
            }
            InstructionData::IntCompareImm { cond, arg, imm } => {
                let rn = self.operand_reg(idx, arg);
                self.emit(idx, VCodeInst::CmpImm { rn, imm });
                let dst = self.new_reg(Type::I32);
                self.emit(idx, VCodeInst::Cset { rd: dst, cond });
                self.reg_of.insert(result.unwrap(), dst);
            }
            InstructionData::FloatCompare { cond, args: [a, b] } => {
                let rn = self.operand_reg(idx, a);
                let rm = self.operand_reg(idx, b);
                self.emit(idx, VCodeInst::FCmp { rn, rm });
                let dst = self.new_reg(Type::I32);
                self.emit(idx, VCodeInst::FCset { rd: dst, cond });
                self.reg_of.insert(result.unwrap(), dst);
            }
            InstructionData::Select { cond, if_true, if_false } => {
                self.lower_select(idx, block, ty, result.unwrap(), cond, if_true, if_false);
            }
            InstructionData::Load { arg, offset, ty: mty, width, signed, .. } => {
                self.lower_load(idx, result.unwrap(), arg, offset, mty, width, signed);
            }
            InstructionData::Store { args: [addr, val], offset, width, .. } => {
                self.lower_store(idx, addr, val, offset, width);
            }
            InstructionData::Call { func_index, args } => {
                let args: Vec<Value> = args.as_slice(&self.func.dfg.value_list_pool).to_vec();
                let arg_regs = self.call_arg_regs(idx, &args);
                let ret_regs = self.physical_result_regs(inst);
                self.emit(
                    idx,
                    VCodeInst::Call {
                        func_index,
                        arg_regs,
                        ret_regs: ret_regs.clone(),
                        clobbers: caller_saved_clobbers(),
                    },
                );
                self.bind_call_results(idx, inst, &ret_regs);
            }
            InstructionData::CallIndirect { table_index, type_index, callee, args } => {
                let args: Vec<Value> = args.as_slice(&self.func.dfg.value_list_pool).to_vec();
                let callee_reg = self.operand_reg(idx, callee);
                let arg_regs = self.call_arg_regs(idx, &args);
                let ret_regs = self.physical_result_regs(inst);
                self.emit(
                    idx,
                    VCodeInst::CallIndirect {
                        table_index,
                        type_index,
                        callee: callee_reg,
                        arg_regs,
                        ret_regs: ret_regs.clone(),
                        clobbers: caller_saved_clobbers(),
                    },
                );
                self.bind_call_results(idx, inst, &ret_regs);
            }
            InstructionData::MemoryOp { opcode: Opcode::MemoryGrow, args, .. } => {
                let args: Vec<Value> = args.as_slice(&self.func.dfg.value_list_pool).to_vec();
                let delta = self.operand_reg(idx, args[0]);
                let dst = self.new_reg(Type::I32);
                self.emit(idx, VCodeInst::MemGrow { delta, result: dst, mem_index: 0 });
                self.reg_of.insert(result.unwrap(), dst);
            }
            InstructionData::Nullary { opcode: Opcode::MemorySize, .. } => {
                let dst = self.new_reg(Type::I32);
                self.emit(
                    idx,
                    VCodeInst::LsrImm { rd: dst, rn: Reg::P(regs::MEMORY_SIZE), shift: 16 },
                );
                self.reg_of.insert(result.unwrap(), dst);
            }
            InstructionData::Trap { code } => {
                self.emit(idx, VCodeInst::Brk { code });
            }
            InstructionData::Copy { arg } => {
                let r = self.operand_reg(idx, arg);
                self.reg_of.insert(result.unwrap(), r);
            }
            other => {
                return Err(CompileError::UnsupportedIROp(other.opcode()));
            }
        }
        Ok(())
    }

    /// The physical registers a call's results land in, one per result of
    /// `inst`, assigned by the same int/float ABI counters used for
    /// function parameters (§4.5).
    fn physical_result_regs(&self, inst: Inst) -> Vec<Reg> {
        let mut next_int = 0usize;
        let mut next_float = 0usize;
        self.func
            .dfg
            .inst_results(inst)
            .iter()
            .map(|&v| {
                let ty = self.func.dfg.value_type(v);
                if ty.is_float() {
                    let p = regs::float_arg_reg(next_float).unwrap_or(regs::PReg::float(0));
                    next_float += 1;
                    Reg::P(p)
                } else {
                    let p = regs::int_arg_reg(next_int).unwrap_or(regs::PReg::int(0));
                    next_int += 1;
                    Reg::P(p)
                }
            })
            .collect()
    }

    /// Copy each of a call's physical result registers (already named in
    /// the `Call`/`CallIndirect` node's own `ret_regs`) into a fresh vreg
    /// so later uses don't alias the ABI register across another call.
    fn bind_call_results(&mut self, block_idx: usize, inst: Inst, ret_regs: &[Reg]) {
        for (&result, &src) in self.func.dfg.inst_results(inst).iter().zip(ret_regs.iter()) {
            let ty = self.func.dfg.value_type(result);
            let dst = self.new_reg(ty);
            self.emit(block_idx, VCodeInst::Copy { dst, src });
            self.reg_of.insert(result, dst);
        }
    }

    fn lower_binary(
        &mut self,
        idx: usize,
        block: Block,
        opcode: Opcode,
        ty: Type,
        result: Value,
        a: Value,
        b: Value,
    ) -> CompileResult<()> {
        // Fused multiply-add: iadd (imul y z) x / iadd x (imul y z).
        if opcode == Opcode::Iadd {
            if let Some((mul_inst, y, z, x)) = self.find_mul_operand(block, a, b) {
                self.fused.insert(mul_inst);
                let dst = self.new_reg(ty);
                let rn = self.operand_reg(idx, y);
                let rm = self.operand_reg(idx, z);
                let ra = self.operand_reg(idx, x);
                self.emit(idx, VCodeInst::Madd { rd: dst, rn, rm, ra });
                self.reg_of.insert(result, dst);
                return Ok(());
            }
            if let Some((shift_inst, y, k)) = self.find_shift_operand(block, b) {
                self.fused.insert(shift_inst);
                let dst = self.new_reg(ty);
                let rn = self.operand_reg(idx, a);
                let rm = self.operand_reg(idx, y);
                self.emit(idx, VCodeInst::AddShifted { rd: dst, rn, rm, shift: k });
                self.reg_of.insert(result, dst);
                return Ok(());
            }
        }
        if opcode == Opcode::Isub {
            if let Some(inst) = self.definer_in_block(b, block) {
                if let InstructionData::Binary { opcode: Opcode::Imul, args: [y, z] } =
                    &self.func.dfg.insts[inst]
                {
                    if self.single_use(b) {
                        self.fused.insert(inst);
                        let dst = self.new_reg(ty);
                        let ra = self.operand_reg(idx, a);
                        let rn = self.operand_reg(idx, *y);
                        let rm = self.operand_reg(idx, *z);
                        self.emit(idx, VCodeInst::Msub { rd: dst, rn, rm, ra });
                        self.reg_of.insert(result, dst);
                        return Ok(());
                    }
                }
            }
        }

        // Immediate folding.
        if matches!(opcode, Opcode::Iadd | Opcode::Isub | Opcode::Band | Opcode::Bor | Opcode::Bxor) {
            if let Some(c) = self.const_i64(b) {
                if fits_add_imm(c) {
                    let dst = self.new_reg(ty);
                    let rn = self.operand_reg(idx, a);
                    match opcode {
                        Opcode::Iadd => self.emit(idx, VCodeInst::AddImm { rd: dst, rn, imm: c }),
                        Opcode::Isub => self.emit(idx, VCodeInst::SubImm { rd: dst, rn, imm: c }),
                        Opcode::Band => self.emit(idx, VCodeInst::AndImm { rd: dst, rn, imm: c as u64 }),
                        Opcode::Bor => self.emit(idx, VCodeInst::OrrImm { rd: dst, rn, imm: c as u64 }),
                        Opcode::Bxor => self.emit(idx, VCodeInst::EorImm { rd: dst, rn, imm: c as u64 }),
                        _ => unreachable!(),
                    }
                    self.reg_of.insert(result, dst);
                    return Ok(());
                }
            }
        }

        // `rotl x, k` has no direct AArch64 instruction; built from a
        // right rotate by the complementary amount (`ROR` fusion applies
        // equally here since `rotl x, k == rotr x, (width - k)`).
        if opcode == Opcode::Rotl {
            let width = ty.bytes() * 8;
            let rn = self.operand_reg(idx, a);
            let rm = self.operand_reg(idx, b);
            let width_reg = self.new_reg(ty);
            self.materialize_int(idx, width_reg, width as i64, ty.bytes());
            let neg_shift = self.new_reg(ty);
            self.emit(idx, VCodeInst::SubReg { rd: neg_shift, rn: width_reg, rm });
            let dst = self.new_reg(ty);
            self.emit(idx, VCodeInst::RorReg { rd: dst, rn, rm: neg_shift });
            self.reg_of.insert(result, dst);
            return Ok(());
        }

        let rn = self.operand_reg(idx, a);
        let rm = self.operand_reg(idx, b);
        let dst = self.new_reg(ty);
        let inst = match opcode {
            Opcode::Iadd => VCodeInst::AddReg { rd: dst, rn, rm },
            Opcode::Isub => VCodeInst::SubReg { rd: dst, rn, rm },
            Opcode::Imul => VCodeInst::MulReg { rd: dst, rn, rm },
            Opcode::SDiv => VCodeInst::SDiv { rd: dst, rn, rm },
            Opcode::UDiv => VCodeInst::UDiv { rd: dst, rn, rm },
            Opcode::SRem => {
                let q = self.new_reg(ty);
                self.emit(idx, VCodeInst::SDiv { rd: q, rn, rm });
                VCodeInst::Msub2 { rd: dst, rn, rm, quotient: q }
            }
            Opcode::URem => {
                let q = self.new_reg(ty);
                self.emit(idx, VCodeInst::UDiv { rd: q, rn, rm });
                VCodeInst::Msub2 { rd: dst, rn, rm, quotient: q }
            }
            Opcode::Band => VCodeInst::AndReg { rd: dst, rn, rm },
            Opcode::Bor => VCodeInst::OrrReg { rd: dst, rn, rm },
            Opcode::Bxor => VCodeInst::EorReg { rd: dst, rn, rm },
            Opcode::Ishl => VCodeInst::LslReg { rd: dst, rn, rm },
            Opcode::Ushr => VCodeInst::LsrReg { rd: dst, rn, rm },
            Opcode::Sshr => VCodeInst::AsrReg { rd: dst, rn, rm },
            Opcode::Rotr => VCodeInst::RorReg { rd: dst, rn, rm },
            Opcode::Fadd => VCodeInst::FAdd { rd: dst, rn, rm },
            Opcode::Fsub => VCodeInst::FSub { rd: dst, rn, rm },
            Opcode::Fmul => VCodeInst::FMul { rd: dst, rn, rm },
            Opcode::Fdiv => VCodeInst::FDiv { rd: dst, rn, rm },
            Opcode::Fmin => VCodeInst::FMin { rd: dst, rn, rm },
            Opcode::Fmax => VCodeInst::FMax { rd: dst, rn, rm },
            _ => return Err(CompileError::UnsupportedIROp(opcode)),
        };
        self.emit(idx, inst);
        self.reg_of.insert(result, dst);
        Ok(())
    }

    fn find_mul_operand(&self, block: Block, a: Value, b: Value) -> Option<(Inst, Value, Value, Value)> {
        for (mul_val, other) in [(a, b), (b, a)] {
            if !self.single_use(mul_val) {
                continue;
            }
            if let Some(inst) = self.definer_in_block(mul_val, block) {
                if let InstructionData::Binary { opcode: Opcode::Imul, args: [y, z] } =
                    &self.func.dfg.insts[inst]
                {
                    return Some((inst, *y, *z, other));
                }
            }
        }
        None
    }

    fn find_shift_operand(&self, block: Block, v: Value) -> Option<(Inst, Value, u8)> {
        if !self.single_use(v) {
            return None;
        }
        let inst = self.definer_in_block(v, block)?;
        match &self.func.dfg.insts[inst] {
            InstructionData::BinaryImm { opcode: Opcode::Ishl, arg, imm } => {
                let k = imm.as_i64()?;
                (0..=63).contains(&k).then_some((inst, *arg, k as u8))
            }
            _ => None,
        }
    }

    fn lower_binary_imm(
        &mut self,
        idx: usize,
        opcode: Opcode,
        ty: Type,
        result: Value,
        arg: Value,
        imm: Immediate,
    ) -> CompileResult<()> {
        let rn = self.operand_reg(idx, arg);
        let dst = self.new_reg(ty);
        let i = imm.as_i64().unwrap_or(0);
        let inst = match opcode {
            Opcode::Iadd => VCodeInst::AddImm { rd: dst, rn, imm: i },
            Opcode::Isub => VCodeInst::SubImm { rd: dst, rn, imm: i },
            Opcode::Band => VCodeInst::AndImm { rd: dst, rn, imm: i as u64 },
            Opcode::Bor => VCodeInst::OrrImm { rd: dst, rn, imm: i as u64 },
            Opcode::Bxor => VCodeInst::EorImm { rd: dst, rn, imm: i as u64 },
            Opcode::Ishl => VCodeInst::LslImm { rd: dst, rn, shift: i as u8 },
            Opcode::Ushr => VCodeInst::LsrImm { rd: dst, rn, shift: i as u8 },
            Opcode::Sshr => VCodeInst::AsrImm { rd: dst, rn, shift: i as u8 },
            _ => return Err(CompileError::UnsupportedIROp(opcode)),
        };
        self.emit(idx, inst);
        self.reg_of.insert(result, dst);
        Ok(())
    }

    fn lower_unary(&mut self, idx: usize, opcode: Opcode, ty: Type, result: Value, arg: Value) -> CompileResult<()> {
        let rn = self.operand_reg(idx, arg);
        let dst = self.new_reg(ty);
        let inst = match opcode {
            Opcode::Ineg => VCodeInst::Neg { rd: dst, rn },
            Opcode::Bnot => VCodeInst::MvnReg { rd: dst, rn },
            Opcode::Clz => VCodeInst::Clz { rd: dst, rn },
            Opcode::Ctz => {
                let rev = self.new_reg(ty);
                self.emit(idx, VCodeInst::Rbit { rd: rev, rn });
                VCodeInst::Clz { rd: dst, rn: rev }
            }
            Opcode::Popcnt => VCodeInst::Popcnt { rd: dst, rn },
            Opcode::Fneg => VCodeInst::FNeg { rd: dst, rn },
            Opcode::Fabs => VCodeInst::FAbs { rd: dst, rn },
            Opcode::Fsqrt => VCodeInst::FSqrt { rd: dst, rn },
            Opcode::Fceil => VCodeInst::FRintp { rd: dst, rn },
            Opcode::Ffloor => VCodeInst::FRintm { rd: dst, rn },
            Opcode::Ftrunc => VCodeInst::FRintz { rd: dst, rn },
            Opcode::Fnearest => VCodeInst::FRintn { rd: dst, rn },
            Opcode::Sextend | Opcode::Uextend => {
                let from_bits = if ty == Type::I64 { 32 } else { 16 };
                if opcode == Opcode::Sextend {
                    VCodeInst::Sxt { rd: dst, rn, from_bits }
                } else {
                    VCodeInst::Uxt { rd: dst, rn, from_bits }
                }
            }
            Opcode::Ireduce | Opcode::Bitcast => VCodeInst::Copy { dst, src: rn },
            Opcode::FcvtFromInt => {
                if ty == Type::F32 || ty == Type::F64 {
                    VCodeInst::Scvtf { rd: dst, rn }
                } else {
                    VCodeInst::Ucvtf { rd: dst, rn }
                }
            }
            Opcode::FcvtToIntTrapping => VCodeInst::Fcvtzs { rd: dst, rn, sat: false },
            Opcode::FcvtToIntSat => VCodeInst::Fcvtzs { rd: dst, rn, sat: true },
            Opcode::FpromoteF32ToF64 => VCodeInst::Fcvt { rd: dst, rn, to_double: true },
            Opcode::FdemoteF64ToF32 => VCodeInst::Fcvt { rd: dst, rn, to_double: false },
            _ => return Err(CompileError::UnsupportedIROp(opcode)),
        };
        self.emit(idx, inst);
        self.reg_of.insert(result, dst);
        Ok(())
    }

    fn lower_select(
        &mut self,
        idx: usize,
        block: Block,
        ty: Type,
        result: Value,
        cond: Value,
        if_true: Value,
        if_false: Value,
    ) {
        // Select+compare fusion (§4.3): `select(icmp(cc,a,b), t, f)` goes
        // straight to CSEL off the comparison's own flags.
        if self.single_use(cond) {
            if let Some(inst) = self.definer_in_block(cond, block) {
                if let InstructionData::IntCompare { cond: cc, args: [a, b] } = &self.func.dfg.insts[inst] {
                    let (cc, a, b) = (*cc, *a, *b);
                    self.fused.insert(inst);
                    let rn = self.operand_reg(idx, a);
                    let rm = self.operand_reg(idx, b);
                    self.emit(idx, VCodeInst::Cmp { rn, rm });
                    let t = self.operand_reg(idx, if_true);
                    let f = self.operand_reg(idx, if_false);
                    let dst = self.new_reg(ty);
                    self.emit(idx, VCodeInst::Csel { rd: dst, rn: t, rm: f, cond: cc });
                    self.reg_of.insert(result, dst);
                    return;
                }
            }
        }
        let cond_reg = self.operand_reg(idx, cond);
        self.emit(idx, VCodeInst::CmpImm { rn: cond_reg, imm: 0 });
        let t = self.operand_reg(idx, if_true);
        let f = self.operand_reg(idx, if_false);
        let dst = self.new_reg(ty);
        self.emit(idx, VCodeInst::Csel { rd: dst, rn: t, rm: f, cond: IntCC::Ne });
        self.reg_of.insert(result, dst);
    }

    fn lower_load(&mut self, idx: usize, result: Value, addr: Value, offset: u32, ty: Type, width: u32, signed: bool) {
        let addr_reg = self.operand_reg(idx, addr);
        let addr_off = if offset == 0 {
            addr_reg
        } else {
            let r = self.new_reg(Type::I64);
            self.emit(idx, VCodeInst::AddImm { rd: r, rn: addr_reg, imm: offset as i64 });
            r
        };
        let end = self.new_reg(Type::I64);
        self.emit(idx, VCodeInst::AddImm { rd: end, rn: addr_off, imm: width as i64 });
        self.emit(
            idx,
            VCodeInst::BoundsCheck { end_addr: end, limit: Reg::P(regs::MEMORY_SIZE), trap: crate::ir::TrapCode::MemoryOutOfBounds },
        );
        let dst = self.new_reg(ty);
        let mw = mem_width(width);
        self.emit(
            idx,
            VCodeInst::LdrShifted { rd: dst, rn: Reg::P(regs::MEMORY_BASE), rm: addr_off, shift: 0, width: mw, signed },
        );
        self.reg_of.insert(result, dst);
    }

    fn lower_store(&mut self, idx: usize, addr: Value, val: Value, offset: u32, width: u32) {
        let addr_reg = self.operand_reg(idx, addr);
        let val_reg = self.operand_reg(idx, val);
        let addr_off = if offset == 0 {
            addr_reg
        } else {
            let r = self.new_reg(Type::I64);
            self.emit(idx, VCodeInst::AddImm { rd: r, rn: addr_reg, imm: offset as i64 });
            r
        };
        let end = self.new_reg(Type::I64);
        self.emit(idx, VCodeInst::AddImm { rd: end, rn: addr_off, imm: width as i64 });
        self.emit(
            idx,
            VCodeInst::BoundsCheck { end_addr: end, limit: Reg::P(regs::MEMORY_SIZE), trap: crate::ir::TrapCode::MemoryOutOfBounds },
        );
        let mw = mem_width(width);
        self.emit(
            idx,
            VCodeInst::StrShifted { rt: val_reg, rn: Reg::P(regs::MEMORY_BASE), rm: addr_off, shift: 0, width: mw },
        );
    }
}

fn mem_width(bytes: u32) -> MemWidth {
    match bytes {
        1 => MemWidth::B8,
        2 => MemWidth::B16,
        4 => MemWidth::B32,
        _ => MemWidth::B64,
    }
}

fn caller_saved_clobbers() -> Vec<regs::PReg> {
    let mut v: Vec<regs::PReg> = regs::int_preferred().to_vec();
    v.extend(regs::float_preferred().iter().copied());
    v
}
