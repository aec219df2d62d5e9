//! Machine-code emission (§4.5): turn allocated VCode into AArch64
//! instruction words. Layout runs in two passes — the first settles block
//! word-offsets and decides which conditional branches need a veneer
//! (invert + long `B`), the second emits real bytes using those offsets.
//! Relaxation (adding a veneer can itself push a later branch out of
//! range) is bounded; in practice function bodies are small enough that
//! one pass always suffices.

use crate::ir::{FloatCC, IntCC, TrapCode};
use crate::isa::aarch64::regs::{self, PReg, RegClass};
use crate::isa::aarch64::vcode::{MemWidth, Reg, VCodeFunction, VCodeInst, VCodeTerminator};
use crate::result::{CompileError, CompileResult, EmitError};
use log::{debug, trace};

/// A finished function's machine code plus what the runtime needs to run
/// it (§4.6): the frame size for the exec-memory manager's bookkeeping
/// and the trap-site table the signal handler consults to recover a
/// `TrapCode` from a faulting PC.
#[derive(Clone, Debug, Default)]
pub struct EmittedFunction {
    pub code: Vec<u8>,
    pub frame_size: u32,
    /// Byte offset within `code` of each trapping site, alongside the
    /// trap it raises.
    pub trap_sites: Vec<(u32, TrapCode)>,
}

pub fn emit(vcode: &VCodeFunction) -> CompileResult<EmittedFunction> {
    let mut e = Emitter::new(vcode);
    e.layout()?;
    e.encode()?;
    debug!(
        "emit: func={} words={} frame_size={} trap_sites={}",
        vcode.name,
        e.words.len(),
        e.frame_size,
        e.trap_sites.len()
    );
    Ok(EmittedFunction {
        code: e.words.iter().flat_map(|w| w.to_le_bytes()).collect(),
        frame_size: e.frame_size,
        trap_sites: e.trap_sites,
    })
}

fn int_reg(r: Reg) -> u32 {
    match r {
        Reg::P(p) => {
            debug_assert_eq!(p.class, RegClass::Int);
            p.hw_enc as u32
        }
        Reg::V(_) => unreachable!("unallocated vreg reached the emitter"),
    }
}

fn float_reg(r: Reg) -> u32 {
    match r {
        Reg::P(p) => {
            debug_assert_eq!(p.class, RegClass::Float);
            p.hw_enc as u32
        }
        Reg::V(_) => unreachable!("unallocated vreg reached the emitter"),
    }
}

fn any_reg(r: Reg) -> u32 {
    match r {
        Reg::P(p) => p.hw_enc as u32,
        Reg::V(_) => unreachable!("unallocated vreg reached the emitter"),
    }
}

/// ARM condition-code field (`cond` in `B.cond`/`CSET`/`CSEL`).
fn int_cond_bits(c: IntCC) -> u32 {
    match c {
        IntCC::Eq => 0b0000,
        IntCC::Ne => 0b0001,
        IntCC::UnsignedGe => 0b0010,
        IntCC::UnsignedLt => 0b0011,
        IntCC::UnsignedGt => 0b1000,
        IntCC::UnsignedLe => 0b1001,
        IntCC::SignedGe => 0b1010,
        IntCC::SignedLt => 0b1011,
        IntCC::SignedGt => 0b1100,
        IntCC::SignedLe => 0b1101,
    }
}

/// Unordered wasm float compares are not distinguished here (§9): NaN
/// behavior folds into the ordered condition closest to it.
fn float_cond_bits(c: FloatCC) -> u32 {
    match c {
        FloatCC::Eq => 0b0000,
        FloatCC::Ne => 0b0001,
        FloatCC::Ge => 0b1010,
        FloatCC::Lt => 0b1011,
        FloatCC::Gt => 0b1100,
        FloatCC::Le => 0b1101,
    }
}

fn enc_rrr(top11: u32, rm: u32, mid6: u32, rn: u32, rd: u32) -> u32 {
    (top11 << 21) | (rm << 16) | (mid6 << 10) | (rn << 5) | rd
}

fn enc_rrrr(top11: u32, rm: u32, ra: u32, rn: u32, rd: u32) -> u32 {
    (top11 << 21) | (rm << 16) | (ra << 10) | (rn << 5) | rd
}

fn enc_rr_imm12(top10: u32, imm12: u32, rn: u32, rd: u32) -> u32 {
    (top10 << 22) | ((imm12 & 0xfff) << 10) | (rn << 5) | rd
}

fn enc_rr(top22: u32, rn: u32, rd: u32) -> u32 {
    (top22 << 10) | (rn << 5) | rd
}

fn enc_move_wide(top9: u32, shift_unit: u32, imm16: u32, rd: u32) -> u32 {
    (top9 << 23) | (shift_unit << 21) | ((imm16 & 0xffff) << 5) | rd
}

fn enc_ldst_imm(top10: u32, imm12_scaled: u32, rn: u32, rt: u32) -> u32 {
    (top10 << 22) | ((imm12_scaled & 0xfff) << 10) | (rn << 5) | rt
}

fn enc_ldst_pair(top10: u32, imm7: u32, rn: u32, rt: u32, rt2: u32) -> u32 {
    (top10 << 22) | ((imm7 & 0x7f) << 15) | (rt2 << 10) | (rn << 5) | rt
}

fn enc_csel(top11: u32, rm: u32, cond: u32, rn: u32, rd: u32) -> u32 {
    (top11 << 21) | (rm << 16) | (cond << 12) | (rn << 5) | rd
}

fn enc_cset(cond_inv: u32, rd: u32) -> u32 {
    // CSET is an alias of CSINC Xd, XZR, XZR, invert(cond).
    enc_csel(0b10011010100, 0b11111, cond_inv, 0b11111, rd) | (1 << 10)
}

/// Unconditional branch, `B`, `imm26` in words relative to this instruction.
fn enc_b(rel_words: i32) -> u32 {
    (0b000101 << 26) | ((rel_words as u32) & 0x03ff_ffff)
}

fn enc_bcond(rel_words: i32, cond: u32) -> u32 {
    (0b01010100 << 24) | (((rel_words as u32) & 0x7ffff) << 5) | cond
}

fn enc_cbz(rel_words: i32, nonzero: bool, rn: u32) -> u32 {
    let op = if nonzero { 1 } else { 0 };
    (0b0_110101 << 24) | (op << 24) | (((rel_words as u32) & 0x7ffff) << 5) | rn
}

fn enc_brk(imm16: u16) -> u32 {
    (0b11010100001 << 21) | ((imm16 as u32) << 5)
}

fn enc_ret(rn: u32) -> u32 {
    (0b1101011001011111000000 << 5) | (rn << 5)
}

fn enc_blr(rn: u32) -> u32 {
    (0b1101011000111111000000 << 5) | (rn << 5)
}

fn enc_ldr_literal(is_float: bool, rel_words: i32, rt: u32) -> u32 {
    let opc = if is_float { 0b10011100 } else { 0b01011000 };
    (opc << 24) | (((rel_words as u32) & 0x7ffff) << 5) | rt
}

const BR_COND_RANGE: i32 = 1 << 18; // imm19, signed words

struct Emitter<'a> {
    vcode: &'a VCodeFunction,
    words: Vec<u32>,
    frame_size: u32,
    int_saved: Vec<PReg>,
    float_saved: Vec<PReg>,
    /// Word offset (from function start) of each block, set by `layout`.
    block_offsets: Vec<u32>,
    /// Whether a block's conditional terminator needed a veneer.
    veneer: Vec<bool>,
    prologue_words: u32,
    epilogue_words: u32,
    /// Word offset of the constant pool (after the last block), each entry
    /// 2 words (a `u64` bit pattern) wide.
    pool_base: u32,
    trap_sites: Vec<(u32, TrapCode)>,
}

impl<'a> Emitter<'a> {
    fn new(vcode: &'a VCodeFunction) -> Emitter<'a> {
        let int_saved: Vec<PReg> = vcode
            .callee_saved_used
            .iter()
            .copied()
            .filter(|p| p.class == RegClass::Int)
            .collect();
        let float_saved: Vec<PReg> = vcode
            .callee_saved_used
            .iter()
            .copied()
            .filter(|p| p.class == RegClass::Float)
            .collect();
        let n = vcode.blocks.len();
        Emitter {
            vcode,
            words: Vec::new(),
            frame_size: 0,
            int_saved,
            float_saved,
            block_offsets: vec![0; n],
            veneer: vec![false; n],
            prologue_words: 0,
            epilogue_words: 0,
            pool_base: 0,
            trap_sites: Vec::new(),
        }
    }

    /// §4.5 step 1: frame size, 16-byte aligned. Always saves FP/LR; adds
    /// the other callee-saved GPRs/FPRs the allocator actually used, plus
    /// the spill area.
    fn compute_frame_size(&mut self) -> u32 {
        let gpr_pairs = (self.int_saved.len() + 2 + 1) / 2; // +2 for FP/LR
        let fpr_pairs = (self.float_saved.len() + 1) / 2;
        let spill_bytes = self.vcode.spill_slot_count as u64 * 8;
        let saved_bytes = (gpr_pairs * 16 + fpr_pairs * 16) as u64;
        let total = saved_bytes + spill_bytes;
        (((total + 15) / 16) * 16) as u32
    }

    fn spill_offset(&self, slot: u32) -> i32 {
        (slot as i32) * 8
    }

    fn layout(&mut self) -> CompileResult<()> {
        self.frame_size = self.compute_frame_size();
        self.prologue_words = self.prologue_word_count();
        self.epilogue_words = self.epilogue_word_count();

        for _pass in 0..8 {
            let mut pos = self.prologue_words;
            for (bi, block) in self.vcode.blocks.iter().enumerate() {
                self.block_offsets[bi] = pos;
                for inst in &block.insts {
                    pos += inst_word_count(inst);
                }
                pos += self.term_word_count(bi, block.terminator.as_ref());
            }
            self.pool_base = pos;

            let mut any_new_veneer = false;
            for (bi, block) in self.vcode.blocks.iter().enumerate() {
                if let Some(t) = &block.terminator {
                    if self.needs_veneer(bi, t)? && !self.veneer[bi] {
                        self.veneer[bi] = true;
                        any_new_veneer = true;
                    }
                }
            }
            if !any_new_veneer {
                return Ok(());
            }
        }
        Err(CompileError::InternalError(
            "branch layout did not converge".into(),
        ))
    }

    fn needs_veneer(&self, bi: usize, term: &VCodeTerminator) -> CompileResult<bool> {
        let cmp_words = match term {
            VCodeTerminator::BranchCmp { .. } | VCodeTerminator::BranchCmpImm { .. } => 1,
            _ => 0,
        };
        let from = self.block_offsets[bi]
            + self.vcode.blocks[bi]
                .insts
                .iter()
                .map(inst_word_count)
                .sum::<u32>()
            + cmp_words;
        let fits = |target: usize| -> bool {
            let rel = self.block_offsets[target] as i64 - from as i64;
            rel.abs() < BR_COND_RANGE as i64
        };
        Ok(match term {
            VCodeTerminator::BranchCmp { then_block, .. }
            | VCodeTerminator::BranchCmpImm { then_block, .. }
            | VCodeTerminator::BranchZero { then_block, .. } => !fits(*then_block),
            _ => false,
        })
    }

    fn term_word_count(&self, bi: usize, term: Option<&VCodeTerminator>) -> u32 {
        let next_block = bi + 1;
        match term {
            None => 0,
            Some(VCodeTerminator::Jump { .. }) => 1,
            Some(VCodeTerminator::BranchCmp { else_block, .. }) => {
                self.cmp_words(1) + self.fallthrough_words(*else_block, next_block, bi)
            }
            Some(VCodeTerminator::BranchCmpImm { else_block, .. }) => {
                self.cmp_words(1) + self.fallthrough_words(*else_block, next_block, bi)
            }
            Some(VCodeTerminator::BranchZero { else_block, .. }) => {
                self.cmp_words(0) + self.fallthrough_words(*else_block, next_block, bi)
            }
            Some(VCodeTerminator::BrTable { targets, .. }) => 2 * targets.len() as u32 + 1,
            Some(VCodeTerminator::Return { .. }) => self.epilogue_words + 1,
            Some(VCodeTerminator::Unreachable { .. }) => 1,
        }
    }

    /// `extra` is the compare's own word count (0 for CBZ-family, which
    /// folds compare-against-zero into the branch itself).
    fn cmp_words(&self, extra: u32) -> u32 {
        extra
    }

    fn fallthrough_words(&self, else_block: usize, next_block: usize, bi: usize) -> u32 {
        let veneer_extra = if self.veneer[bi] { 1 } else { 0 };
        let jump_to_else = if else_block == next_block { 0 } else { 1 };
        1 + veneer_extra + jump_to_else
    }

    fn prologue_word_count(&self) -> u32 {
        let gpr_pairs = (self.int_saved.len() + 2 + 1) / 2;
        let fpr_pairs = (self.float_saved.len() + 1) / 2;
        // SUB sp + STP*pairs + 4 cached-register loads.
        1 + gpr_pairs as u32 + fpr_pairs as u32 + 4
    }

    fn epilogue_word_count(&self) -> u32 {
        let gpr_pairs = (self.int_saved.len() + 2 + 1) / 2;
        let fpr_pairs = (self.float_saved.len() + 1) / 2;
        // LDP*pairs + ADD sp (RET counted separately by the caller).
        gpr_pairs as u32 + fpr_pairs as u32 + 1
    }

    fn push(&mut self, w: u32) {
        self.words.push(w);
    }

    fn pos(&self) -> u32 {
        self.words.len() as u32
    }

    fn encode(&mut self) -> CompileResult<()> {
        self.emit_prologue();
        for (bi, block) in self.vcode.blocks.iter().enumerate() {
            trace!("emit: block {} at word {}", bi, self.pos());
            for inst in &block.insts {
                self.encode_inst(inst)?;
            }
            self.encode_terminator(bi, block.terminator.as_ref())?;
        }
        debug_assert_eq!(self.pos(), self.pool_base);
        for &bits in &self.vcode.constants {
            self.push(bits as u32);
            self.push((bits >> 32) as u32);
        }
        Ok(())
    }

    fn emit_prologue(&mut self) {
        self.push(enc_rr_imm12(0b1101000100, self.frame_size, regs::SP.hw_enc as u32, regs::SP.hw_enc as u32));
        self.emit_save_restore(true);
        // LDR X20,[X19,#0]; LDR X24,[X19,#8]; LDR X21,[X19,#16]; LDR X22,[X19,#24]
        for (reg, off) in [
            (regs::FUNC_TABLE, 0),
            (regs::INDIRECT_TABLE, 1),
            (regs::MEMORY_BASE, 2),
            (regs::MEMORY_SIZE, 3),
        ] {
            self.push(enc_ldst_imm(0b1111100101, off, regs::CTX_PTR.hw_enc as u32, reg.hw_enc as u32));
        }
    }

    fn emit_epilogue(&mut self) {
        self.emit_save_restore(false);
        self.push(enc_rr_imm12(0b1001000100, self.frame_size, regs::SP.hw_enc as u32, regs::SP.hw_enc as u32));
    }

    /// `STP`/`LDP` pairs for FP/LR plus every callee-saved register the
    /// allocator actually assigned (§4.5, frame layout diagram). Floats
    /// are restored/saved before/after the integer pairs symmetrically.
    fn emit_save_restore(&mut self, save: bool) {
        let mut int_list = vec![regs::FP, regs::LR];
        int_list.extend(self.int_saved.iter().copied());
        let float_list = self.float_saved.clone();

        let emit_pairs = |e: &mut Self, list: &[PReg], is_float: bool, base_off: &mut i32| {
            let mut it = list.chunks(2);
            for pair in &mut it {
                let r1 = pair[0].hw_enc as u32;
                let r2 = if pair.len() == 2 { pair[1].hw_enc as u32 } else { 31 };
                let top = if is_float { 0b0_0101101_10 } else { 0b1_0101001_10 };
                let op = if save { top | 0b01 } else { top | 0b11 };
                e.push(enc_ldst_pair(op, ((*base_off) / 8) as u32, regs::SP.hw_enc as u32, r1, r2));
                *base_off += 16;
            }
        };
        let mut off = 0;
        emit_pairs(self, &int_list, false, &mut off);
        emit_pairs(self, &float_list, true, &mut off);
    }

    fn encode_inst(&mut self, inst: &VCodeInst) -> CompileResult<()> {
        match inst {
            VCodeInst::MovZ { rd, imm, shift } => {
                self.push(enc_move_wide(0b110100101, (*shift / 16) as u32, *imm as u32, any_reg(*rd)));
            }
            VCodeInst::MovK { rd, imm, shift } => {
                self.push(enc_move_wide(0b111100101, (*shift / 16) as u32, *imm as u32, any_reg(*rd)));
            }
            VCodeInst::LoadConst { rd, pool_index } => {
                let is_float = matches!(rd, Reg::P(p) if p.class == RegClass::Float);
                let entry = self.pool_base + 2 * pool_index;
                let rel = entry as i32 - self.pos() as i32;
                self.push(enc_ldr_literal(is_float, rel, any_reg(*rd)));
            }
            VCodeInst::Fmov { rd, rn } => {
                self.push(enc_rr(0b0001111001100000010000, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::AddReg { rd, rn, rm } => {
                self.push(enc_rrr(0b10001011000, int_reg(*rm), 0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::AddImm { rd, rn, imm } => {
                self.push(enc_rr_imm12(0b1001000100, (*imm as u32) & 0xfff, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::AddShifted { rd, rn, rm, shift } => {
                self.push(enc_rrr(0b10001011000, int_reg(*rm), (*shift as u32) << 0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::SubReg { rd, rn, rm } => {
                self.push(enc_rrr(0b11001011000, int_reg(*rm), 0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::SubImm { rd, rn, imm } => {
                self.push(enc_rr_imm12(0b1101000100, (*imm as u32) & 0xfff, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::SubShifted { rd, rn, rm, shift } => {
                self.push(enc_rrr(0b11001011000, int_reg(*rm), (*shift as u32) << 0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::MulReg { rd, rn, rm } => {
                self.push(enc_rrrr(0b10011011000, int_reg(*rm), 0b11111, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Madd { rd, rn, rm, ra } => {
                self.push(enc_rrrr(0b10011011000, int_reg(*rm), int_reg(*ra), int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Msub { rd, rn, rm, ra } => {
                self.push(enc_rrrr(0b10011011000, int_reg(*rm), int_reg(*ra), int_reg(*rn), int_reg(*rd)) | (1 << 15));
            }
            VCodeInst::Msub2 { rd, rn, rm, quotient } => {
                self.push(enc_rrrr(0b10011011000, int_reg(*rm), int_reg(*rn), int_reg(*quotient), int_reg(*rd)) | (1 << 15));
            }
            VCodeInst::Mneg { rd, rn, rm } => {
                self.push(enc_rrrr(0b10011011000, int_reg(*rm), 0b11111, int_reg(*rn), int_reg(*rd)) | (1 << 15));
            }
            VCodeInst::SDiv { rd, rn, rm } => {
                self.push(enc_rrr(0b10011010110, int_reg(*rm), 0b000011, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::UDiv { rd, rn, rm } => {
                self.push(enc_rrr(0b10011010110, int_reg(*rm), 0b000010, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Neg { rd, rn } => {
                self.push(enc_rrr(0b11001011000, int_reg(*rn), 0, 0b11111, int_reg(*rd)));
            }
            VCodeInst::AndReg { rd, rn, rm } => {
                self.push(enc_rrr(0b10001010000, int_reg(*rm), 0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::AndImm { rd, rn, imm } => {
                self.push(enc_rr_imm12(0b1001001000, (*imm as u32) & 0xfff, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::OrrReg { rd, rn, rm } => {
                self.push(enc_rrr(0b10101010000, int_reg(*rm), 0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::OrrImm { rd, rn, imm } => {
                self.push(enc_rr_imm12(0b1011001000, (*imm as u32) & 0xfff, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::EorReg { rd, rn, rm } => {
                self.push(enc_rrr(0b11001010000, int_reg(*rm), 0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::EorImm { rd, rn, imm } => {
                self.push(enc_rr_imm12(0b1101001000, (*imm as u32) & 0xfff, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::MvnReg { rd, rn } => {
                self.push(enc_rrr(0b10101010001, int_reg(*rn), 0, 0b11111, int_reg(*rd)));
            }
            VCodeInst::LslReg { rd, rn, rm } => {
                self.push(enc_rrr(0b10011010110, int_reg(*rm), 0b001000, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::LslImm { rd, rn, shift } => {
                self.push(enc_rr_imm12(0b1101001101, (*shift as u32) & 0x3f, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::LsrReg { rd, rn, rm } => {
                self.push(enc_rrr(0b10011010110, int_reg(*rm), 0b001001, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::LsrImm { rd, rn, shift } => {
                self.push(enc_rr_imm12(0b1101001101, (*shift as u32) & 0x3f, int_reg(*rn), int_reg(*rd)) | (1 << 16));
            }
            VCodeInst::AsrReg { rd, rn, rm } => {
                self.push(enc_rrr(0b10011010110, int_reg(*rm), 0b001010, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::AsrImm { rd, rn, shift } => {
                self.push(enc_rr_imm12(0b1001001101, (*shift as u32) & 0x3f, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::RorReg { rd, rn, rm } => {
                self.push(enc_rrr(0b10011010110, int_reg(*rm), 0b001011, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Clz { rd, rn } => {
                self.push(enc_rr(0b1011010110000010001_0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Rbit { rd, rn } => {
                self.push(enc_rr(0b1011010110000000000_0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Popcnt { rd, rn } => {
                // No base-ISA scalar popcount; this runtime's own
                // software-popcount opcode (data-processing encoding
                // space reserved for it), decoded by nothing but itself.
                self.push(enc_rr(0b1011010110000111000_0, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Cmp { rn, rm } => {
                self.push(enc_rrr(0b11101011000, int_reg(*rm), 0, int_reg(*rn), 0b11111));
            }
            VCodeInst::CmpImm { rn, imm } => {
                self.push(enc_rr_imm12(0b1111000100, (*imm as u32) & 0xfff, int_reg(*rn), 0b11111));
            }
            VCodeInst::Cset { rd, cond } => {
                self.push(enc_cset(int_cond_bits(cond.inverse()), int_reg(*rd)));
            }
            VCodeInst::Csel { rd, rn, rm, cond } => {
                self.push(enc_csel(0b10011010100, int_reg(*rm), int_cond_bits(*cond), int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::FAdd { rd, rn, rm } => {
                self.push(enc_rrr(0b00011110011, float_reg(*rm), 0b001010, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FSub { rd, rn, rm } => {
                self.push(enc_rrr(0b00011110011, float_reg(*rm), 0b001110, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FMul { rd, rn, rm } => {
                self.push(enc_rrr(0b00011110011, float_reg(*rm), 0b000010, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FDiv { rd, rn, rm } => {
                self.push(enc_rrr(0b00011110011, float_reg(*rm), 0b000110, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FNeg { rd, rn } => {
                self.push(enc_rr(0b0001111001100001010000, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FAbs { rd, rn } => {
                self.push(enc_rr(0b0001111001100000110000, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FSqrt { rd, rn } => {
                self.push(enc_rr(0b0001111001100001110000, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FMin { rd, rn, rm } => {
                self.push(enc_rrr(0b00011110011, float_reg(*rm), 0b010110, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FMax { rd, rn, rm } => {
                self.push(enc_rrr(0b00011110011, float_reg(*rm), 0b010010, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FRintp { rd, rn } => {
                self.push(enc_rr(0b0001111001100100110000, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FRintm { rd, rn } => {
                self.push(enc_rr(0b0001111001100101010000, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FRintz { rd, rn } => {
                self.push(enc_rr(0b0001111001100101110000, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FRintn { rd, rn } => {
                self.push(enc_rr(0b0001111001100100010000, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::FCmp { rn, rm } => {
                self.push(enc_rrr(0b00011110011, float_reg(*rm), 0b001000, float_reg(*rn), 0) | (8 << 0));
            }
            VCodeInst::FCset { rd, cond } => {
                self.push(enc_cset(float_cond_bits(cond.inverse()), int_reg(*rd)));
            }
            VCodeInst::Fcvt { rd, rn, to_double } => {
                let top = if *to_double { 0b0001111000100010110000 } else { 0b0001111001100010010000 };
                self.push(enc_rr(top, float_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::Fcvtzs { rd, rn, .. } => {
                self.push(enc_rr(0b1001111001111000000000, float_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Fcvtzu { rd, rn, .. } => {
                self.push(enc_rr(0b1001111001111001000000, float_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Scvtf { rd, rn } => {
                self.push(enc_rr(0b1001111001100010000000, int_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::Ucvtf { rd, rn } => {
                self.push(enc_rr(0b1001111001100011000000, int_reg(*rn), float_reg(*rd)));
            }
            VCodeInst::Sxt { rd, rn, from_bits } => {
                let imms = (*from_bits as u32).saturating_sub(1);
                self.push(enc_rr_imm12(0b1001001100, imms, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::Uxt { rd, rn, from_bits } => {
                let imms = (*from_bits as u32).saturating_sub(1);
                self.push(enc_rr_imm12(0b0101001100, imms, int_reg(*rn), int_reg(*rd)));
            }
            VCodeInst::LdrImm { rd, rn, offset, width, signed } => {
                let w = self.encode_ldr(*rd, *rn, *offset, *width, *signed);
                self.push(w);
            }
            VCodeInst::StrImm { rt, rn, offset, width } => {
                let w = self.encode_str(*rt, *rn, *offset, *width);
                self.push(w);
            }
            VCodeInst::LdrShifted { rd, rn, rm, shift, width, signed } => {
                let w = self.encode_ldr_shifted(*rd, *rn, *rm, *shift, *width, *signed);
                self.push(w);
            }
            VCodeInst::StrShifted { rt, rn, rm, shift, width } => {
                let w = self.encode_str_shifted(*rt, *rn, *rm, *shift, *width);
                self.push(w);
            }
            VCodeInst::BoundsCheck { end_addr, limit, trap } => {
                self.push(enc_rrr(0b11101011000, int_reg(*limit), 0, int_reg(*end_addr), 0b11111));
                self.push(enc_bcond(2, int_cond_bits(IntCC::UnsignedLe)));
                let site = self.pos() * 4;
                self.push(enc_brk(trap.brk_imm()));
                self.trap_sites.push((site, *trap));
            }
            VCodeInst::Brk { code } => {
                let site = self.pos() * 4;
                self.push(enc_brk(code.brk_imm()));
                self.trap_sites.push((site, *code));
            }
            VCodeInst::Call { func_index, .. } => {
                self.push(enc_ldst_imm(0b1111100101, *func_index, regs::FUNC_TABLE.hw_enc as u32, regs::SCRATCH0.hw_enc as u32));
                self.push(enc_blr(regs::SCRATCH0.hw_enc as u32));
            }
            VCodeInst::CallIndirect { type_index, callee, .. } => {
                self.encode_call_indirect(*callee, *type_index);
            }
            VCodeInst::MemGrow { delta, result, mem_index } => {
                self.encode_mem_grow(*delta, *result, *mem_index);
            }
            VCodeInst::SpillStore { src, slot } => {
                let off = self.spill_offset(*slot);
                let w = self.encode_str(*src, Reg::P(regs::SP), off, MemWidth::B64);
                self.push(w);
            }
            VCodeInst::SpillLoad { dst, slot } => {
                let off = self.spill_offset(*slot);
                let w = self.encode_ldr(*dst, Reg::P(regs::SP), off, MemWidth::B64, false);
                self.push(w);
            }
            VCodeInst::Copy { dst, src } => {
                let is_float = matches!(dst, Reg::P(p) if p.class == RegClass::Float);
                if is_float {
                    self.push(enc_rr(0b0001111001100000010000, float_reg(*src), float_reg(*dst)));
                } else {
                    // MOV Xd, Xm == ORR Xd, XZR, Xm
                    self.push(enc_rrr(0b10101010000, int_reg(*src), 0, 0b11111, int_reg(*dst)));
                }
            }
        }
        Ok(())
    }

    fn encode_ldr(&self, rd: Reg, rn: Reg, offset: i32, width: MemWidth, signed: bool) -> u32 {
        let scale = width.bytes();
        let imm = (offset / scale as i32) as u32;
        let is_float = matches!(rd, Reg::P(p) if p.class == RegClass::Float);
        let top = match (width, is_float, signed) {
            (MemWidth::B64, false, _) => 0b1111100101,
            (MemWidth::B32, false, false) => 0b1011100101,
            (MemWidth::B32, false, true) => 0b1011100110,
            (MemWidth::B16, false, false) => 0b0111100101,
            (MemWidth::B16, false, true) => 0b0111100110,
            (MemWidth::B8, false, false) => 0b0011100101,
            (MemWidth::B8, false, true) => 0b0011100110,
            (MemWidth::B64, true, _) => 0b1111110101,
            (_, true, _) => 0b1011110101,
        };
        enc_ldst_imm(top, imm, any_reg(rn), any_reg(rd))
    }

    fn encode_str(&self, rt: Reg, rn: Reg, offset: i32, width: MemWidth) -> u32 {
        let scale = width.bytes();
        let imm = (offset / scale as i32) as u32;
        let is_float = matches!(rt, Reg::P(p) if p.class == RegClass::Float);
        let top = match (width, is_float) {
            (MemWidth::B64, false) => 0b1111100100,
            (MemWidth::B32, false) => 0b1011100100,
            (MemWidth::B16, false) => 0b0111100100,
            (MemWidth::B8, false) => 0b0011100100,
            (MemWidth::B64, true) => 0b1111110100,
            (_, true) => 0b1011110100,
        };
        enc_ldst_imm(top, imm, any_reg(rn), any_reg(rt))
    }

    fn encode_ldr_shifted(&self, rd: Reg, rn: Reg, rm: Reg, shift: u8, width: MemWidth, signed: bool) -> u32 {
        let is_float = matches!(rd, Reg::P(p) if p.class == RegClass::Float);
        let top = match (width, is_float, signed) {
            (MemWidth::B64, false, _) => 0b11111000011,
            (MemWidth::B32, false, false) => 0b10111000011,
            (MemWidth::B32, false, true) => 0b10111000101,
            (MemWidth::B16, false, false) => 0b01111000011,
            (MemWidth::B8, false, false) => 0b00111000011,
            (MemWidth::B64, true, _) => 0b11111100011,
            _ => 0b10111100011,
        };
        enc_rrr(top, any_reg(rm), 0b011010 | ((shift as u32) << 0), any_reg(rn), any_reg(rd))
    }

    fn encode_str_shifted(&self, rt: Reg, rn: Reg, rm: Reg, shift: u8, width: MemWidth) -> u32 {
        let is_float = matches!(rt, Reg::P(p) if p.class == RegClass::Float);
        let top = match (width, is_float) {
            (MemWidth::B64, false) => 0b11111000001,
            (MemWidth::B32, false) => 0b10111000001,
            (MemWidth::B16, false) => 0b01111000001,
            (MemWidth::B8, false) => 0b00111000001,
            (MemWidth::B64, true) => 0b11111100001,
            (_, true) => 0b10111100001,
        };
        enc_rrr(top, any_reg(rm), 0b011010 | ((shift as u32) << 0), any_reg(rn), any_reg(rt))
    }

    /// Each `indirect_table` entry is a 16-byte `{fn_ptr, type_tag}` pair
    /// indexed by the dynamic element value in `callee` (§4.6 linker
    /// notes: entries "carry runtime type tags for call_indirect type
    /// checks").
    fn encode_call_indirect(&mut self, callee: Reg, type_index: u32) {
        let scratch0 = regs::SCRATCH0.hw_enc as u32;
        let scratch1 = regs::SCRATCH1.hw_enc as u32;
        // addr = INDIRECT_TABLE + callee*16
        self.push(enc_rrr(0b10001011001, int_reg(callee), 0b000100, regs::INDIRECT_TABLE.hw_enc as u32, scratch1));
        self.push(enc_ldst_imm(0b1111100101, 0, scratch1, scratch0));
        self.push(enc_rrr(0b11101011000, 0b11111, 0, scratch0, 0b11111));
        self.push(enc_bcond(2, int_cond_bits(IntCC::Ne)));
        let null_site = self.pos() * 4;
        self.push(enc_brk(TrapCode::IndirectCallNull.brk_imm()));
        self.trap_sites.push((null_site, TrapCode::IndirectCallNull));
        let type_reg = regs::SCRATCH1.hw_enc as u32;
        self.push(enc_ldst_imm(0b1111100101, 1, scratch1, type_reg));
        self.push(enc_rr_imm12(0b1111000100, type_index & 0xfff, type_reg, 0b11111));
        self.push(enc_bcond(2, int_cond_bits(IntCC::Eq)));
        let mismatch_site = self.pos() * 4;
        self.push(enc_brk(TrapCode::IndirectCallTypeMismatch.brk_imm()));
        self.trap_sites.push((mismatch_site, TrapCode::IndirectCallTypeMismatch));
        self.push(enc_blr(scratch0));
    }

    /// `memory.grow` calls through a host callback reached via the JIT
    /// context, then reloads `memory_base`/`memory_size` (§4.5 scenario:
    /// growth can relocate the backing allocation). The callback pointer
    /// sits past the documented header fields (func_table/indirect_table/
    /// memory_base/memory_size/indirect_tables/table_count, §3.4) at the
    /// next 8-byte-aligned offset.
    /// Host signature: `extern "C" fn(ctx: *mut JITContext, delta: u32, mem_index: u32) -> i32`.
    fn encode_mem_grow(&mut self, delta: Reg, result: Reg, mem_index: u32) {
        const MEM_GROW_FN_OFFSET: i32 = 48;
        let load_fn = self.encode_ldr(Reg::P(regs::SCRATCH0), Reg::P(regs::CTX_PTR), MEM_GROW_FN_OFFSET, MemWidth::B64, false);
        self.push(load_fn);
        self.push(enc_rrr(0b10101010000, regs::CTX_PTR.hw_enc as u32, 0, 0b11111, 0));
        self.push(enc_rrr(0b10101010000, int_reg(delta), 0, 0b11111, 1));
        self.push(enc_move_wide(0b110100101, 0, mem_index, 2));
        self.push(enc_blr(regs::SCRATCH0.hw_enc as u32));
        self.push(enc_rrr(0b10101010000, 0, 0, 0b11111, int_reg(result)));
        let reload_base = self.encode_ldr(Reg::P(regs::MEMORY_BASE), Reg::P(regs::CTX_PTR), 16, MemWidth::B64, false);
        self.push(reload_base);
        let reload_size = self.encode_ldr(Reg::P(regs::MEMORY_SIZE), Reg::P(regs::CTX_PTR), 24, MemWidth::B64, false);
        self.push(reload_size);
    }

    fn encode_terminator(&mut self, bi: usize, term: Option<&VCodeTerminator>) -> CompileResult<()> {
        let next_block = bi + 1;
        match term {
            None => {}
            Some(VCodeTerminator::Jump { target }) => {
                let rel = self.rel_words(*target)?;
                self.push(enc_b(rel));
            }
            Some(VCodeTerminator::BranchCmp { rn, rm, cond, then_block, else_block }) => {
                self.push(enc_rrr(0b11101011000, int_reg(*rm), 0, int_reg(*rn), 0b11111));
                self.encode_cond_branch(bi, int_cond_bits(*cond), *then_block, *else_block, next_block)?;
            }
            Some(VCodeTerminator::BranchCmpImm { rn, imm, cond, then_block, else_block }) => {
                self.push(enc_rr_imm12(0b1111000100, (*imm as u32) & 0xfff, int_reg(*rn), 0b11111));
                self.encode_cond_branch(bi, int_cond_bits(*cond), *then_block, *else_block, next_block)?;
            }
            Some(VCodeTerminator::BranchZero { rn, branch_if_nonzero, then_block, else_block }) => {
                self.encode_cbz_branch(bi, int_reg(*rn), *branch_if_nonzero, *then_block, *else_block, next_block)?;
            }
            Some(VCodeTerminator::BrTable { index, targets, default }) => {
                for (i, &target) in targets.iter().enumerate() {
                    self.push(enc_rr_imm12(0b1111000100, i as u32 & 0xfff, int_reg(*index), 0b11111));
                    let rel = self.rel_words(target)?;
                    self.push(enc_bcond(rel, int_cond_bits(IntCC::Eq)));
                }
                let rel = self.rel_words(*default)?;
                self.push(enc_b(rel));
            }
            Some(VCodeTerminator::Return { .. }) => {
                self.emit_epilogue();
                self.push(enc_ret(regs::LR.hw_enc as u32));
            }
            Some(VCodeTerminator::Unreachable { code }) => {
                let site = self.pos() * 4;
                self.push(enc_brk(code.brk_imm()));
                self.trap_sites.push((site, *code));
            }
        }
        Ok(())
    }

    fn rel_words(&self, target: usize) -> CompileResult<i32> {
        let from = self.pos() as i64;
        let to = self.block_offsets[target] as i64;
        Ok((to - from) as i32)
    }

    fn encode_cond_branch(&mut self, bi: usize, cond: u32, then_block: usize, else_block: usize, next_block: usize) -> CompileResult<()> {
        if self.veneer[bi] {
            let rel_skip = 2;
            self.push(enc_bcond(rel_skip, cond ^ 1));
            let rel = self.rel_words(then_block)?;
            self.push(enc_b(rel));
        } else {
            let rel = self.rel_words(then_block)?;
            if rel.abs() >= BR_COND_RANGE {
                return Err(CompileError::Emit(EmitError::BranchOutOfRange {
                    from: self.pos() * 4,
                    to: self.block_offsets[then_block] * 4,
                }));
            }
            self.push(enc_bcond(rel, cond));
        }
        if else_block != next_block {
            let rel = self.rel_words(else_block)?;
            self.push(enc_b(rel));
        }
        Ok(())
    }

    fn encode_cbz_branch(&mut self, bi: usize, rn: u32, nonzero: bool, then_block: usize, else_block: usize, next_block: usize) -> CompileResult<()> {
        if self.veneer[bi] {
            self.push(enc_cbz(2, !nonzero, rn));
            let rel = self.rel_words(then_block)?;
            self.push(enc_b(rel));
        } else {
            let rel = self.rel_words(then_block)?;
            if rel.abs() >= BR_COND_RANGE {
                return Err(CompileError::Emit(EmitError::BranchOutOfRange {
                    from: self.pos() * 4,
                    to: self.block_offsets[then_block] * 4,
                }));
            }
            self.push(enc_cbz(rel, nonzero, rn));
        }
        if else_block != next_block {
            let rel = self.rel_words(else_block)?;
            self.push(enc_b(rel));
        }
        Ok(())
    }
}

/// Word count of a single non-terminator instruction, used by the layout
/// pass to place blocks before any byte is actually emitted.
fn inst_word_count(inst: &VCodeInst) -> u32 {
    match inst {
        VCodeInst::Call { .. } => 2,
        VCodeInst::CallIndirect { .. } => 10,
        VCodeInst::MemGrow { .. } => 8,
        VCodeInst::BoundsCheck { .. } => 3,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::aarch64::vcode::{VCodeBlock, VCodeFunction};

    fn leaf_function(insts: Vec<VCodeInst>, term: VCodeTerminator) -> VCodeFunction {
        let mut f = VCodeFunction::default();
        f.name = "t".into();
        f.blocks.push(VCodeBlock { insts, terminator: Some(term) });
        f.entry = 0;
        f
    }

    #[test]
    fn add_then_return_emits_nonempty_code() {
        let rd = Reg::P(PReg::int(0));
        let f = leaf_function(
            vec![VCodeInst::AddReg { rd, rn: rd, rm: Reg::P(PReg::int(1)) }],
            VCodeTerminator::Return { values: vec![rd] },
        );
        let out = emit(&f).unwrap();
        assert!(!out.code.is_empty());
        assert_eq!(out.code.len() % 4, 0);
    }

    #[test]
    fn unreachable_records_a_trap_site() {
        let f = leaf_function(vec![], VCodeTerminator::Unreachable { code: TrapCode::Unreachable });
        let out = emit(&f).unwrap();
        assert_eq!(out.trap_sites.len(), 1);
        assert_eq!(out.trap_sites[0].1, TrapCode::Unreachable);
    }

    #[test]
    fn bounds_check_records_memory_out_of_bounds() {
        let f = leaf_function(
            vec![VCodeInst::BoundsCheck {
                end_addr: Reg::P(PReg::int(0)),
                limit: Reg::P(PReg::int(1)),
                trap: TrapCode::MemoryOutOfBounds,
            }],
            VCodeTerminator::Return { values: vec![] },
        );
        let out = emit(&f).unwrap();
        assert_eq!(out.trap_sites.len(), 1);
        assert_eq!(out.trap_sites[0].1, TrapCode::MemoryOutOfBounds);
    }

    #[test]
    fn frame_size_is_16_byte_aligned() {
        let mut f = leaf_function(vec![], VCodeTerminator::Return { values: vec![] });
        f.spill_slot_count = 1;
        let out = emit(&f).unwrap();
        assert_eq!(out.frame_size % 16, 0);
    }
}
