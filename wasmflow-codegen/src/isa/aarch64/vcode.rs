//! VCode (§3.2): the AArch64-shaped instruction set the lowerer produces
//! and the allocator/emitter consume in turn. Registers stay tagged as
//! virtual or physical in the same instruction stream — the allocator
//! rewrites `Reg::V` to `Reg::P` in place rather than building a second
//! "PCode" representation, which keeps spill/reload insertion a simple
//! `Vec::insert` instead of a second pass over a parallel structure.

use crate::ir::{FloatCC, IntCC, TrapCode};
use crate::isa::aarch64::regs::{PReg, RegClass};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct VReg {
    pub index: u32,
    pub class: RegClass,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Reg {
    V(VReg),
    P(PReg),
}

impl Reg {
    pub fn class(self) -> RegClass {
        match self {
            Reg::V(v) => v.class,
            Reg::P(p) => p.class,
        }
    }

    pub fn as_vreg(self) -> Option<VReg> {
        match self {
            Reg::V(v) => Some(v),
            Reg::P(_) => None,
        }
    }

    pub fn as_preg(self) -> Option<PReg> {
        match self {
            Reg::P(p) => Some(p),
            Reg::V(_) => None,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemWidth {
    B8,
    B16,
    B32,
    B64,
}

impl MemWidth {
    pub fn bytes(self) -> u32 {
        match self {
            MemWidth::B8 => 1,
            MemWidth::B16 => 2,
            MemWidth::B32 => 4,
            MemWidth::B64 => 8,
        }
    }
}

/// One fused AArch64-shaped operation (§4.3 pattern classes name most of
/// these directly).
#[derive(Clone, Debug)]
pub enum VCodeInst {
    MovZ { rd: Reg, imm: u16, shift: u8 },
    MovK { rd: Reg, imm: u16, shift: u8 },
    /// `LDR (literal)` from the per-function constant pool (§4.5).
    LoadConst { rd: Reg, pool_index: u32 },
    /// Int<->float bit move for ABI parameter/return conversion.
    Fmov { rd: Reg, rn: Reg },

    AddReg { rd: Reg, rn: Reg, rm: Reg },
    AddImm { rd: Reg, rn: Reg, imm: i64 },
    AddShifted { rd: Reg, rn: Reg, rm: Reg, shift: u8 },
    SubReg { rd: Reg, rn: Reg, rm: Reg },
    SubImm { rd: Reg, rn: Reg, imm: i64 },
    SubShifted { rd: Reg, rn: Reg, rm: Reg, shift: u8 },
    MulReg { rd: Reg, rn: Reg, rm: Reg },
    /// `rd = rn*rm + ra` (§4.3 fused multiply-add).
    Madd { rd: Reg, rn: Reg, rm: Reg, ra: Reg },
    /// `rd = ra - rn*rm`.
    Msub { rd: Reg, rn: Reg, rm: Reg, ra: Reg },
    /// `rd = -(rn*rm)`.
    Mneg { rd: Reg, rn: Reg, rm: Reg },
    SDiv { rd: Reg, rn: Reg, rm: Reg },
    UDiv { rd: Reg, rn: Reg, rm: Reg },
    /// `rd = rn - (rn/rm)*rm`, used to build div-rem.
    Msub2 { rd: Reg, rn: Reg, rm: Reg, quotient: Reg },
    Neg { rd: Reg, rn: Reg },

    AndReg { rd: Reg, rn: Reg, rm: Reg },
    AndImm { rd: Reg, rn: Reg, imm: u64 },
    OrrReg { rd: Reg, rn: Reg, rm: Reg },
    OrrImm { rd: Reg, rn: Reg, imm: u64 },
    EorReg { rd: Reg, rn: Reg, rm: Reg },
    EorImm { rd: Reg, rn: Reg, imm: u64 },
    MvnReg { rd: Reg, rn: Reg },

    LslReg { rd: Reg, rn: Reg, rm: Reg },
    LslImm { rd: Reg, rn: Reg, shift: u8 },
    LsrReg { rd: Reg, rn: Reg, rm: Reg },
    LsrImm { rd: Reg, rn: Reg, shift: u8 },
    AsrReg { rd: Reg, rn: Reg, rm: Reg },
    AsrImm { rd: Reg, rn: Reg, shift: u8 },
    RorReg { rd: Reg, rn: Reg, rm: Reg },

    Clz { rd: Reg, rn: Reg },
    Rbit { rd: Reg, rn: Reg },
    Popcnt { rd: Reg, rn: Reg },

    Cmp { rn: Reg, rm: Reg },
    CmpImm { rn: Reg, imm: i64 },
    Cset { rd: Reg, cond: IntCC },
    /// `rd = cond ? rn : rm`, the select+compare fusion target (§4.3).
    Csel { rd: Reg, rn: Reg, rm: Reg, cond: IntCC },

    FAdd { rd: Reg, rn: Reg, rm: Reg },
    FSub { rd: Reg, rn: Reg, rm: Reg },
    FMul { rd: Reg, rn: Reg, rm: Reg },
    FDiv { rd: Reg, rn: Reg, rm: Reg },
    FNeg { rd: Reg, rn: Reg },
    FAbs { rd: Reg, rn: Reg },
    FSqrt { rd: Reg, rn: Reg },
    FMin { rd: Reg, rn: Reg, rm: Reg },
    FMax { rd: Reg, rn: Reg, rm: Reg },
    FRintp { rd: Reg, rn: Reg },
    FRintm { rd: Reg, rn: Reg },
    FRintz { rd: Reg, rn: Reg },
    FRintn { rd: Reg, rn: Reg },
    FCmp { rn: Reg, rm: Reg },
    FCset { rd: Reg, cond: FloatCC },
    Fcvt { rd: Reg, rn: Reg, to_double: bool },
    /// Trapping (`FcvtToIntTrapping`) or saturating (`sat = true`)
    /// float-to-int conversion.
    Fcvtzs { rd: Reg, rn: Reg, sat: bool },
    Fcvtzu { rd: Reg, rn: Reg, sat: bool },
    Scvtf { rd: Reg, rn: Reg },
    Ucvtf { rd: Reg, rn: Reg },
    Sxt { rd: Reg, rn: Reg, from_bits: u8 },
    Uxt { rd: Reg, rn: Reg, from_bits: u8 },

    /// Plain base+offset load/store.
    LdrImm { rd: Reg, rn: Reg, offset: i32, width: MemWidth, signed: bool },
    StrImm { rt: Reg, rn: Reg, offset: i32, width: MemWidth },
    /// Fused `base + (index << shift)` addressing (§4.3 memory-address
    /// fusion).
    LdrShifted { rd: Reg, rn: Reg, rm: Reg, shift: u8, width: MemWidth, signed: bool },
    StrShifted { rt: Reg, rn: Reg, rm: Reg, shift: u8, width: MemWidth },

    /// Trap-preserving bounds check (§4.3): `CMP end_addr, mem_size;
    /// B.HI trap; BRK #code` conceptually folded into one VCode node so
    /// the emitter can place the branch+brk sequence out of line.
    BoundsCheck { end_addr: Reg, limit: Reg, trap: TrapCode },
    Brk { code: TrapCode },

    Call { func_index: u32, arg_regs: Vec<Reg>, ret_regs: Vec<Reg>, clobbers: Vec<PReg> },
    CallIndirect { table_index: u32, type_index: u32, callee: Reg, arg_regs: Vec<Reg>, ret_regs: Vec<Reg>, clobbers: Vec<PReg> },
    /// `memory.grow`: host call plus the cache-register reload the
    /// lowerer documents as happening "immediately after" (§4.3, §4.5).
    MemGrow { delta: Reg, result: Reg, mem_index: u32 },

    SpillStore { src: Reg, slot: u32 },
    SpillLoad { dst: Reg, slot: u32 },
    /// Register-to-register move inserted by coalescing or ABI shuffles.
    Copy { dst: Reg, src: Reg },
}

impl VCodeInst {
    /// Registers this instruction writes.
    pub fn defs(&self) -> smallvec::SmallVec<[Reg; 2]> {
        use smallvec::smallvec;
        match self {
            VCodeInst::MovZ { rd, .. }
            | VCodeInst::MovK { rd, .. }
            | VCodeInst::LoadConst { rd, .. }
            | VCodeInst::Fmov { rd, .. }
            | VCodeInst::AddReg { rd, .. }
            | VCodeInst::AddImm { rd, .. }
            | VCodeInst::AddShifted { rd, .. }
            | VCodeInst::SubReg { rd, .. }
            | VCodeInst::SubImm { rd, .. }
            | VCodeInst::SubShifted { rd, .. }
            | VCodeInst::MulReg { rd, .. }
            | VCodeInst::Madd { rd, .. }
            | VCodeInst::Msub { rd, .. }
            | VCodeInst::Mneg { rd, .. }
            | VCodeInst::SDiv { rd, .. }
            | VCodeInst::UDiv { rd, .. }
            | VCodeInst::Msub2 { rd, .. }
            | VCodeInst::Neg { rd, .. }
            | VCodeInst::AndReg { rd, .. }
            | VCodeInst::AndImm { rd, .. }
            | VCodeInst::OrrReg { rd, .. }
            | VCodeInst::OrrImm { rd, .. }
            | VCodeInst::EorReg { rd, .. }
            | VCodeInst::EorImm { rd, .. }
            | VCodeInst::MvnReg { rd, .. }
            | VCodeInst::LslReg { rd, .. }
            | VCodeInst::LslImm { rd, .. }
            | VCodeInst::LsrReg { rd, .. }
            | VCodeInst::LsrImm { rd, .. }
            | VCodeInst::AsrReg { rd, .. }
            | VCodeInst::AsrImm { rd, .. }
            | VCodeInst::RorReg { rd, .. }
            | VCodeInst::Clz { rd, .. }
            | VCodeInst::Rbit { rd, .. }
            | VCodeInst::Popcnt { rd, .. }
            | VCodeInst::Cset { rd, .. }
            | VCodeInst::Csel { rd, .. }
            | VCodeInst::FAdd { rd, .. }
            | VCodeInst::FSub { rd, .. }
            | VCodeInst::FMul { rd, .. }
            | VCodeInst::FDiv { rd, .. }
            | VCodeInst::FNeg { rd, .. }
            | VCodeInst::FAbs { rd, .. }
            | VCodeInst::FSqrt { rd, .. }
            | VCodeInst::FMin { rd, .. }
            | VCodeInst::FMax { rd, .. }
            | VCodeInst::FRintp { rd, .. }
            | VCodeInst::FRintm { rd, .. }
            | VCodeInst::FRintz { rd, .. }
            | VCodeInst::FRintn { rd, .. }
            | VCodeInst::FCset { rd, .. }
            | VCodeInst::Fcvt { rd, .. }
            | VCodeInst::Fcvtzs { rd, .. }
            | VCodeInst::Fcvtzu { rd, .. }
            | VCodeInst::Scvtf { rd, .. }
            | VCodeInst::Ucvtf { rd, .. }
            | VCodeInst::Sxt { rd, .. }
            | VCodeInst::Uxt { rd, .. }
            | VCodeInst::LdrImm { rd, .. }
            | VCodeInst::LdrShifted { rd, .. } => smallvec![*rd],
            VCodeInst::MemGrow { result, .. } => smallvec![*result],
            VCodeInst::SpillLoad { dst, .. } => smallvec![*dst],
            VCodeInst::Copy { dst, .. } => smallvec![*dst],
            VCodeInst::Call { ret_regs, .. } | VCodeInst::CallIndirect { ret_regs, .. } => {
                ret_regs.iter().copied().collect()
            }
            VCodeInst::StrImm { .. }
            | VCodeInst::StrShifted { .. }
            | VCodeInst::Cmp { .. }
            | VCodeInst::CmpImm { .. }
            | VCodeInst::FCmp { .. }
            | VCodeInst::BoundsCheck { .. }
            | VCodeInst::Brk { .. }
            | VCodeInst::SpillStore { .. } => smallvec![],
        }
    }

    /// Registers this instruction reads.
    pub fn uses(&self) -> smallvec::SmallVec<[Reg; 4]> {
        use smallvec::smallvec;
        match self {
            VCodeInst::MovZ { .. } | VCodeInst::MovK { .. } | VCodeInst::LoadConst { .. } => {
                smallvec![]
            }
            VCodeInst::Fmov { rn, .. }
            | VCodeInst::Neg { rn, .. }
            | VCodeInst::MvnReg { rn, .. }
            | VCodeInst::Clz { rn, .. }
            | VCodeInst::Rbit { rn, .. }
            | VCodeInst::Popcnt { rn, .. }
            | VCodeInst::FNeg { rn, .. }
            | VCodeInst::FAbs { rn, .. }
            | VCodeInst::FSqrt { rn, .. }
            | VCodeInst::FRintp { rn, .. }
            | VCodeInst::FRintm { rn, .. }
            | VCodeInst::FRintz { rn, .. }
            | VCodeInst::FRintn { rn, .. }
            | VCodeInst::Fcvt { rn, .. }
            | VCodeInst::Fcvtzs { rn, .. }
            | VCodeInst::Fcvtzu { rn, .. }
            | VCodeInst::Scvtf { rn, .. }
            | VCodeInst::Ucvtf { rn, .. }
            | VCodeInst::Sxt { rn, .. }
            | VCodeInst::Uxt { rn, .. }
            | VCodeInst::LslImm { rn, .. }
            | VCodeInst::LsrImm { rn, .. }
            | VCodeInst::AsrImm { rn, .. }
            | VCodeInst::AddImm { rn, .. }
            | VCodeInst::SubImm { rn, .. }
            | VCodeInst::AndImm { rn, .. }
            | VCodeInst::OrrImm { rn, .. }
            | VCodeInst::EorImm { rn, .. }
            | VCodeInst::CmpImm { rn, .. }
            | VCodeInst::LdrImm { rn, .. } => smallvec![*rn],
            VCodeInst::AddReg { rn, rm, .. }
            | VCodeInst::AddShifted { rn, rm, .. }
            | VCodeInst::SubReg { rn, rm, .. }
            | VCodeInst::SubShifted { rn, rm, .. }
            | VCodeInst::MulReg { rn, rm, .. }
            | VCodeInst::SDiv { rn, rm, .. }
            | VCodeInst::UDiv { rn, rm, .. }
            | VCodeInst::AndReg { rn, rm, .. }
            | VCodeInst::OrrReg { rn, rm, .. }
            | VCodeInst::EorReg { rn, rm, .. }
            | VCodeInst::LslReg { rn, rm, .. }
            | VCodeInst::LsrReg { rn, rm, .. }
            | VCodeInst::AsrReg { rn, rm, .. }
            | VCodeInst::RorReg { rn, rm, .. }
            | VCodeInst::Cmp { rn, rm }
            | VCodeInst::FCmp { rn, rm }
            | VCodeInst::FAdd { rn, rm, .. }
            | VCodeInst::FSub { rn, rm, .. }
            | VCodeInst::FMul { rn, rm, .. }
            | VCodeInst::FDiv { rn, rm, .. }
            | VCodeInst::FMin { rn, rm, .. }
            | VCodeInst::FMax { rn, rm, .. } => smallvec![*rn, *rm],
            VCodeInst::Madd { rn, rm, ra, .. } | VCodeInst::Msub { rn, rm, ra, .. } => {
                smallvec![*rn, *rm, *ra]
            }
            VCodeInst::Msub2 { rn, rm, quotient, .. } => smallvec![*rn, *rm, *quotient],
            VCodeInst::Mneg { rn, rm, .. } => smallvec![*rn, *rm],
            VCodeInst::Csel { rn, rm, .. } => smallvec![*rn, *rm],
            VCodeInst::LdrShifted { rn, rm, .. } => smallvec![*rn, *rm],
            VCodeInst::StrImm { rt, rn, .. } => smallvec![*rt, *rn],
            VCodeInst::StrShifted { rt, rn, rm, .. } => smallvec![*rt, *rn, *rm],
            VCodeInst::BoundsCheck { end_addr, limit, .. } => smallvec![*end_addr, *limit],
            VCodeInst::MemGrow { delta, .. } => smallvec![*delta],
            VCodeInst::SpillStore { src, .. } => smallvec![*src],
            VCodeInst::Copy { src, .. } => smallvec![*src],
            VCodeInst::Call { arg_regs, .. } => arg_regs.iter().copied().collect(),
            VCodeInst::CallIndirect { callee, arg_regs, .. } => {
                let mut v: smallvec::SmallVec<[Reg; 4]> = smallvec![*callee];
                v.extend(arg_regs.iter().copied());
                v
            }
            VCodeInst::Cset { .. } | VCodeInst::FCset { .. } | VCodeInst::Brk { .. } => {
                smallvec![]
            }
            VCodeInst::SpillLoad { .. } => smallvec![],
        }
    }

    pub fn clobbers(&self) -> &[PReg] {
        match self {
            VCodeInst::Call { clobbers, .. } | VCodeInst::CallIndirect { clobbers, .. } => {
                clobbers
            }
            _ => &[],
        }
    }

    pub fn map_regs_mut(&mut self, mut f: impl FnMut(&mut Reg)) {
        macro_rules! m {
            ($($r:expr),* $(,)?) => { $( f($r); )* };
        }
        match self {
            VCodeInst::MovZ { rd, .. } | VCodeInst::MovK { rd, .. } | VCodeInst::LoadConst { rd, .. } => m!(rd),
            VCodeInst::Fmov { rd, rn } => m!(rd, rn),
            VCodeInst::AddReg { rd, rn, rm }
            | VCodeInst::SubReg { rd, rn, rm }
            | VCodeInst::MulReg { rd, rn, rm }
            | VCodeInst::SDiv { rd, rn, rm }
            | VCodeInst::UDiv { rd, rn, rm }
            | VCodeInst::AndReg { rd, rn, rm }
            | VCodeInst::OrrReg { rd, rn, rm }
            | VCodeInst::EorReg { rd, rn, rm }
            | VCodeInst::LslReg { rd, rn, rm }
            | VCodeInst::LsrReg { rd, rn, rm }
            | VCodeInst::AsrReg { rd, rn, rm }
            | VCodeInst::RorReg { rd, rn, rm }
            | VCodeInst::FAdd { rd, rn, rm }
            | VCodeInst::FSub { rd, rn, rm }
            | VCodeInst::FMul { rd, rn, rm }
            | VCodeInst::FDiv { rd, rn, rm }
            | VCodeInst::FMin { rd, rn, rm }
            | VCodeInst::FMax { rd, rn, rm }
            | VCodeInst::Mneg { rd, rn, rm } => m!(rd, rn, rm),
            VCodeInst::AddShifted { rd, rn, rm, .. }
            | VCodeInst::SubShifted { rd, rn, rm, .. }
            | VCodeInst::LdrShifted { rd, rn, rm, .. } => m!(rd, rn, rm),
            VCodeInst::Madd { rd, rn, rm, ra } | VCodeInst::Msub { rd, rn, rm, ra } => {
                m!(rd, rn, rm, ra)
            }
            VCodeInst::Msub2 { rd, rn, rm, quotient } => m!(rd, rn, rm, quotient),
            VCodeInst::AddImm { rd, rn, .. }
            | VCodeInst::SubImm { rd, rn, .. }
            | VCodeInst::AndImm { rd, rn, .. }
            | VCodeInst::OrrImm { rd, rn, .. }
            | VCodeInst::EorImm { rd, rn, .. }
            | VCodeInst::LslImm { rd, rn, .. }
            | VCodeInst::LsrImm { rd, rn, .. }
            | VCodeInst::AsrImm { rd, rn, .. }
            | VCodeInst::Neg { rd, rn }
            | VCodeInst::MvnReg { rd, rn }
            | VCodeInst::Clz { rd, rn }
            | VCodeInst::Rbit { rd, rn }
            | VCodeInst::Popcnt { rd, rn }
            | VCodeInst::FNeg { rd, rn }
            | VCodeInst::FAbs { rd, rn }
            | VCodeInst::FSqrt { rd, rn }
            | VCodeInst::FRintp { rd, rn }
            | VCodeInst::FRintm { rd, rn }
            | VCodeInst::FRintz { rd, rn }
            | VCodeInst::FRintn { rd, rn }
            | VCodeInst::Fcvt { rd, rn, .. }
            | VCodeInst::Fcvtzs { rd, rn, .. }
            | VCodeInst::Fcvtzu { rd, rn, .. }
            | VCodeInst::Scvtf { rd, rn }
            | VCodeInst::Ucvtf { rd, rn }
            | VCodeInst::Sxt { rd, rn, .. }
            | VCodeInst::Uxt { rd, rn, .. }
            | VCodeInst::LdrImm { rd, rn, .. } => m!(rd, rn),
            VCodeInst::Cset { rd, .. } | VCodeInst::FCset { rd, .. } => m!(rd),
            VCodeInst::Csel { rd, rn, rm, .. } => m!(rd, rn, rm),
            VCodeInst::Cmp { rn, rm } | VCodeInst::FCmp { rn, rm } => m!(rn, rm),
            VCodeInst::CmpImm { rn, .. } => m!(rn),
            VCodeInst::StrImm { rt, rn, .. } => m!(rt, rn),
            VCodeInst::StrShifted { rt, rn, rm, .. } => m!(rt, rn, rm),
            VCodeInst::BoundsCheck { end_addr, limit, .. } => m!(end_addr, limit),
            VCodeInst::Brk { .. } => {}
            VCodeInst::Call { arg_regs, ret_regs, .. } => {
                for r in arg_regs.iter_mut() {
                    f(r);
                }
                for r in ret_regs.iter_mut() {
                    f(r);
                }
            }
            VCodeInst::CallIndirect { callee, arg_regs, ret_regs, .. } => {
                f(callee);
                for r in arg_regs.iter_mut() {
                    f(r);
                }
                for r in ret_regs.iter_mut() {
                    f(r);
                }
            }
            VCodeInst::MemGrow { delta, result, .. } => m!(delta, result),
            VCodeInst::SpillStore { src, .. } => m!(src),
            VCodeInst::SpillLoad { dst, .. } => m!(dst),
            VCodeInst::Copy { dst, src } => m!(dst, src),
        }
    }
}

/// VCode terminators (§3.2): `Branch`/`BranchCmp`/`BranchCmpImm`/
/// `BranchZero` are the fused compare+branch family §4.3 names; block
/// targets are indices into [`VCodeFunction::blocks`]. Block-parameter
/// passing is resolved before the terminator: the lowerer emits `Copy`
/// instructions into each target's shared parameter vregs at every edge,
/// so the terminator itself only ever names a target index.
#[derive(Clone, Debug)]
pub enum VCodeTerminator {
    Jump { target: usize },
    BranchCmp { rn: Reg, rm: Reg, cond: IntCC, then_block: usize, else_block: usize },
    BranchCmpImm { rn: Reg, imm: i64, cond: IntCC, then_block: usize, else_block: usize },
    /// CBZ/CBNZ fusion target.
    BranchZero { rn: Reg, branch_if_nonzero: bool, then_block: usize, else_block: usize },
    BrTable { index: Reg, targets: Vec<usize>, default: usize },
    Return { values: Vec<Reg> },
    Unreachable { code: TrapCode },
}

impl VCodeTerminator {
    pub fn successors(&self) -> smallvec::SmallVec<[usize; 2]> {
        use smallvec::smallvec;
        match self {
            VCodeTerminator::Jump { target } => smallvec![*target],
            VCodeTerminator::BranchCmp { then_block, else_block, .. }
            | VCodeTerminator::BranchCmpImm { then_block, else_block, .. }
            | VCodeTerminator::BranchZero { then_block, else_block, .. } => {
                smallvec![*then_block, *else_block]
            }
            VCodeTerminator::BrTable { targets, default, .. } => {
                let mut v: smallvec::SmallVec<[usize; 2]> = targets.iter().copied().collect();
                v.push(*default);
                v
            }
            VCodeTerminator::Return { .. } | VCodeTerminator::Unreachable { .. } => smallvec![],
        }
    }

    pub fn uses(&self) -> smallvec::SmallVec<[Reg; 4]> {
        use smallvec::smallvec;
        match self {
            VCodeTerminator::Jump { .. } | VCodeTerminator::Unreachable { .. } => smallvec![],
            VCodeTerminator::BranchCmp { rn, rm, .. } => smallvec![*rn, *rm],
            VCodeTerminator::BranchCmpImm { rn, .. } => smallvec![*rn],
            VCodeTerminator::BranchZero { rn, .. } => smallvec![*rn],
            VCodeTerminator::BrTable { index, .. } => smallvec![*index],
            VCodeTerminator::Return { values } => values.iter().copied().collect(),
        }
    }

    pub fn map_regs_mut(&mut self, mut f: impl FnMut(&mut Reg)) {
        match self {
            VCodeTerminator::Jump { .. } | VCodeTerminator::Unreachable { .. } => {}
            VCodeTerminator::BranchCmp { rn, rm, .. } => {
                f(rn);
                f(rm);
            }
            VCodeTerminator::BranchCmpImm { rn, .. } => f(rn),
            VCodeTerminator::BranchZero { rn, .. } => f(rn),
            VCodeTerminator::BrTable { index, .. } => f(index),
            VCodeTerminator::Return { values } => {
                for v in values.iter_mut() {
                    f(v);
                }
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VCodeBlock {
    pub insts: Vec<VCodeInst>,
    pub terminator: Option<VCodeTerminator>,
}

/// A whole function in VCode form (§3.2), plus the metadata the
/// allocator and emitter fill in as they run.
#[derive(Clone, Debug, Default)]
pub struct VCodeFunction {
    pub name: String,
    pub int_param_regs: Vec<Reg>,
    pub float_param_regs: Vec<Reg>,
    pub int_return_regs: Vec<Reg>,
    pub float_return_regs: Vec<Reg>,
    pub blocks: Vec<VCodeBlock>,
    pub entry: usize,
    pub next_vreg: u32,
    /// Filled in by the allocator (§4.4 output).
    pub spill_slot_count: u32,
    pub callee_saved_used: Vec<PReg>,
    pub needs_extra_results_buffer: bool,
    /// Per-function constant pool (§4.5): raw bit patterns for `f32`/`f64`
    /// literals materialized via `LoadConst`'s `pool_index` rather than a
    /// `MOVZ`/`MOVK` sequence.
    pub constants: Vec<u64>,
}

impl VCodeFunction {
    pub fn new_vreg(&mut self, class: RegClass) -> Reg {
        let v = VReg {
            index: self.next_vreg,
            class,
        };
        self.next_vreg += 1;
        Reg::V(v)
    }

    /// Interns `bits` into the constant pool, reusing an existing entry
    /// with the same bit pattern.
    pub fn push_constant(&mut self, bits: u64) -> u32 {
        if let Some(idx) = self.constants.iter().position(|&b| b == bits) {
            return idx as u32;
        }
        self.constants.push(bits);
        (self.constants.len() - 1) as u32
    }
}
