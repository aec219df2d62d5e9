//! The AArch64 machine environment (§3.3, §4.4 "machine environment";
//! §4.5 ABI table). Register roles are fixed for every JIT-compiled
//! function: the context pointer and three cache registers are reloaded
//! from [`wasmflow_jit`]'s `JITContext` in the prologue and never touched
//! by the allocator.

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RegClass {
    Int,
    Float,
}

/// A physical AArch64 register: class plus hardware encoding (0-31).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PReg {
    pub class: RegClass,
    pub hw_enc: u8,
}

impl PReg {
    pub const fn int(n: u8) -> PReg {
        PReg {
            class: RegClass::Int,
            hw_enc: n,
        }
    }

    pub const fn float(n: u8) -> PReg {
        PReg {
            class: RegClass::Float,
            hw_enc: n,
        }
    }
}

pub const CTX_PTR: PReg = PReg::int(19);
pub const FUNC_TABLE: PReg = PReg::int(20);
pub const MEMORY_BASE: PReg = PReg::int(21);
pub const MEMORY_SIZE: PReg = PReg::int(22);
pub const EXTRA_RESULTS: PReg = PReg::int(23);
pub const INDIRECT_TABLE: PReg = PReg::int(24);
pub const SCRATCH0: PReg = PReg::int(16);
pub const SCRATCH1: PReg = PReg::int(17);
pub const FP: PReg = PReg::int(29);
pub const LR: PReg = PReg::int(30);
pub const SP: PReg = PReg::int(31);

/// Registers the allocator may never hand out: reserved cache/context
/// registers, FP/LR/SP, and the emitter's own scratch pair.
pub const RESERVED_INT: [PReg; 9] = [
    CTX_PTR,
    FUNC_TABLE,
    MEMORY_BASE,
    MEMORY_SIZE,
    EXTRA_RESULTS,
    INDIRECT_TABLE,
    SCRATCH0,
    SCRATCH1,
    FP,
];

/// Caller-saved integer scratch registers, tried first (§4.4 "preferred
/// first").
pub fn int_preferred() -> &'static [PReg] {
    const REGS: [PReg; 8] = [
        PReg::int(0),
        PReg::int(1),
        PReg::int(2),
        PReg::int(3),
        PReg::int(4),
        PReg::int(5),
        PReg::int(6),
        PReg::int(7),
    ];
    &REGS
}

/// Callee-saved integer registers not already claimed by a cache role
/// (X25-X28; X19-X24 are reserved above).
pub fn int_non_preferred() -> &'static [PReg] {
    const REGS: [PReg; 4] = [PReg::int(25), PReg::int(26), PReg::int(27), PReg::int(28)];
    &REGS
}

/// Caller-saved float parameter/return/scratch registers.
pub fn float_preferred() -> &'static [PReg] {
    const REGS: [PReg; 8] = [
        PReg::float(0),
        PReg::float(1),
        PReg::float(2),
        PReg::float(3),
        PReg::float(4),
        PReg::float(5),
        PReg::float(6),
        PReg::float(7),
    ];
    &REGS
}

/// Callee-saved float registers (D8-D15).
pub fn float_non_preferred() -> &'static [PReg] {
    const REGS: [PReg; 8] = [
        PReg::float(8),
        PReg::float(9),
        PReg::float(10),
        PReg::float(11),
        PReg::float(12),
        PReg::float(13),
        PReg::float(14),
        PReg::float(15),
    ];
    &REGS
}

pub fn is_callee_saved(p: PReg) -> bool {
    match p.class {
        RegClass::Int => {
            (19..=28).contains(&p.hw_enc) || p.hw_enc == FP.hw_enc || p.hw_enc == LR.hw_enc
        }
        RegClass::Float => (8..=15).contains(&p.hw_enc),
    }
}

/// Integer argument/return register for ABI position `i` (§4.5). `None`
/// once the 8-register window is exhausted (stack-passed).
pub fn int_arg_reg(i: usize) -> Option<PReg> {
    (i < 8).then(|| PReg::int(i as u8))
}

pub fn float_arg_reg(i: usize) -> Option<PReg> {
    (i < 8).then(|| PReg::float(i as u8))
}
