/// Trap kinds, numbered to match the `BRK #imm` encoding the lowerer and
/// emitter use (§4.6) so the signal handler can recover the kind directly
/// from the faulting instruction's immediate.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum TrapCode {
    Unreachable = 0,
    MemoryOutOfBounds = 1,
    IntegerDivisionByZero = 2,
    IntegerOverflow = 3,
    InvalidConversion = 4,
    IndirectCallNull = 5,
    IndirectCallTypeMismatch = 6,
    TableOutOfBounds = 7,
    StackOverflow = 8,
}

impl TrapCode {
    pub fn brk_imm(self) -> u16 {
        self as u8 as u16
    }

    pub fn from_brk_imm(imm: u16) -> Option<TrapCode> {
        Some(match imm {
            0 => TrapCode::Unreachable,
            1 => TrapCode::MemoryOutOfBounds,
            2 => TrapCode::IntegerDivisionByZero,
            3 => TrapCode::IntegerOverflow,
            4 => TrapCode::InvalidConversion,
            5 => TrapCode::IndirectCallNull,
            6 => TrapCode::IndirectCallTypeMismatch,
            7 => TrapCode::TableOutOfBounds,
            8 => TrapCode::StackOverflow,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TrapCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrapCode::Unreachable => "unreachable",
            TrapCode::MemoryOutOfBounds => "memory out of bounds",
            TrapCode::IntegerDivisionByZero => "integer division by zero",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::InvalidConversion => "invalid conversion to integer",
            TrapCode::IndirectCallNull => "indirect call to null",
            TrapCode::IndirectCallTypeMismatch => "indirect call type mismatch",
            TrapCode::TableOutOfBounds => "table out of bounds",
            TrapCode::StackOverflow => "stack overflow",
        };
        f.write_str(s)
    }
}
