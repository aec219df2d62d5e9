//! The (and only) compilation target: AArch64 (§1, GLOSSARY).

pub mod disas;
pub mod emit;
pub mod lower;
pub mod regalloc;
pub mod regs;
pub mod vcode;

pub use disas::disassemble;
