//! Minimal AArch64 instruction-word encoders shared by the calling-convention
//! trampolines in [`crate::host`] (host function import) and
//! [`crate::instance`] (calling an export from Rust). Deliberately narrow:
//! just the handful of instructions a register-spill/reload trampoline
//! needs, not a general assembler.

pub fn movz(imm16: u32, rd: u32, hw: u32) -> u32 {
    0b110100101 << 23 | hw << 21 | (imm16 & 0xffff) << 5 | rd
}

pub fn movk(imm16: u32, rd: u32, hw: u32) -> u32 {
    0b111100101 << 23 | hw << 21 | (imm16 & 0xffff) << 5 | rd
}

/// Four-instruction sequence materializing a full 64-bit immediate into
/// `rd` via one `MOVZ` and three `MOVK`s.
pub fn load_imm64(imm: u64, rd: u32) -> [u32; 4] {
    [
        movz((imm & 0xffff) as u32, rd, 0),
        movk(((imm >> 16) & 0xffff) as u32, rd, 1),
        movk(((imm >> 32) & 0xffff) as u32, rd, 2),
        movk(((imm >> 48) & 0xffff) as u32, rd, 3),
    ]
}

pub fn add_imm(rd: u32, rn: u32, imm12: u32) -> u32 {
    0b100100010 << 23 | (imm12 & 0xfff) << 10 | rn << 5 | rd
}

pub fn sub_imm(rd: u32, rn: u32, imm12: u32) -> u32 {
    0b110100010 << 23 | (imm12 & 0xfff) << 10 | rn << 5 | rd
}

/// `STR Xt, [Xn, #offset]` (unsigned offset, scaled by 8).
pub fn str_imm(rt: u32, rn: u32, offset: u32) -> u32 {
    0b1111100100 << 22 | ((offset / 8) & 0xfff) << 10 | rn << 5 | rt
}

/// `LDR Xt, [Xn, #offset]` (unsigned offset, scaled by 8).
pub fn ldr_imm(rt: u32, rn: u32, offset: u32) -> u32 {
    0b1111100101 << 22 | ((offset / 8) & 0xfff) << 10 | rn << 5 | rt
}

/// `STR Dt, [Xn, #offset]` (unsigned offset, scaled by 8).
pub fn str_imm_simd(rt: u32, rn: u32, offset: u32) -> u32 {
    0b1111110100 << 22 | ((offset / 8) & 0xfff) << 10 | rn << 5 | rt
}

/// `LDR Dt, [Xn, #offset]` (unsigned offset, scaled by 8).
pub fn ldr_imm_simd(rt: u32, rn: u32, offset: u32) -> u32 {
    0b1111110101 << 22 | ((offset / 8) & 0xfff) << 10 | rn << 5 | rt
}

pub fn blr(rn: u32) -> u32 {
    0xD63F_0000 | (rn << 5)
}

/// `MOV Xd, Xm` (alias for `ORR Xd, XZR, Xm`).
pub fn mov_reg(rd: u32, rm: u32) -> u32 {
    0b10101010000 << 21 | rm << 16 | 31 << 5 | rd
}

/// `STP Xt, Xt2, [Xn, #imm]` (signed offset, scaled by 8).
pub fn stp(rt: u32, rt2: u32, rn: u32, imm: i32) -> u32 {
    0b1010100100 << 22 | ((imm as u32 / 8) & 0x7f) << 15 | rt2 << 10 | rn << 5 | rt
}

/// `LDP Xt, Xt2, [Xn, #imm]` (signed offset, scaled by 8).
pub fn ldp(rt: u32, rt2: u32, rn: u32, imm: i32) -> u32 {
    0b1010100101 << 22 | ((imm as u32 / 8) & 0x7f) << 15 | rt2 << 10 | rn << 5 | rt
}

pub const RET: u32 = 0xD65F_03C0;

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}
