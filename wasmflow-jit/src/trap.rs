//! Trap delivery (§4.6). Generated code signals a trap either by executing
//! `BRK #imm` (decoded back into a [`TrapCode`] via the immediate) or by
//! faulting on an out-of-bounds memory access (`SIGSEGV`/`SIGBUS`). A
//! process-wide handler captures register state at the fault and
//! `siglongjmp`s back to the nearest entry trampoline, which set up its
//! `sigjmp_buf` with `sigsetjmp` before calling into JIT code.
//!
//! There is exactly one handler, installed once for the life of the
//! process, and exactly one "nearest trampoline" at a time per thread:
//! nested calls into JIT code save and restore the previous jump buffer
//! so a trap inside a host callback that itself called back into Wasm
//! unwinds to the right frame.

use std::cell::RefCell;
use std::mem::MaybeUninit;
use std::os::raw::c_int;
use std::sync::Once;

use wasmflow_codegen::ir::TrapCode;

#[repr(C, align(16))]
struct SigJmpBuf([u8; 512]);

extern "C" {
    #[link_name = "sigsetjmp"]
    fn sigsetjmp_raw(env: *mut SigJmpBuf, savesigs: c_int) -> c_int;
    #[link_name = "siglongjmp"]
    fn siglongjmp_raw(env: *mut SigJmpBuf, val: c_int) -> !;
}

/// One frame of register state captured at the point of a trap. Nested
/// host callbacks that re-enter JIT code push one of these per level; the
/// outermost report is what surfaces to the caller of [`catch_traps`].
#[derive(Debug, Clone)]
pub struct TrapReport {
    pub trap_kind: TrapKind,
    pub message: String,
    pub signal: i32,
    pub pc: usize,
    pub lr: usize,
    pub fp: usize,
    pub fault_addr: usize,
    pub brk_imm: Option<u16>,
    pub wasm_func_idx: Option<u32>,
    pub wasm_func_name: Option<String>,
    pub wasm_offset: Option<u32>,
    pub frames: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Wasm(TrapCode),
    MemoryFault,
    Unknown,
}

impl std::fmt::Display for TrapReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TrapReport {}

struct TrampolineState {
    buf: SigJmpBuf,
    report: Option<RawTrap>,
}

#[derive(Clone, Copy)]
struct RawTrap {
    signal: i32,
    pc: usize,
    lr: usize,
    fp: usize,
    fault_addr: usize,
}

thread_local! {
    static CURRENT: RefCell<Vec<*mut TrampolineState>> = RefCell::new(Vec::new());
}

static INSTALL: Once = Once::new();

/// Installs the process-wide `SIGTRAP`/`SIGSEGV`/`SIGBUS` handler. Safe to
/// call repeatedly; only the first call has any effect.
pub fn install_handler() {
    INSTALL.call_once(|| unsafe {
        install_one(libc::SIGTRAP);
        install_one(libc::SIGSEGV);
        install_one(libc::SIGBUS);
    });
}

unsafe fn install_one(signum: c_int) {
    let mut sa: libc::sigaction = std::mem::zeroed();
    sa.sa_sigaction = handle_signal as usize;
    sa.sa_flags = libc::SA_SIGINFO | libc::SA_NODEFER;
    libc::sigemptyset(&mut sa.sa_mask);
    let mut old: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();
    if libc::sigaction(signum, &sa, old.as_mut_ptr()) != 0 {
        panic!("sigaction({signum}) failed: {}", std::io::Error::last_os_error());
    }
}

/// Calls `f` with the nearest-trampoline jump buffer installed, returning
/// `Ok` on normal completion or `Err(TrapReport)` if generated code (or a
/// fault) longjmp'd out of it.
pub fn catch_traps<F: FnOnce() -> R, R>(f: F) -> Result<R, TrapReport> {
    install_handler();

    let mut state = TrampolineState {
        buf: SigJmpBuf([0u8; 512]),
        report: None,
    };
    let state_ptr: *mut TrampolineState = &mut state;

    CURRENT.with(|c| c.borrow_mut().push(state_ptr));
    let jumped = unsafe { sigsetjmp_raw(&mut state.buf, 1) };

    let result = if jumped == 0 {
        Some(f())
    } else {
        None
    };

    CURRENT.with(|c| {
        c.borrow_mut().pop();
    });

    match result {
        Some(r) => Ok(r),
        None => {
            let raw = state.report.expect("siglongjmp without a recorded trap");
            Err(build_report(raw))
        }
    }
}

fn build_report(raw: RawTrap) -> TrapReport {
    let (trap_kind, brk_imm) = if raw.signal == libc::SIGTRAP {
        match decode_brk_imm(raw.pc) {
            Some(imm) => (
                TrapCode::from_brk_imm(imm)
                    .map(TrapKind::Wasm)
                    .unwrap_or(TrapKind::Unknown),
                Some(imm),
            ),
            None => (TrapKind::Unknown, None),
        }
    } else {
        (TrapKind::MemoryFault, None)
    };

    let message = match trap_kind {
        TrapKind::Wasm(code) => format!("wasm trap: {code}"),
        TrapKind::MemoryFault => format!("memory fault at {:#x}", raw.fault_addr),
        TrapKind::Unknown => "trap in JIT code".to_string(),
    };

    TrapReport {
        trap_kind,
        message,
        signal: raw.signal,
        pc: raw.pc,
        lr: raw.lr,
        fp: raw.fp,
        fault_addr: raw.fault_addr,
        brk_imm,
        wasm_func_idx: None,
        wasm_func_name: None,
        wasm_offset: None,
        frames: unwind_frame_pointers(raw.fp),
    }
}

/// `BRK #imm` is `1101 0100 001 imm16 00000` (bits [31:21] = 0b11010100001,
/// imm16 at [20:5]). Linux doesn't surface the immediate in `siginfo_t` for
/// `SIGTRAP`, so it's recovered from the faulting instruction word itself.
fn decode_brk_imm(pc: usize) -> Option<u16> {
    if pc == 0 || pc % 4 != 0 {
        return None;
    }
    let word = unsafe { std::ptr::read((pc as *const u32).as_ref()?) };
    if (word >> 21) & 0x7ff == 0b110_1010_0001 {
        Some(((word >> 5) & 0xffff) as u16)
    } else {
        None
    }
}

fn unwind_frame_pointers(mut fp: usize) -> Vec<usize> {
    let mut frames = Vec::new();
    for _ in 0..64 {
        if fp == 0 || fp % 16 != 0 {
            break;
        }
        let ret = unsafe {
            match ((fp + 8) as *const usize).as_ref() {
                Some(slot) => std::ptr::read(slot),
                None => break,
            }
        };
        if ret == 0 {
            break;
        }
        frames.push(ret);
        let next_fp = unsafe {
            match (fp as *const usize).as_ref() {
                Some(slot) => std::ptr::read(slot),
                None => break,
            }
        };
        if next_fp <= fp {
            break;
        }
        fp = next_fp;
    }
    frames
}

extern "C" fn handle_signal(signum: c_int, _info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let top = CURRENT.with(|c| c.borrow().last().copied());
    let Some(state_ptr) = top else {
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
            libc::raise(signum);
        }
        return;
    };

    let raw = unsafe { capture(signum, ctx) };
    unsafe {
        (*state_ptr).report = Some(raw);
        siglongjmp_raw(&mut (*state_ptr).buf, 1);
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn capture(signum: c_int, ctx: *mut libc::c_void) -> RawTrap {
    let ucontext = ctx as *mut libc::ucontext_t;
    let mctx = &(*ucontext).uc_mcontext;
    RawTrap {
        signal: signum,
        pc: mctx.pc as usize,
        lr: mctx.regs[30] as usize,
        fp: mctx.regs[29] as usize,
        fault_addr: mctx.fault_address as usize,
    }
}

#[cfg(not(target_arch = "aarch64"))]
unsafe fn capture(signum: c_int, _ctx: *mut libc::c_void) -> RawTrap {
    RawTrap {
        signal: signum,
        pc: 0,
        lr: 0,
        fp: 0,
        fault_addr: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_traps_passes_through_normal_results() {
        let result = catch_traps(|| 1 + 1).unwrap();
        assert_eq!(result, 2);
    }

    #[test]
    fn decode_brk_imm_rejects_misaligned_pc() {
        assert_eq!(decode_brk_imm(1), None);
    }
}
