//! Bridges a host [`HostFunc`] closure into something that can sit in
//! `func_table`/`indirect_table` and be `BLR`'d with the native AArch64
//! calling convention generated code already uses for direct calls
//! (§4.6, "host call that updates the JIT context" is one instance of
//! this; imported functions are the general case).
//!
//! Each imported host function gets a tiny generated trampoline: spill
//! every argument register to a stack frame, call a fixed Rust dispatcher
//! with the import's index and the frame, then reload whatever result
//! registers the signature calls for. The dispatcher does the actual
//! marshalling into/out of [`Value`](wasmflow_environ::Value) and the
//! closure call.

use wasmflow_environ::{FuncIndex, FuncType, HostCallError, HostFunc, Value, ValueKind, ValType};

use crate::asmgen::{self, load_imm64};
use crate::memory::CodeMemory;

const MAX_INT_ARGS: usize = 8;
const MAX_FLOAT_ARGS: usize = 8;

/// The stack frame a generated trampoline spills registers into and the
/// dispatcher reads/writes. Fixed shape regardless of signature; unused
/// slots are simply ignored by the dispatcher.
#[repr(C)]
struct HostFrame {
    int_args: [u64; MAX_INT_ARGS],
    float_args: [f64; MAX_FLOAT_ARGS],
    int_results: [u64; 2],
    float_results: [f64; 2],
}

struct HostImport {
    index: FuncIndex,
    callback: HostFunc,
    signature: FuncType,
}

/// Owns the generated trampoline code and the closures it dispatches to;
/// must outlive the instance whose `func_table` points into it.
pub struct HostTrampolines {
    code: CodeMemory,
    imports: Vec<HostImport>,
}

impl HostTrampolines {
    pub fn new() -> Self {
        HostTrampolines {
            code: CodeMemory::new(4096).expect("host trampoline region"),
            imports: Vec::new(),
        }
    }

    /// Installs a trampoline for `callback` and returns the entry point to
    /// store in `func_table`.
    pub fn install(&mut self, index: FuncIndex, callback: HostFunc, signature: &FuncType) -> usize {
        let slot = self.imports.len() as u32;
        self.imports.push(HostImport {
            index,
            callback,
            signature: signature.clone(),
        });

        let imports_ptr = &self.imports as *const Vec<HostImport> as u64;
        let code = build_trampoline(slot, imports_ptr, dispatch as usize as u64, signature);
        let entry = self.code.write(&code);
        // Trampolines accumulate across imports; re-publish covers all of
        // them and is cheap relative to compiling the module itself.
        self.code.publish().expect("publish host trampolines");
        entry as usize
    }
}

/// Emits a trampoline for one signature. `slot` (the import's index into
/// `imports`) and `imports_ptr` (the `&Vec<HostImport>` address) are baked
/// in as immediates; `dispatch_addr` is the fixed dispatcher's address.
fn build_trampoline(slot: u32, imports_ptr: u64, dispatch_addr: u64, signature: &FuncType) -> Vec<u8> {
    let mut out: Vec<u32> = Vec::new();
    const HOST_FRAME_SIZE: u32 = std::mem::size_of::<HostFrame>() as u32;
    // This trampoline is itself `BLR`'d from generated code, so its own
    // return address is sitting in `x30` when it starts; the nested `BLR`
    // to `dispatch` overwrites `x30`, so it's spilled in the 16 bytes past
    // the `HostFrame` and reloaded before `RET`.
    const LR_SLOT: u32 = HOST_FRAME_SIZE;
    const FRAME_SIZE: u32 = HOST_FRAME_SIZE + 16;

    out.push(asmgen::sub_imm(31, 31, FRAME_SIZE));
    out.push(asmgen::str_imm(30, 31, LR_SLOT));

    let (int_params, float_params) = count_classes(&signature.params);
    for i in 0..int_params.min(MAX_INT_ARGS) {
        out.push(asmgen::str_imm(i as u32, 31, (i * 8) as u32));
    }
    for i in 0..float_params.min(MAX_FLOAT_ARGS) {
        out.push(asmgen::str_imm_simd(i as u32, 31, (MAX_INT_ARGS * 8 + i * 8) as u32));
    }

    out.extend(load_imm64(imports_ptr, 0));
    out.push(asmgen::movz(slot, 1, 0));
    out.push(asmgen::add_imm(2, 31, 0)); // mov x2, sp
    out.extend(load_imm64(dispatch_addr, 16));
    out.push(asmgen::blr(16));

    let (int_results, float_results) = count_classes(&signature.results);
    for i in 0..int_results.min(2) {
        out.push(asmgen::ldr_imm(i as u32, 31, (MAX_INT_ARGS * 8 + MAX_FLOAT_ARGS * 8 + i * 8) as u32));
    }
    for i in 0..float_results.min(2) {
        out.push(asmgen::ldr_imm_simd(
            i as u32,
            31,
            (MAX_INT_ARGS * 8 + MAX_FLOAT_ARGS * 8 + 2 * 8 + i * 8) as u32,
        ));
    }

    out.push(asmgen::ldr_imm(30, 31, LR_SLOT));
    out.push(asmgen::add_imm(31, 31, FRAME_SIZE));
    out.push(asmgen::RET);

    asmgen::words_to_bytes(&out)
}

fn count_classes(types: &[ValType]) -> (usize, usize) {
    let int = types.iter().filter(|t| !matches!(t, ValType::F32 | ValType::F64)).count();
    let float = types.iter().filter(|t| matches!(t, ValType::F32 | ValType::F64)).count();
    (int, float)
}

/// Called from generated trampoline code. Not exposed as a stable ABI
/// item, just a fixed jump target baked into trampolines at generation
/// time.
extern "C" fn dispatch(imports_ptr: *const Vec<HostImport>, slot: u32, frame: *mut HostFrame) {
    let imports = unsafe { &*imports_ptr };
    let import = &imports[slot as usize];
    let frame = unsafe { &mut *frame };

    let mut args = Vec::with_capacity(import.signature.params.len());
    let mut int_i = 0;
    let mut float_i = 0;
    for ty in &import.signature.params {
        let value = match ty {
            ValType::I32 => {
                let v = Value::I32(frame.int_args[int_i] as i32);
                int_i += 1;
                v
            }
            ValType::I64 => {
                let v = Value::I64(frame.int_args[int_i] as i64);
                int_i += 1;
                v
            }
            ValType::F32 => {
                let v = Value::F32(frame.float_args[float_i] as f32);
                float_i += 1;
                v
            }
            ValType::F64 => {
                let v = Value::F64(frame.float_args[float_i]);
                float_i += 1;
                v
            }
            _ => {
                let v = Value::I64(frame.int_args[int_i] as i64);
                int_i += 1;
                v
            }
        };
        args.push(value);
    }

    let results = match (import.callback)(&args) {
        Ok(results) => results,
        Err(HostCallError(msg)) => {
            log::error!("host call for import {:?} failed: {msg}", import.index);
            Vec::new()
        }
    };

    let mut int_i = 0;
    let mut float_i = 0;
    for value in &results {
        match value.kind() {
            ValueKind::I32 | ValueKind::I64 | ValueKind::FuncRef | ValueKind::ExternRef if int_i < 2 => {
                frame.int_results[int_i] = raw_int_bits(value);
                int_i += 1;
            }
            ValueKind::F32 | ValueKind::F64 if float_i < 2 => {
                frame.float_results[float_i] = raw_float_bits(value);
                float_i += 1;
            }
            _ => {}
        }
    }
}

fn raw_int_bits(v: &Value) -> u64 {
    match v {
        Value::I32(x) => *x as u32 as u64,
        Value::I64(x) => *x as u64,
        Value::FuncRef(x) | Value::ExternRef(x) => x.map(|i| i as u64).unwrap_or(u64::MAX),
        _ => 0,
    }
}

fn raw_float_bits(v: &Value) -> f64 {
    match v {
        Value::F32(x) => *x as f64,
        Value::F64(x) => *x,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampoline_for_i32_to_i32_encodes_a_handful_of_words() {
        let sig = FuncType {
            params: vec![ValType::I32],
            results: vec![ValType::I32],
        };
        let code = build_trampoline(0, 0x1000, 0x2000, &sig);
        assert!(code.len() % 4 == 0);
        assert!(code.len() / 4 >= 6);
    }
}
