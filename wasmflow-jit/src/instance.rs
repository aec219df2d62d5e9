//! Ties the compiler (`wasmflow-codegen`), the module data model
//! (`wasmflow-environ`) and this crate's runtime pieces (executable memory,
//! the [`JITContext`] header, traps, the linker) into one instantiated,
//! callable module (§3.5, §4.6).

use std::sync::Arc;

use wasmflow_environ::{
    DefinedFuncIndex, FuncIndex, FuncType, GlobalIndex, LinkerView, Module, TranslationEnvironment,
    Value, ValueKind,
};
use wasmflow_codegen::isa::aarch64::emit::EmittedFunction;
use wasmflow_codegen::ir::TrapCode;
use wasmflow_codegen::{compile_function, OptLevel};

use crate::asmgen;
use crate::config::{CompileStats, RuntimeConfig};
use crate::context::{IndirectEntry, JITContext};
use crate::host::HostTrampolines;
use crate::linker::{self, LinkResult};
use crate::memory::{CodeMemory, LinearMemory};
use crate::trap::{self, TrapReport};

#[derive(thiserror::Error, Debug)]
pub enum InstantiationError {
    #[error(transparent)]
    Compile(#[from] wasmflow_codegen::CompileError),
    #[error(transparent)]
    Link(#[from] wasmflow_environ::LinkError),
    #[error("executable memory allocation failed: {0}")]
    Memory(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum CallError {
    #[error("no export named `{0}`")]
    ExportNotFound(String),
    #[error("export `{0}` is not a function")]
    NotAFunction(String),
    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("trap: {0}")]
    Trap(#[from] TrapReport),
}

struct CompiledFunc {
    entry: *const u8,
    trap_sites: Vec<(u32, TrapCode)>,
}

/// One instantiated module: owns its compiled code, linear memories,
/// globals, and the [`JITContext`] header the code reads.
pub struct Instance {
    module: Arc<Module>,
    code: CodeMemory,
    functions: Vec<CompiledFunc>,
    memories: Vec<LinearMemory>,
    globals: Box<[u64]>,
    ctx: Box<JITContext>,
    // Kept alive for as long as the instance: `ctx` points into these.
    _func_table: Box<[usize]>,
    _indirect_tables: Vec<Box<[IndirectEntry]>>,
    _indirect_table_ptrs: Box<[*mut IndirectEntry]>,
    _host_trampolines: HostTrampolines,
    // One fixed-shape trampoline serves every call regardless of
    // signature (it always spills all 8 int + 8 float argument/result
    // slots); built once, never rewritten.
    _call_trampoline_code: CodeMemory,
    call_trampoline_entry: usize,
}

struct InstanceEnvironment<'a> {
    module: &'a Module,
    global_addresses: &'a [u64],
}

impl<'a> TranslationEnvironment for InstanceEnvironment<'a> {
    fn module(&self) -> &Module {
        self.module
    }

    fn global_address(&self, index: GlobalIndex) -> u64 {
        self.global_addresses[index.as_u32() as usize]
    }
}

impl Instance {
    /// Compiles every defined function, links imports against `linker_view`,
    /// allocates memories/globals, and wires up a [`JITContext`]. Does not
    /// run the module's start function; call [`Instance::run_start`]
    /// afterward if `module.start` is set.
    pub fn instantiate(
        module: Arc<Module>,
        linker_view: &dyn LinkerView,
        config: &RuntimeConfig,
    ) -> Result<(Box<Self>, Vec<CompileStats>), InstantiationError> {
        let globals = vec![0u64; module.globals.len()].into_boxed_slice();

        let env = InstanceEnvironment {
            module: &module,
            global_addresses: &globals,
        };

        let code_size_estimate = (module.function_bodies.len() + 1) * 4096;
        let mut code = CodeMemory::new(code_size_estimate.max(4096))?;
        let mut functions = Vec::with_capacity(module.function_bodies.len());
        let mut entries = Vec::with_capacity(module.function_bodies.len());
        let mut stats = Vec::new();

        for (defined_index, _) in module.function_bodies.iter() {
            let emitted: EmittedFunction = compile_function(&env, defined_index, OptLevel::Speed)?;
            let entry = code.write(&emitted.code);
            entries.push(entry as usize);
            functions.push(CompiledFunc {
                entry,
                trap_sites: emitted.trap_sites,
            });
            if config.perf_metrics {
                stats.push(CompileStats {
                    func_index: module.func_index(defined_index).as_u32(),
                    code_bytes: emitted.code.len(),
                    ..Default::default()
                });
            }
        }
        code.publish()?;

        let link_result: LinkResult = linker::link(&module, linker_view, &entries)?;
        config.report_stats(&stats).ok();

        let memories = module
            .memories
            .values()
            .map(|mt| LinearMemory::new(mt.minimum, mt.maximum))
            .collect::<Vec<_>>();

        let mut call_trampoline_code = CodeMemory::new(64)?;
        let call_trampoline_entry = call_trampoline_code.write(&build_call_trampoline()) as usize;
        call_trampoline_code.publish()?;

        // Boxed immediately: `ctx.host_data` below takes this struct's
        // address, which must never move again.
        let mut instance = Box::new(Instance {
            module,
            code,
            functions,
            memories,
            globals,
            ctx: dummy_context(),
            _func_table: Box::new([]),
            _indirect_tables: Vec::new(),
            _indirect_table_ptrs: Box::new([]),
            _host_trampolines: link_result.host_trampolines,
            _call_trampoline_code: call_trampoline_code,
            call_trampoline_entry,
        });

        let func_table: Box<[usize]> = link_result.func_table.into_boxed_slice();
        let mut indirect_tables: Vec<Box<[IndirectEntry]>> = link_result
            .indirect_tables
            .into_iter()
            .map(|t| t.into_boxed_slice())
            .collect();
        let indirect_table_ptrs: Box<[*mut IndirectEntry]> =
            indirect_tables.iter_mut().map(|t| t.as_mut_ptr()).collect();

        let (memory_base, memory_size) = instance
            .memories
            .first_mut()
            .map(|m| (m.base_ptr(), m.size_bytes()))
            .unwrap_or((std::ptr::null_mut(), 0));

        let host_data = instance.as_mut() as *mut Instance as *mut std::ffi::c_void;
        let ctx = JITContext::new(
            func_table.as_ptr() as *mut usize,
            indirect_table_ptrs.to_vec(),
            memory_base,
            memory_size,
            memory_grow_trampoline,
            host_data,
        );

        instance.ctx = ctx;
        instance._func_table = func_table;
        instance._indirect_tables = indirect_tables;
        instance._indirect_table_ptrs = indirect_table_ptrs;

        Ok((instance, stats))
    }

    pub fn run_start(&mut self) -> Result<(), CallError> {
        let Some(start) = self.module.start else {
            return Ok(());
        };
        let defined = self.module.defined_func_index(start).expect("start is defined");
        let sig = self.module.signature(start).clone();
        self.call_defined(defined, &sig, &[])?;
        Ok(())
    }

    pub fn call_export(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, CallError> {
        let export = self
            .module
            .exports
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| CallError::ExportNotFound(name.to_string()))?;
        let wasmflow_environ::ExportKind::Function(func_index) = export.kind else {
            return Err(CallError::NotAFunction(name.to_string()));
        };
        let defined = self
            .module
            .defined_func_index(func_index)
            .expect("exported function is defined locally");
        let sig = self.module.signature(func_index).clone();
        self.call_defined(defined, &sig, args)
    }

    fn call_defined(
        &mut self,
        defined: DefinedFuncIndex,
        sig: &FuncType,
        args: &[Value],
    ) -> Result<Vec<Value>, CallError> {
        if args.len() != sig.params.len() {
            return Err(CallError::ArityMismatch {
                expected: sig.params.len(),
                got: args.len(),
            });
        }
        let entry = self.functions[defined.as_u32() as usize].entry as usize;
        let trampoline = self.call_trampoline_entry;
        let ctx = self.ctx.as_ref() as *const JITContext as usize;
        let result = trap::catch_traps(|| unsafe { call_raw(trampoline, entry, ctx, sig, args) });
        result.map_err(CallError::from)
    }

    /// Finds which compiled function (if any) a trapping PC belongs to, and
    /// its trap kind, for building a richer [`TrapReport`].
    pub fn locate_trap(&self, pc: usize) -> Option<(FuncIndex, TrapCode)> {
        for (i, f) in self.functions.iter().enumerate() {
            let start = f.entry as usize;
            for &(offset, code) in &f.trap_sites {
                if start + offset as usize == pc {
                    let defined = DefinedFuncIndex::from_u32(i as u32);
                    return Some((self.module.func_index(defined), code));
                }
            }
        }
        None
    }
}

fn dummy_context() -> Box<JITContext> {
    JITContext::new(
        std::ptr::null_mut(),
        Vec::new(),
        std::ptr::null_mut(),
        0,
        memory_grow_trampoline,
        std::ptr::null_mut(),
    )
}

/// Marshals `args` into registers, `BLR`s `entry`, and marshals the result
/// registers back into `Value`s, via a tiny generated trampoline (the
/// mirror image of [`crate::host`]'s import trampolines). Also loads `ctx`
/// into `X19` (`CTX_PTR`): every function's prologue reloads its cache
/// registers from `[X19, #offset]`, so whatever makes the first call into
/// JIT code is responsible for seeding it; nested wasm-to-wasm calls then
/// rely on `X19` being callee-saved.
unsafe fn call_raw(trampoline: usize, entry: usize, ctx: usize, sig: &FuncType, args: &[Value]) -> Vec<Value> {
    #[repr(C)]
    struct CallFrame {
        int_args: [u64; 8],
        float_args: [f64; 8],
        int_results: [u64; 2],
        float_results: [f64; 2],
    }

    let mut frame = CallFrame {
        int_args: [0; 8],
        float_args: [0.0; 8],
        int_results: [0; 2],
        float_results: [0.0; 2],
    };

    let mut int_i = 0;
    let mut float_i = 0;
    for arg in args {
        match arg.kind() {
            ValueKind::F32 | ValueKind::F64 => {
                frame.float_args[float_i] = match arg {
                    Value::F32(x) => *x as f64,
                    Value::F64(x) => *x,
                    _ => unreachable!(),
                };
                float_i += 1;
            }
            _ => {
                frame.int_args[int_i] = match arg {
                    Value::I32(x) => *x as u32 as u64,
                    Value::I64(x) => *x as u64,
                    Value::FuncRef(x) | Value::ExternRef(x) => x.map(|v| v as u64).unwrap_or(u64::MAX),
                    _ => unreachable!(),
                };
                int_i += 1;
            }
        }
    }

    let trampoline: extern "C" fn(usize, *mut CallFrame, usize) = std::mem::transmute(trampoline);
    trampoline(entry, &mut frame, ctx);

    let mut int_i = 0;
    let mut float_i = 0;
    sig.results
        .iter()
        .map(|ty| match ty {
            wasmflow_environ::ValType::F32 => {
                let v = Value::F32(frame.float_results[float_i] as f32);
                float_i += 1;
                v
            }
            wasmflow_environ::ValType::F64 => {
                let v = Value::F64(frame.float_results[float_i]);
                float_i += 1;
                v
            }
            wasmflow_environ::ValType::I64 => {
                let v = Value::I64(frame.int_results[int_i] as i64);
                int_i += 1;
                v
            }
            _ => {
                let v = Value::I32(frame.int_results[int_i] as i32);
                int_i += 1;
                v
            }
        })
        .collect()
}

/// `entry` arrives in `x0`, the frame pointer in `x1`, the `JITContext`
/// pointer in `x2`; all three are moved into `x16`/`x17`/`x19`
/// (`x16`/`x17` are intra-procedure-call scratch with no save obligation;
/// `x19` is `CTX_PTR`, read by every function's prologue) before loading
/// real argument registers, since a multi-argument signature would
/// otherwise overwrite `x1`/`x2` before they're read.
///
/// `x19` and `x30` are callee-saved under AAPCS64, and this trampoline is
/// itself called as an ordinary `extern "C" fn` from Rust: `x19` is spilled
/// and restored around the `BLR` so the caller's value survives, and `x30`
/// (the trampoline's own return address) has to be saved too since the
/// nested `BLR` overwrites it. `x17` (the frame pointer, needed again after
/// the call to store results) is spilled alongside them rather than kept in
/// a register: `x16`/`x17` are intra-procedure-call scratch, not callee-saved,
/// so `entry` is free to clobber them.
fn build_call_trampoline() -> Vec<u8> {
    const INT_ARGS_OFFSET: u32 = 0;
    const FLOAT_ARGS_OFFSET: u32 = 8 * 8;
    const INT_RESULTS_OFFSET: u32 = FLOAT_ARGS_OFFSET + 8 * 8;
    const FLOAT_RESULTS_OFFSET: u32 = INT_RESULTS_OFFSET + 2 * 8;

    let mut out = Vec::new();
    out.push(asmgen::sub_imm(31, 31, 32));
    out.push(asmgen::stp(19, 30, 31, 0));
    out.push(asmgen::mov_reg(16, 0));
    out.push(asmgen::mov_reg(17, 1));
    out.push(asmgen::mov_reg(19, 2));
    out.push(asmgen::str_imm(17, 31, 16));
    for i in 0..8u32 {
        out.push(asmgen::ldr_imm(i, 17, INT_ARGS_OFFSET + i * 8));
    }
    for i in 0..8u32 {
        out.push(asmgen::ldr_imm_simd(i, 17, FLOAT_ARGS_OFFSET + i * 8));
    }
    out.push(asmgen::blr(16));
    out.push(asmgen::ldr_imm(17, 31, 16));
    for i in 0..2u32 {
        out.push(asmgen::str_imm(i, 17, INT_RESULTS_OFFSET + i * 8));
    }
    for i in 0..2u32 {
        out.push(asmgen::str_imm_simd(i, 17, FLOAT_RESULTS_OFFSET + i * 8));
    }
    out.push(asmgen::ldp(19, 30, 31, 0));
    out.push(asmgen::add_imm(31, 31, 32));
    out.push(asmgen::RET);
    asmgen::words_to_bytes(&out)
}

extern "C" fn memory_grow_trampoline(ctx: *mut JITContext, delta: u32, mem_index: u32) -> i32 {
    unsafe {
        let instance = &mut *((*ctx).host_data as *mut Instance);
        let Some(mem) = instance.memories.get_mut(mem_index as usize) else {
            return -1;
        };
        match mem.grow(delta) {
            Some(previous) => {
                (*ctx).memory_base = mem.base_ptr();
                (*ctx).memory_size = mem.size_bytes();
                previous as i32
            }
            None => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_trampoline_is_word_aligned() {
        let code = build_call_trampoline();
        assert_eq!(code.len() % 4, 0);
        assert!(code.len() / 4 >= 19);
    }
}
