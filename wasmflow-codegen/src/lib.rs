//! IR construction, optimization, AArch64 lowering, register allocation and
//! machine-code emission — the compiler core.

pub mod ir;
pub mod isa;
pub mod opt;
pub mod result;
pub mod translate;

pub use result::{CompileError, CompileResult, EmitError};
pub use translate::{translate_function, StandaloneEnvironment, TranslationEnvironment};
pub use isa::aarch64::disassemble;

/// Optimization level requested by the embedder (§4.2).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum OptLevel {
    None,
    #[default]
    Speed,
}

/// Compile one module-defined function end to end: translate, optimize,
/// lower, allocate registers, emit.
pub fn compile_function(
    env: &dyn TranslationEnvironment,
    defined_index: wasmflow_environ::DefinedFuncIndex,
    opt_level: OptLevel,
) -> CompileResult<isa::aarch64::emit::EmittedFunction> {
    let func = translate_function(env, defined_index)?;
    let func = opt::optimize(func, opt_level);
    let vcode = isa::aarch64::lower::lower(&func)?;
    let vcode = isa::aarch64::regalloc::allocate(vcode)?;
    let emitted = isa::aarch64::emit::emit(&vcode)?;
    Ok(emitted)
}
