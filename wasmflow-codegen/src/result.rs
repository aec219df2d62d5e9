use crate::ir::Opcode;

/// Errors raised while converting a validated Wasm function body into IR
/// (§4.1, §7).
#[derive(thiserror::Error, Debug)]
pub enum TranslationError {
    #[error("unsupported construct while translating to IR: {0}")]
    Unsupported(String),
    #[error("malformed function body at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },
}

/// The top-level compile-time error taxonomy (§7). `UnsupportedIROp` is the
/// only variant recovered locally (by falling back to an interpreter for
/// the affected function, outside the core); every other variant aborts
/// compilation of the function and is surfaced to the caller.
#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("lowerer has no VCode pattern for IR opcode {0:?}")]
    UnsupportedIROp(Opcode),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("internal compiler invariant violated: {0}")]
    InternalError(String),
}

/// Errors from the AArch64 emitter (§4.5). `BranchOutOfRange` triggers a
/// layout re-pass with veneers at the call site rather than aborting.
#[derive(thiserror::Error, Debug)]
pub enum EmitError {
    #[error("immediate {0} does not fit the target encoding")]
    UnencodableImm(i64),
    #[error("branch from offset {from} to offset {to} exceeds the encodable range")]
    BranchOutOfRange { from: u32, to: u32 },
}

pub type CompileResult<T> = Result<T, CompileError>;
