use crate::module::{FuncIndex, Module};
use crate::value::Value;
use std::sync::Arc;

/// A host callback backing an imported function, per spec §6.1: "a host
/// callback of signature `fn(args: &[Value]) -> Vec<Value>`".
pub type HostFunc = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, HostCallError> + Send + Sync>;

/// What an import resolves to: either another module's already-compiled
/// function (a raw JIT entry pointer, populated into `func_table` /
/// `indirect_table` per §3.4) or a host callback.
#[derive(Clone)]
pub enum ImportResolution {
    /// A pointer to another JIT-compiled function's entry point, and the
    /// raw function pointer's signature-matching type tag used for
    /// `call_indirect` checks (§4.6).
    JitFunction { entry: usize, type_tag: u64 },
    Host(HostFunc),
}

impl std::fmt::Debug for ImportResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportResolution::JitFunction { entry, type_tag } => f
                .debug_struct("JitFunction")
                .field("entry", entry)
                .field("type_tag", type_tag)
                .finish(),
            ImportResolution::Host(_) => f.debug_tuple("Host").field(&"<callback>").finish(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("import `{module}::{field}` was not provided by the linker")]
    ImportMissing { module: String, field: String },
    #[error("import `{module}::{field}` expected a {expected} but got a {found}")]
    ImportKindMismatch {
        module: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("import `{module}::{field}` has type {expected:?} but the provided value has type {found:?}")]
    ImportTypeMismatch {
        module: String,
        field: String,
        expected: String,
        found: String,
    },
}

#[derive(thiserror::Error, Debug)]
#[error("host function call failed: {0}")]
pub struct HostCallError(pub String);

/// The linker's view into an embedding: resolves every import of a
/// [`Module`] before the JIT context (§3.4) can be populated.
///
/// A concrete embedder implements this by looking imports up by
/// `(module, field)` name in whatever instance registry it maintains; the
/// core only needs the resolution results to fill `func_table` /
/// `indirect_table`.
pub trait LinkerView {
    fn resolve_import(
        &self,
        module: &Module,
        index: FuncIndex,
    ) -> Result<ImportResolution, LinkError>;
}
