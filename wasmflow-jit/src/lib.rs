//! Runtime glue around the AArch64 JIT core (§3.4, §4.6): executable memory,
//! the [`JITContext`] header generated code reads, trap delivery, the
//! import/table linker, host-call trampolines, and [`Instance`], which ties
//! all of it to `wasmflow-codegen`'s `compile_function` and
//! `wasmflow-environ`'s [`Module`](wasmflow_environ::Module) data model.

pub mod asmgen;
pub mod cache;
pub mod config;
pub mod context;
pub mod host;
pub mod instance;
pub mod linker;
pub mod memory;
pub mod trap;

pub use cache::{CacheError, CachedFunction};
pub use config::{CompileStats, RuntimeConfig};
pub use context::{IndirectEntry, JITContext, MemoryGrowFn};
pub use host::HostTrampolines;
pub use instance::{CallError, Instance, InstantiationError};
pub use linker::LinkResult;
pub use memory::{CodeMemory, LinearMemory, WASM_PAGE_SIZE};
pub use trap::{TrapKind, TrapReport};
