//! Data model for the collaborator boundary described in spec §6.1.
//!
//! This crate does not parse or validate `.wasm`/`.wat` text — that remains
//! the job of an external parser/validator collaborator. It defines the
//! shapes that collaborator hands to the JIT core: a [`Module`] describing
//! types, imports, functions, tables, memories, globals, exports and
//! segments, plus the [`LinkerView`] contract used to resolve imports.

mod linker;
mod module;
mod value;

pub use linker::{HostFunc, ImportResolution, LinkError, LinkerView};
pub use module::{
    DataSegment, DefinedFuncIndex, ElementSegment, Export, ExportKind, FuncIndex, FuncType,
    FunctionBody, GlobalIndex, GlobalType, Import, ImportKind, MemoryIndex, MemoryType, Module,
    TableIndex, TableType, TypeIndex,
};
pub use value::{Value, ValueKind};

pub use wasmparser::ValType;
