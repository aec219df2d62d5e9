use cranelift_entity::{entity_impl, PrimaryMap};
use wasmparser::ValType;

/// Index of a function type in [`Module::types`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TypeIndex(u32);
entity_impl!(TypeIndex);

/// Index of a function, spanning both imported and module-defined functions,
/// in a single contiguous space (imports first), matching how
/// `wasmtime-environ` numbers functions.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FuncIndex(u32);
entity_impl!(FuncIndex);

/// Index of a function that has a body in this module (i.e. excluding
/// imports), used to key [`Module::function_bodies`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct DefinedFuncIndex(u32);
entity_impl!(DefinedFuncIndex);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TableIndex(u32);
entity_impl!(TableIndex);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MemoryIndex(u32);
entity_impl!(MemoryIndex);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct GlobalIndex(u32);
entity_impl!(GlobalIndex);

/// A function signature: parameter and result value types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableType {
    pub element: ValType,
    pub minimum: u32,
    pub maximum: Option<u32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryType {
    pub minimum: u32,
    pub maximum: Option<u32>,
    pub shared: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValType,
    pub mutable: bool,
}

#[derive(Clone, Debug)]
pub enum ImportKind {
    Function(TypeIndex),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Clone, Debug)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExportKind {
    Function(FuncIndex),
    Table(TableIndex),
    Memory(MemoryIndex),
    Global(GlobalIndex),
}

#[derive(Clone, Debug)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
}

#[derive(Clone, Debug)]
pub struct ElementSegment {
    pub table_index: TableIndex,
    /// Constant-offset-expression result; `None` for a passive/declared
    /// segment used only by `table.init`.
    pub offset: Option<u32>,
    pub elements: Vec<FuncIndex>,
}

#[derive(Clone, Debug)]
pub struct DataSegment {
    pub memory_index: MemoryIndex,
    /// Constant-offset-expression result; `None` for a passive segment used
    /// only by `memory.init`.
    pub offset: Option<u32>,
    pub data: Vec<u8>,
}

/// A Wasm-validated function body, retained as raw code-section bytes plus
/// the module-relative byte offset the section started at (used to resolve
/// trap PCs back to wasm offsets, per spec §6.3's PC map).
///
/// The operator stream is read lazily by the translator via
/// [`wasmparser::FunctionBody`] — this crate stores bytes rather than parsed
/// operators so it never borrows from (or outlives) the original module
/// bytes the parser collaborator handed us.
#[derive(Clone, Debug)]
pub struct FunctionBody {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

impl FunctionBody {
    /// Borrow this body as a `wasmparser::FunctionBody` for reading locals
    /// and operators, as `cranelift-wasm`'s `FuncTranslator` does.
    pub fn reader(&self) -> wasmparser::FunctionBody<'_> {
        wasmparser::FunctionBody::new(self.offset, &self.bytes)
    }
}

/// The validated-module record the IR translator (§4.1) consumes and the
/// linker (§4.6) reads imports/exports from. Produced by an external
/// parser+validator collaborator; this crate only defines its shape.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub types: PrimaryMap<TypeIndex, FuncType>,
    pub imports: Vec<Import>,
    /// Signature of every function, imported and defined, indexed uniformly
    /// by [`FuncIndex`].
    pub function_types: PrimaryMap<FuncIndex, TypeIndex>,
    /// Bodies of module-defined functions only, indexed by
    /// [`DefinedFuncIndex`]; `func_index(i) = imports.len() as u32 + i`.
    pub function_bodies: PrimaryMap<DefinedFuncIndex, FunctionBody>,
    pub tables: PrimaryMap<TableIndex, TableType>,
    pub memories: PrimaryMap<MemoryIndex, MemoryType>,
    pub globals: PrimaryMap<GlobalIndex, GlobalType>,
    pub exports: Vec<Export>,
    pub element_segments: Vec<ElementSegment>,
    pub data_segments: Vec<DataSegment>,
    pub start: Option<FuncIndex>,
    pub num_imported_functions: u32,
}

impl Module {
    pub fn defined_func_index(&self, index: FuncIndex) -> Option<DefinedFuncIndex> {
        let raw = index.as_u32();
        if raw < self.num_imported_functions {
            None
        } else {
            Some(DefinedFuncIndex::from_u32(raw - self.num_imported_functions))
        }
    }

    pub fn func_index(&self, defined: DefinedFuncIndex) -> FuncIndex {
        FuncIndex::from_u32(self.num_imported_functions + defined.as_u32())
    }

    pub fn is_imported_function(&self, index: FuncIndex) -> bool {
        index.as_u32() < self.num_imported_functions
    }

    pub fn signature(&self, index: FuncIndex) -> &FuncType {
        &self.types[self.function_types[index]]
    }
}
