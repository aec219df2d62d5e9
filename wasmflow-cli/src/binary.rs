//! A minimal `.wasm` binary reader that builds a
//! [`wasmflow_environ::Module`] for this thin CLI to hand to the core.
//!
//! The real parser/validator is an external collaborator (spec.md §1); this
//! is not it. It understands just enough of the binary format — types,
//! imports, functions, tables, memories, globals with a constant
//! initializer, exports, active element segments — to drive `run` and
//! `explore` against everyday modules. Anything it can't make sense of is a
//! [`BinaryError`], not a panic.

use wasmflow_environ::{
    DataSegment, ElementSegment, Export, ExportKind, FuncIndex, FuncType, FunctionBody, GlobalType,
    Import, ImportKind, MemoryIndex, MemoryType, Module, TableIndex, TableType, TypeIndex,
};
use wasmparser::{CompositeInnerType, ExternalKind, Operator, Parser, Payload, TypeRef, ValType};

#[derive(thiserror::Error, Debug)]
pub enum BinaryError {
    #[error("malformed wasm binary: {0}")]
    Parse(#[from] wasmparser::BinaryReaderError),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
}

/// Parses `bytes` (or WAT text, via [`text_to_binary`]) into a [`Module`].
pub fn parse_module(bytes: &[u8]) -> Result<Module, BinaryError> {
    let mut module = Module::default();
    let mut num_imported_functions = 0u32;

    for payload in Parser::new(0).parse_all(bytes) {
        match payload? {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    for sub_type in rec_group?.types() {
                        match &sub_type.composite_type.inner {
                            CompositeInnerType::Func(ft) => {
                                module.types.push(FuncType {
                                    params: ft.params().to_vec(),
                                    results: ft.results().to_vec(),
                                });
                            }
                            other => {
                                return Err(BinaryError::Unsupported(format!(
                                    "non-function type {other:?}"
                                )))
                            }
                        }
                    }
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import?;
                    let kind = match import.ty {
                        TypeRef::Func(type_idx) => {
                            num_imported_functions += 1;
                            module
                                .function_types
                                .push(TypeIndex::from_u32(type_idx));
                            ImportKind::Function(TypeIndex::from_u32(type_idx))
                        }
                        TypeRef::Table(t) => ImportKind::Table(TableType {
                            element: ValType::Ref(t.element_type),
                            minimum: t.initial as u32,
                            maximum: t.maximum.map(|m| m as u32),
                        }),
                        TypeRef::Memory(m) => ImportKind::Memory(MemoryType {
                            minimum: m.initial as u32,
                            maximum: m.maximum.map(|x| x as u32),
                            shared: m.shared,
                        }),
                        TypeRef::Global(g) => ImportKind::Global(GlobalType {
                            value_type: g.content_type,
                            mutable: g.mutable,
                        }),
                        TypeRef::Tag(_) => {
                            return Err(BinaryError::Unsupported("tag imports".into()))
                        }
                    };
                    module.imports.push(Import {
                        module: import.module.to_string(),
                        field: import.name.to_string(),
                        kind,
                    });
                }
            }
            Payload::FunctionSection(reader) => {
                for type_idx in reader {
                    module.function_types.push(TypeIndex::from_u32(type_idx?));
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let table = table?;
                    module.tables.push(TableType {
                        element: ValType::Ref(table.ty.element_type),
                        minimum: table.ty.initial as u32,
                        maximum: table.ty.maximum.map(|m| m as u32),
                    });
                }
            }
            Payload::MemorySection(reader) => {
                for mem in reader {
                    let mem = mem?;
                    module.memories.push(MemoryType {
                        minimum: mem.initial as u32,
                        maximum: mem.maximum.map(|m| m as u32),
                        shared: mem.shared,
                    });
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global?;
                    module.globals.push(GlobalType {
                        value_type: global.ty.content_type,
                        mutable: global.ty.mutable,
                    });
                    // Constant initializer value is dropped here: this
                    // reader only records shape, not the initial bit
                    // pattern. `wasmflow-jit` zero-initializes globals;
                    // non-zero initializers are a known limitation of this
                    // CLI-only reader, not of the core.
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export?;
                    let kind = match export.kind {
                        ExternalKind::Func => ExportKind::Function(FuncIndex::from_u32(export.index)),
                        ExternalKind::Table => ExportKind::Table(TableIndex::from_u32(export.index)),
                        ExternalKind::Memory => ExportKind::Memory(MemoryIndex::from_u32(export.index)),
                        ExternalKind::Global => {
                            ExportKind::Global(wasmflow_environ::GlobalIndex::from_u32(export.index))
                        }
                        ExternalKind::Tag => {
                            return Err(BinaryError::Unsupported("tag exports".into()))
                        }
                    };
                    module.exports.push(Export {
                        name: export.name.to_string(),
                        kind,
                    });
                }
            }
            Payload::ElementSection(reader) => {
                for elem in reader {
                    let elem = elem?;
                    let wasmparser::ElementKind::Active { table_index, offset_expr } = elem.kind else {
                        continue; // passive/declared segments unused by `call_indirect` setup
                    };
                    let offset = eval_i32_const(&offset_expr)?;
                    let wasmparser::ElementItems::Functions(items) = elem.items else {
                        return Err(BinaryError::Unsupported("non-function element items".into()));
                    };
                    let elements = items
                        .into_iter()
                        .map(|i| i.map(FuncIndex::from_u32))
                        .collect::<Result<Vec<_>, _>>()?;
                    module.element_segments.push(ElementSegment {
                        table_index: TableIndex::from_u32(table_index.unwrap_or(0)),
                        offset: Some(offset as u32),
                        elements,
                    });
                }
            }
            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data?;
                    let wasmparser::DataKind::Active { memory_index, offset_expr } = data.kind else {
                        continue;
                    };
                    let offset = eval_i32_const(&offset_expr)?;
                    module.data_segments.push(DataSegment {
                        memory_index: MemoryIndex::from_u32(memory_index),
                        offset: Some(offset as u32),
                        data: data.data.to_vec(),
                    });
                }
            }
            Payload::StartSection { func, .. } => {
                module.start = Some(FuncIndex::from_u32(func));
            }
            Payload::CodeSectionEntry(body) => {
                let range = body.range();
                module.function_bodies.push(FunctionBody {
                    offset: range.start,
                    bytes: bytes[range].to_vec(),
                });
            }
            _ => {}
        }
    }

    module.num_imported_functions = num_imported_functions;
    Ok(module)
}

fn eval_i32_const(expr: &wasmparser::ConstExpr) -> Result<i32, BinaryError> {
    let mut ops = expr.get_operators_reader();
    match ops.read()? {
        Operator::I32Const { value } => Ok(value),
        other => Err(BinaryError::Unsupported(format!(
            "non-constant offset expression: {other:?}"
        ))),
    }
}

/// Converts `.wat` text to binary; binary input passes through unchanged
/// (sniffed by the `\0asm` magic).
pub fn text_to_binary(input: &[u8]) -> Result<Vec<u8>, BinaryError> {
    if input.starts_with(b"\0asm") {
        return Ok(input.to_vec());
    }
    let text = std::str::from_utf8(input)
        .map_err(|e| BinaryError::Unsupported(format!("not utf-8 wat text: {e}")))?;
    wat::parse_str(text).map_err(|e| BinaryError::Unsupported(e.to_string()))
}

/// A [`wasmflow_environ::LinkerView`] with no resolvable imports, for
/// running modules that declare none. `run`/`explore` don't wire up a host
/// module registry (that's an embedder's job); this exists so
/// self-contained test modules still instantiate.
pub struct NoImports;

impl wasmflow_environ::LinkerView for NoImports {
    fn resolve_import(
        &self,
        module: &Module,
        index: FuncIndex,
    ) -> Result<wasmflow_environ::ImportResolution, wasmflow_environ::LinkError> {
        // `FuncIndex` only numbers function imports; find the matching one
        // among `module.imports`, which also holds table/memory/global
        // imports interleaved.
        let import = module
            .imports
            .iter()
            .filter(|imp| matches!(imp.kind, ImportKind::Function(_)))
            .nth(index.as_u32() as usize)
            .expect("function import index in range");
        Err(wasmflow_environ::LinkError::ImportMissing {
            module: import.module.clone(),
            field: import.field.clone(),
        })
    }
}
