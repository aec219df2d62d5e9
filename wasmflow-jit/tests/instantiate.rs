//! End-to-end: a hand-built `Module` (bypassing the parser/validator
//! collaborator, whose job is out of scope here) carrying one exported
//! function's raw operator bytes, compiled, instantiated and called
//! through the full `wasmflow-codegen` + `wasmflow-jit` pipeline.

use std::sync::Arc;

use wasmflow_environ::{
    DataSegment, ElementSegment, Export, ExportKind, FuncIndex, FuncType, FunctionBody, GlobalIndex,
    Import, ImportKind, LinkError, LinkerView, Module, TypeIndex, Value,
};
use wasmflow_jit::{CallError, Instance, RuntimeConfig};
use wasmparser::ValType;

struct NoImports;

impl LinkerView for NoImports {
    fn resolve_import(
        &self,
        _module: &Module,
        _index: FuncIndex,
    ) -> Result<wasmflow_environ::ImportResolution, LinkError> {
        Err(LinkError::ImportMissing {
            module: "env".to_string(),
            field: "unused".to_string(),
        })
    }
}

/// `(func (param i32 i32) (result i32) local.get 0 local.get 1 i32.add)`,
/// encoded by hand as a code-section body: a `0` locals count followed by
/// the operator stream and `end`.
fn add_function_body() -> Vec<u8> {
    vec![
        0x00, // no local declarations
        0x20, 0x00, // local.get 0
        0x20, 0x01, // local.get 1
        0x6A, // i32.add
        0x0B, // end
    ]
}

fn single_export_module(name: &str) -> Module {
    let mut module = Module::default();
    module.types.push(FuncType {
        params: vec![ValType::I32, ValType::I32],
        results: vec![ValType::I32],
    });
    module.function_types.push(TypeIndex::from_u32(0));
    module.function_bodies.push(FunctionBody {
        offset: 0,
        bytes: add_function_body(),
    });
    module.exports.push(Export {
        name: name.to_string(),
        kind: ExportKind::Function(FuncIndex::from_u32(0)),
    });
    module
}

#[test]
fn compiles_instantiates_and_calls_an_exported_function() {
    let module = Arc::new(single_export_module("add"));
    let (mut instance, _stats) =
        Instance::instantiate(module, &NoImports, &RuntimeConfig::default()).expect("instantiation succeeds");

    let results = instance
        .call_export("add", &[Value::I32(17), Value::I32(25)])
        .expect("call succeeds");
    assert_eq!(results, vec![Value::I32(42)]);
}

#[test]
fn calling_an_unknown_export_is_a_call_error_not_a_panic() {
    let module = Arc::new(single_export_module("add"));
    let (mut instance, _stats) =
        Instance::instantiate(module, &NoImports, &RuntimeConfig::default()).expect("instantiation succeeds");

    let err = instance
        .call_export("missing", &[Value::I32(1), Value::I32(2)])
        .unwrap_err();
    assert!(matches!(err, CallError::ExportNotFound(name) if name == "missing"));
}

#[test]
fn arity_mismatch_is_reported_rather_than_miscompiled() {
    let module = Arc::new(single_export_module("add"));
    let (mut instance, _stats) =
        Instance::instantiate(module, &NoImports, &RuntimeConfig::default()).expect("instantiation succeeds");

    let err = instance.call_export("add", &[Value::I32(1)]).unwrap_err();
    assert!(matches!(
        err,
        CallError::ArityMismatch {
            expected: 2,
            got: 1
        }
    ));
}

#[test]
fn a_module_with_no_start_function_instantiates_and_run_start_is_a_no_op() {
    let module = Arc::new(single_export_module("add"));
    let (mut instance, _) =
        Instance::instantiate(module, &NoImports, &RuntimeConfig::default()).expect("instantiation succeeds");
    instance.run_start().expect("no start function means nothing to run");
}

// Exercises every field of `Module` this reader's sibling `wasmflow-cli`
// binary reader populates, so the hand-built fixture above doesn't silently
// drift from the real shape of a translated module.
#[test]
fn an_empty_module_still_has_the_full_field_set() {
    let module = Module::default();
    let _: &Vec<Import> = &module.imports;
    let _: &Vec<Export> = &module.exports;
    let _: &Vec<ElementSegment> = &module.element_segments;
    let _: &Vec<DataSegment> = &module.data_segments;
    let _: Option<FuncIndex> = module.start;
    assert_eq!(module.num_imported_functions, 0);
    assert!(matches!(module.imports.first(), None));
    let _: fn(GlobalIndex) = |_| {};
    let _: fn(ImportKind) = |_| {};
}
