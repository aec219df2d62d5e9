//! Resolves a module's imports and builds the `func_table`/`indirect_table`
//! contents the [`JITContext`](crate::context::JITContext) header points at
//! (§4.6).
//!
//! Open question resolved here (§9): `func_table` and `indirect_table`
//! share index space rather than being disentangled. Every function,
//! imported or defined, gets one `func_table` slot (used by direct
//! `call`), and the same entry point is mirrored into `indirect_table`
//! with its signature's type tag (used by `call_indirect`'s runtime type
//! check) wherever the function is reachable through a table element.
//! There is one function-pointer identity; `call`/`call_indirect` just
//! read it through different arrays.

use std::collections::HashMap;

use wasmflow_environ::{FuncIndex, ImportResolution, LinkError, LinkerView, Module};

use crate::context::IndirectEntry;
use crate::host::HostTrampolines;

/// A resolved link: per-`FuncIndex` entry points plus the indirect-table
/// contents for every table the module declares.
pub struct LinkResult {
    /// `func_table[i]` for every function in the module's combined
    /// (imports-then-defined) index space.
    pub func_table: Vec<usize>,
    /// One array per table declared by the module, in declaration order.
    pub indirect_tables: Vec<Vec<IndirectEntry>>,
    /// Type tag assigned to each function's signature, used both to
    /// populate indirect-table entries and to check them at a
    /// `call_indirect` site.
    pub type_tags: HashMap<FuncIndex, u64>,
    /// Host callbacks kept alive for the lifetime of the instance; entries
    /// in `func_table` for imported host functions point into trampolines
    /// owned by this.
    pub host_trampolines: HostTrampolines,
}

/// Links `module` against `linker`, given the entry-point addresses of the
/// module's own already-compiled functions (indexed by
/// [`wasmflow_environ::DefinedFuncIndex`]).
pub fn link(
    module: &Module,
    linker: &dyn LinkerView,
    defined_entries: &[usize],
) -> Result<LinkResult, LinkError> {
    let total_funcs = module.function_types.len();
    let mut func_table = vec![0usize; total_funcs];
    let mut type_tags = HashMap::with_capacity(total_funcs);
    let mut host_trampolines = HostTrampolines::new();

    for raw in 0..total_funcs as u32 {
        let index = FuncIndex::from_u32(raw);
        let sig = module.signature(index);
        let tag = signature_tag(sig);
        type_tags.insert(index, tag);

        let entry = if module.is_imported_function(index) {
            match linker.resolve_import(module, index)? {
                ImportResolution::JitFunction { entry, .. } => entry,
                ImportResolution::Host(callback) => host_trampolines.install(index, callback, sig),
            }
        } else {
            let defined = module.defined_func_index(index).expect("defined function");
            defined_entries[defined.as_u32() as usize]
        };
        func_table[raw as usize] = entry;
    }

    let mut indirect_tables = vec![Vec::new(); module.tables.len()];
    for (table_idx, table) in module.tables.iter() {
        let slot = &mut indirect_tables[table_idx.as_u32() as usize];
        slot.resize(table.minimum as usize, IndirectEntry::default());
    }
    for segment in &module.element_segments {
        let Some(offset) = segment.offset else { continue };
        let slot = &mut indirect_tables[segment.table_index.as_u32() as usize];
        for (i, func_index) in segment.elements.iter().enumerate() {
            let dest = offset as usize + i;
            if dest >= slot.len() {
                slot.resize(dest + 1, IndirectEntry::default());
            }
            slot[dest] = IndirectEntry {
                fn_ptr: func_table[func_index.as_u32() as usize],
                type_tag: type_tags[func_index],
            };
        }
    }

    Ok(LinkResult {
        func_table,
        indirect_tables,
        type_tags,
        host_trampolines,
    })
}

/// A stable hash of a function's parameter/result shape, used as the
/// `call_indirect` runtime type tag (§4.3). Two functions with the same
/// tag are assumed signature-compatible; collisions are the caller's risk
/// the same way `wasmtime`'s own`VMSharedSignatureIndex` scheme accepts
/// them for untyped funcrefs.
fn signature_tag(sig: &wasmflow_environ::FuncType) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    for p in &sig.params {
        format!("{p:?}").hash(&mut hasher);
    }
    0xffu8.hash(&mut hasher);
    for r in &sig.results {
        format!("{r:?}").hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmflow_environ::ValType;

    #[test]
    fn signature_tag_distinguishes_arities() {
        let a = wasmflow_environ::FuncType {
            params: vec![ValType::I32],
            results: vec![],
        };
        let b = wasmflow_environ::FuncType {
            params: vec![ValType::I32, ValType::I32],
            results: vec![],
        };
        assert_ne!(signature_tag(&a), signature_tag(&b));
    }
}
