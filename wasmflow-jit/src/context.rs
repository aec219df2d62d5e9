//! The per-instance header the generated code's prologue loads into its
//! cache registers (§3.4). Field order and offsets are load-bearing: the
//! emitter's prologue reads `func_table`/`indirect_table`/`memory_base`/
//! `memory_size` at fixed byte offsets 0/8/16/24, and `memory.grow` lowering
//! reads the host callback at offset 48.

use std::ptr;

/// One `call_indirect` table slot. Wider than a bare function pointer so
/// the emitted type check (`CallIndirect`, §4.3/§4.6) can compare a tag
/// without a second indirection.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct IndirectEntry {
    pub fn_ptr: usize,
    pub type_tag: u64,
}

/// `memory.grow(delta, mem_index) -> new_page_count` (-1 on failure),
/// reached from generated code with the [`JITContext`] pointer as the
/// first argument (§4.6, "host call that updates the JIT context").
pub type MemoryGrowFn = extern "C" fn(ctx: *mut JITContext, delta: u32, mem_index: u32) -> i32;

/// Owned by one module instance (§3.5); `memory_base`/`memory_size` mutate
/// on `memory.grow`, nothing else in this struct changes after
/// instantiation. `#[repr(C)]` with no implicit reordering: this is read by
/// machine code, not by the Rust compiler.
#[repr(C)]
pub struct JITContext {
    pub func_table: *mut usize,
    pub indirect_table: *mut IndirectEntry,
    pub memory_base: *mut u8,
    pub memory_size: u64,
    /// Per-table indirect call arrays (§3.4 "multi-table"); `indirect_table`
    /// above is `indirect_tables[0]` kept cached for the common single-table
    /// case the emitter's prologue always loads.
    pub indirect_tables: *mut *mut IndirectEntry,
    pub table_count: u32,
    _pad: u32,
    pub host_memory_grow: MemoryGrowFn,
    /// Back-pointer to the owning [`crate::instance::Instance`], opaque to
    /// generated code; `host_memory_grow` casts this back to find which
    /// `LinearMemory` to grow. Placed at offset 56, the next slot after
    /// `host_memory_grow`.
    pub host_data: *mut std::ffi::c_void,
}

impl JITContext {
    pub fn new(
        func_table: *mut usize,
        indirect_tables: Vec<*mut IndirectEntry>,
        memory_base: *mut u8,
        memory_size: u64,
        host_memory_grow: MemoryGrowFn,
        host_data: *mut std::ffi::c_void,
    ) -> Box<JITContext> {
        let table_count = indirect_tables.len() as u32;
        let indirect_table = indirect_tables.first().copied().unwrap_or(ptr::null_mut());
        let indirect_tables = Box::into_raw(indirect_tables.into_boxed_slice()) as *mut *mut IndirectEntry;
        Box::new(JITContext {
            func_table,
            indirect_table,
            memory_base,
            memory_size,
            indirect_tables,
            table_count,
            _pad: 0,
            host_memory_grow,
            host_data,
        })
    }

    /// Table `i`'s indirect-call array, or `None` if out of range.
    pub fn indirect_table(&self, i: u32) -> Option<*mut IndirectEntry> {
        if i < self.table_count {
            Some(unsafe { *self.indirect_tables.add(i as usize) })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn header_layout_matches_the_emitter() {
        assert_eq!(offset_of!(JITContext, func_table), 0);
        assert_eq!(offset_of!(JITContext, indirect_table), 8);
        assert_eq!(offset_of!(JITContext, memory_base), 16);
        assert_eq!(offset_of!(JITContext, memory_size), 24);
        assert_eq!(offset_of!(JITContext, indirect_tables), 32);
        assert_eq!(offset_of!(JITContext, table_count), 40);
        assert_eq!(offset_of!(JITContext, host_memory_grow), 48);
        assert_eq!(offset_of!(JITContext, host_data), 56);
    }
}
