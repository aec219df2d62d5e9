//! Executable memory manager (§4.6): a block is allocated `RW`, code is
//! copied in, the instruction cache is flushed, then the block is
//! re-protected `RX`. One block per compiled module; released on drop.

use anyhow::{Context, Result};
use region::Protection;

pub struct CodeMemory {
    alloc: region::Allocation,
    len: usize,
    published: bool,
}

impl CodeMemory {
    pub fn new(capacity: usize) -> Result<Self> {
        let alloc = region::alloc(capacity.max(1), Protection::READ_WRITE)
            .context("failed to allocate RW executable-code region")?;
        Ok(CodeMemory {
            alloc,
            len: 0,
            published: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.alloc.len()
    }

    /// Copies `code` into the region at the next 16-byte-aligned free
    /// offset and returns the address it landed at. Must run before
    /// [`publish`](Self::publish).
    pub fn write(&mut self, code: &[u8]) -> *const u8 {
        assert!(!self.published, "CodeMemory already published read-execute");
        let aligned = (self.len + 15) & !15;
        assert!(
            aligned + code.len() <= self.alloc.len(),
            "code region capacity exceeded: {} + {} > {}",
            aligned,
            code.len(),
            self.alloc.len()
        );
        unsafe {
            let base = self.alloc.as_ptr::<u8>() as *mut u8;
            let dst = base.add(aligned);
            std::ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());
            self.len = aligned + code.len();
            dst
        }
    }

    /// Flushes the instruction cache over the written range and switches
    /// the block `RX`. Idempotent.
    pub fn publish(&mut self) -> Result<()> {
        if self.published {
            return Ok(());
        }
        let base = self.alloc.as_ptr::<u8>();
        unsafe {
            flush_icache(base, self.len);
        }
        unsafe {
            region::protect(base, self.alloc.len(), Protection::READ_EXECUTE)
                .context("failed to mark executable-code region read-execute")?;
        }
        self.published = true;
        Ok(())
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn flush_icache(start: *const u8, len: usize) {
    const CACHE_LINE: usize = 64;
    let start = start as usize;
    let end = start + len;

    let mut addr = start & !(CACHE_LINE - 1);
    while addr < end {
        std::arch::asm!("dc cvau, {0}", in(reg) addr, options(nostack));
        addr += CACHE_LINE;
    }
    std::arch::asm!("dsb ish", options(nostack));

    let mut addr = start & !(CACHE_LINE - 1);
    while addr < end {
        std::arch::asm!("ic ivau, {0}", in(reg) addr, options(nostack));
        addr += CACHE_LINE;
    }
    std::arch::asm!("dsb ish", "isb", options(nostack));
}

#[cfg(not(target_arch = "aarch64"))]
unsafe fn flush_icache(_start: *const u8, _len: usize) {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

/// One Wasm linear memory (§3.5). Grown via plain reallocation: the
/// explicit `BoundsCheck` instruction the lowerer emits for every access
/// (§4.3) makes a guard-page reservation scheme unnecessary, so a grow is
/// allowed to move the backing buffer as long as the header's
/// `memory_base`/`memory_size` are updated before any code reads them
/// again.
pub struct LinearMemory {
    data: Vec<u8>,
    minimum_pages: u32,
    maximum_pages: Option<u32>,
}

pub const WASM_PAGE_SIZE: u32 = 65536;

impl LinearMemory {
    pub fn new(minimum_pages: u32, maximum_pages: Option<u32>) -> Self {
        let mut data = Vec::new();
        data.resize(minimum_pages as usize * WASM_PAGE_SIZE as usize, 0);
        LinearMemory {
            data,
            minimum_pages,
            maximum_pages,
        }
    }

    pub fn base_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn current_pages(&self) -> u32 {
        (self.data.len() / WASM_PAGE_SIZE as usize) as u32
    }

    /// Grows by `delta` pages, returning the previous page count, or
    /// `None` if that would exceed the declared maximum.
    pub fn grow(&mut self, delta: u32) -> Option<u32> {
        let current = self.current_pages();
        let target = current.checked_add(delta)?;
        if let Some(max) = self.maximum_pages {
            if target > max {
                return None;
            }
        }
        self.data.resize(target as usize * WASM_PAGE_SIZE as usize, 0);
        Some(current)
    }

    pub fn minimum_pages(&self) -> u32 {
        self.minimum_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_extends_and_reports_previous_size() {
        let mut mem = LinearMemory::new(1, Some(4));
        assert_eq!(mem.grow(2), Some(1));
        assert_eq!(mem.current_pages(), 3);
        assert_eq!(mem.size_bytes(), 3 * WASM_PAGE_SIZE as u64);
    }

    #[test]
    fn grow_past_maximum_fails() {
        let mut mem = LinearMemory::new(1, Some(1));
        assert_eq!(mem.grow(1), None);
    }

    #[test]
    fn write_packs_entries_16_byte_aligned() {
        let mut mem = CodeMemory::new(256).unwrap();
        let a = mem.write(&[0u8; 5]);
        let b = mem.write(&[0u8; 3]);
        assert_eq!((b as usize) - (a as usize), 16);
    }

    #[test]
    #[should_panic(expected = "capacity exceeded")]
    fn write_past_capacity_panics() {
        let mut mem = CodeMemory::new(16).unwrap();
        mem.write(&[0u8; 64]);
    }
}
