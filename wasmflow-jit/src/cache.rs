//! On-disk cached-module format (§6.3): `"CWAS"` magic, little-endian
//! throughout, a fixed-size function directory, then code bytes, then
//! PC-map sections, then a function-name string table. Lets a host skip
//! recompilation across runs; nothing here is read by generated code
//! itself (contrast [`crate::context::JITContext`], which is).
//!
//! `pc_map` entries are `(native_offset, wasm_offset)` pairs; this crate
//! doesn't currently track a function's Wasm-bytecode offsets through
//! lowering, so writers populate them from trap sites (`wasm_offset` set
//! to the trapping instruction's own native offset) rather than a real
//! source map. Good enough to round-trip trap-site metadata across a
//! cache load; not a substitute for a real PC-to-Wasm mapping.

use std::convert::TryInto;

const MAGIC: &[u8; 4] = b"CWAS";
const VERSION: u32 = 1;
const TARGET_AARCH64: u32 = 0;
const HEADER_LEN: usize = 16;
const ENTRY_LEN: usize = 24;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("truncated cache file")]
    Truncated,
    #[error("bad magic: expected \"CWAS\"")]
    BadMagic,
    #[error("unsupported cache version {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported target_arch {0} (only AArch64 caches are readable here)")]
    UnsupportedTarget(u32),
    #[error("name table is not valid UTF-8")]
    BadNameTable,
}

/// One function as written into or read back from a cache file.
pub struct CachedFunction {
    pub func_idx: u32,
    pub code: Vec<u8>,
    pub entry_point: u32,
    pub pc_map: Vec<(u32, u32)>,
    pub name: Option<String>,
}

/// Serializes `functions` (already sorted by `func_idx`, though this
/// isn't enforced) into the on-disk format.
pub fn write(functions: &[CachedFunction]) -> Vec<u8> {
    let num_funcs = functions.len() as u32;

    let mut code_blob = Vec::new();
    let mut pc_map_blob = Vec::new();
    let mut name_blob = Vec::new();
    let mut directory = Vec::with_capacity(functions.len() * ENTRY_LEN);

    for f in functions {
        let code_offset = code_blob.len() as u32;
        code_blob.extend_from_slice(&f.code);

        let pc_map_offset = pc_map_blob.len() as u32;
        for &(native, wasm) in &f.pc_map {
            pc_map_blob.extend_from_slice(&native.to_le_bytes());
            pc_map_blob.extend_from_slice(&wasm.to_le_bytes());
        }
        let pc_map_len = (pc_map_blob.len() as u32) - pc_map_offset;

        name_blob.extend_from_slice(f.name.as_deref().unwrap_or("").as_bytes());
        name_blob.push(0);

        directory.extend_from_slice(&f.func_idx.to_le_bytes());
        directory.extend_from_slice(&code_offset.to_le_bytes());
        directory.extend_from_slice(&(f.code.len() as u32).to_le_bytes());
        directory.extend_from_slice(&f.entry_point.to_le_bytes());
        directory.extend_from_slice(&pc_map_offset.to_le_bytes());
        directory.extend_from_slice(&pc_map_len.to_le_bytes());
    }

    let mut out = Vec::with_capacity(HEADER_LEN + directory.len() + code_blob.len() + pc_map_blob.len() + name_blob.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&TARGET_AARCH64.to_le_bytes());
    out.extend_from_slice(&num_funcs.to_le_bytes());
    out.extend_from_slice(&directory);
    out.extend_from_slice(&code_blob);
    out.extend_from_slice(&pc_map_blob);
    out.extend_from_slice(&name_blob);
    out
}

/// Parses a buffer produced by [`write`].
pub fn read(bytes: &[u8]) -> Result<Vec<CachedFunction>, CacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::Truncated);
    }
    if &bytes[0..4] != MAGIC {
        return Err(CacheError::BadMagic);
    }
    let version = u32_at(bytes, 4)?;
    if version != VERSION {
        return Err(CacheError::UnsupportedVersion(version));
    }
    let target_arch = u32_at(bytes, 8)?;
    if target_arch != TARGET_AARCH64 {
        return Err(CacheError::UnsupportedTarget(target_arch));
    }
    let num_funcs = u32_at(bytes, 12)? as usize;

    let dir_start = HEADER_LEN;
    let dir_end = dir_start + num_funcs * ENTRY_LEN;
    if bytes.len() < dir_end {
        return Err(CacheError::Truncated);
    }

    // Every offset in the directory is measured from the file start, so
    // the code/pc-map/name blobs can be read directly by slicing `bytes`
    // rather than tracking running cursors.
    struct RawEntry {
        func_idx: u32,
        code_offset: u32,
        code_len: u32,
        entry_point: u32,
        pc_map_offset: u32,
        pc_map_len: u32,
    }
    let mut raw_entries = Vec::with_capacity(num_funcs);
    for i in 0..num_funcs {
        let base = dir_start + i * ENTRY_LEN;
        raw_entries.push(RawEntry {
            func_idx: u32_at(bytes, base)?,
            code_offset: u32_at(bytes, base + 4)?,
            code_len: u32_at(bytes, base + 8)?,
            entry_point: u32_at(bytes, base + 12)?,
            pc_map_offset: u32_at(bytes, base + 16)?,
            pc_map_len: u32_at(bytes, base + 20)?,
        });
    }

    // Code and PC-map offsets in the directory are relative to the start
    // of their respective blobs, which begin right after the directory
    // and right after the code blob; find each blob's length by taking
    // the max extent any entry reaches into it.
    let code_blob_len = raw_entries
        .iter()
        .map(|e| e.code_offset as usize + e.code_len as usize)
        .max()
        .unwrap_or(0);
    let code_start = dir_end;
    let code_end = code_start + code_blob_len;
    if bytes.len() < code_end {
        return Err(CacheError::Truncated);
    }

    let pc_map_blob_len = raw_entries
        .iter()
        .map(|e| e.pc_map_offset as usize + e.pc_map_len as usize)
        .max()
        .unwrap_or(0);
    let pc_map_start = code_end;
    let pc_map_end = pc_map_start + pc_map_blob_len;
    if bytes.len() < pc_map_end {
        return Err(CacheError::Truncated);
    }
    let name_table_start = pc_map_end;

    let name_table = std::str::from_utf8(&bytes[name_table_start..]).map_err(|_| CacheError::BadNameTable)?;
    let mut names = name_table.split('\0');

    let mut out = Vec::with_capacity(num_funcs);
    for entry in raw_entries {
        let code_off = code_start + entry.code_offset as usize;
        let code = bytes[code_off..code_off + entry.code_len as usize].to_vec();

        let pc_map_off = pc_map_start + entry.pc_map_offset as usize;
        let mut pc_map = Vec::with_capacity(entry.pc_map_len as usize / 8);
        let mut cursor = pc_map_off;
        let entry_pc_map_end = pc_map_off + entry.pc_map_len as usize;
        while cursor < entry_pc_map_end {
            let native = u32_at(bytes, cursor)?;
            let wasm = u32_at(bytes, cursor + 4)?;
            pc_map.push((native, wasm));
            cursor += 8;
        }

        let name = names.next().unwrap_or("");
        out.push(CachedFunction {
            func_idx: entry.func_idx,
            code,
            entry_point: entry.entry_point,
            pc_map,
            name: if name.is_empty() { None } else { Some(name.to_string()) },
        });
    }

    Ok(out)
}

fn u32_at(bytes: &[u8], offset: usize) -> Result<u32, CacheError> {
    let slice: [u8; 4] = bytes
        .get(offset..offset + 4)
        .ok_or(CacheError::Truncated)?
        .try_into()
        .map_err(|_| CacheError::Truncated)?;
    Ok(u32::from_le_bytes(slice))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_function_with_pc_map_and_name() {
        let functions = vec![CachedFunction {
            func_idx: 3,
            code: vec![0xDE, 0xAD, 0xBE, 0xEF],
            entry_point: 0,
            pc_map: vec![(0, 0), (4, 4)],
            name: Some("add".to_string()),
        }];
        let bytes = write(&functions);
        assert_eq!(&bytes[0..4], b"CWAS");

        let back = read(&bytes).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].func_idx, 3);
        assert_eq!(back[0].code, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(back[0].pc_map, vec![(0, 0), (4, 4)]);
        assert_eq!(back[0].name.as_deref(), Some("add"));
    }

    #[test]
    fn round_trips_multiple_functions_some_unnamed() {
        let functions = vec![
            CachedFunction {
                func_idx: 0,
                code: vec![1, 2, 3],
                entry_point: 0,
                pc_map: vec![],
                name: None,
            },
            CachedFunction {
                func_idx: 1,
                code: vec![4, 5],
                entry_point: 0,
                pc_map: vec![(1, 1)],
                name: Some("helper".to_string()),
            },
        ];
        let bytes = write(&functions);
        let back = read(&bytes).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].name, None);
        assert_eq!(back[1].name.as_deref(), Some("helper"));
        assert_eq!(back[1].code, vec![4, 5]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = write(&[]);
        bytes[0] = b'X';
        assert!(matches!(read(&bytes), Err(CacheError::BadMagic)));
    }

    #[test]
    fn rejects_truncated_buffer() {
        assert!(matches!(read(&[1, 2, 3]), Err(CacheError::Truncated)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = write(&[]);
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(read(&bytes), Err(CacheError::UnsupportedVersion(99))));
    }
}
