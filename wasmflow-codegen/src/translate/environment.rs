use wasmflow_environ::{GlobalIndex, Module};

/// The module-level symbol resolution the translator needs beyond the
/// static [`Module`] record itself (§4.1: "module-level symbol
/// resolution"). A concrete embedding (the linker, in `wasmflow-jit`)
/// supplies global addresses once an instance has been allocated; the
/// translator only needs to bake them into `iconst`s.
pub trait TranslationEnvironment {
    fn module(&self) -> &Module;

    /// Host address of the storage backing a given global, used to
    /// translate `global.get`/`global.set` into `Load`/`Store` at a
    /// constant address.
    fn global_address(&self, index: GlobalIndex) -> u64;
}

/// A `TranslationEnvironment` for standalone testing/tooling (§6.4
/// `explore`) where globals live in a plain Rust `Vec` rather than a real
/// JIT instance.
pub struct StandaloneEnvironment<'a> {
    pub module: &'a Module,
    pub global_addresses: Vec<u64>,
}

impl<'a> TranslationEnvironment for StandaloneEnvironment<'a> {
    fn module(&self) -> &Module {
        self.module
    }

    fn global_address(&self, index: GlobalIndex) -> u64 {
        self.global_addresses[index.as_u32() as usize]
    }
}
