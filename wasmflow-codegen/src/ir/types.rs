use std::fmt;

/// The value types the IR tracks (§3.1). `AnyGcRef` covers the partial-GC
/// extension's reference kind distinct from `funcref`/`externref`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
    AnyGcRef,
}

impl Type {
    /// Width in bytes of this type's natural storage, used for spill-slot
    /// sizing and load/store width selection.
    pub fn bytes(self) -> u32 {
        match self {
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 => 8,
            Type::V128 => 16,
            Type::FuncRef | Type::ExternRef | Type::AnyGcRef => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64 | Type::V128)
    }

    pub fn is_ref(self) -> bool {
        matches!(self, Type::FuncRef | Type::ExternRef | Type::AnyGcRef)
    }

    /// Which VCode register class (§3.2) a value of this type occupies.
    pub fn reg_class(self) -> crate::isa::aarch64::regs::RegClass {
        if self.is_float() {
            crate::isa::aarch64::regs::RegClass::Float
        } else {
            crate::isa::aarch64::regs::RegClass::Int
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::V128 => "v128",
            Type::FuncRef => "funcref",
            Type::ExternRef => "externref",
            Type::AnyGcRef => "anygcref",
        };
        f.write_str(s)
    }
}

impl From<wasmparser::ValType> for Type {
    fn from(vt: wasmparser::ValType) -> Type {
        use wasmparser::ValType as V;
        match vt {
            V::I32 => Type::I32,
            V::I64 => Type::I64,
            V::F32 => Type::F32,
            V::F64 => Type::F64,
            V::V128 => Type::V128,
            V::Ref(r) if r.is_func_ref() => Type::FuncRef,
            V::Ref(_) => Type::ExternRef,
        }
    }
}
