use super::condcodes::{FloatCC, IntCC};
use super::entities::{Block, Inst, Value};
use super::function::Function;
use super::instructions::{Immediate, InstructionData, MemFlags, Opcode};
use super::trapcode::TrapCode;
use super::types::Type;

/// A minimal instruction inserter over a `Function`, appending to a given
/// block in program order. Mirrors the role of `cranelift_frontend`'s
/// `FuncInstBuilder`, scoped down to the opcodes this IR supports.
pub struct InstBuilder<'f> {
    func: &'f mut Function,
    block: Block,
}

impl<'f> InstBuilder<'f> {
    pub fn new(func: &'f mut Function, block: Block) -> Self {
        InstBuilder { func, block }
    }

    fn push(&mut self, data: InstructionData, ty: Type) -> Value {
        let inst = self.func.dfg.make_inst(data);
        self.func.append_inst(self.block, inst);
        self.func.dfg.append_result(inst, ty)
    }

    pub fn iconst(&mut self, ty: Type, imm: i64) -> Value {
        let imm = match ty {
            Type::I32 => Immediate::I32(imm as i32),
            Type::I64 => Immediate::I64(imm),
            _ => panic!("iconst requires an integer type"),
        };
        self.push(
            InstructionData::UnaryImm {
                opcode: Opcode::Iconst,
                imm,
            },
            ty,
        )
    }

    pub fn f32const(&mut self, bits: u32) -> Value {
        self.push(
            InstructionData::UnaryImm {
                opcode: Opcode::Fconst,
                imm: Immediate::F32(bits),
            },
            Type::F32,
        )
    }

    pub fn f64const(&mut self, bits: u64) -> Value {
        self.push(
            InstructionData::UnaryImm {
                opcode: Opcode::Fconst,
                imm: Immediate::F64(bits),
            },
            Type::F64,
        )
    }

    pub fn binary(&mut self, opcode: Opcode, ty: Type, a: Value, b: Value) -> Value {
        self.push(
            InstructionData::Binary {
                opcode,
                args: [a, b],
            },
            ty,
        )
    }

    pub fn unary(&mut self, opcode: Opcode, ty: Type, a: Value) -> Value {
        self.push(InstructionData::Unary { opcode, arg: a }, ty)
    }

    pub fn icmp(&mut self, cond: IntCC, a: Value, b: Value) -> Value {
        self.push(InstructionData::IntCompare { cond, args: [a, b] }, Type::I32)
    }

    pub fn icmp_imm(&mut self, cond: IntCC, a: Value, imm: i64) -> Value {
        self.push(
            InstructionData::IntCompareImm { cond, arg: a, imm },
            Type::I32,
        )
    }

    pub fn fcmp(&mut self, cond: FloatCC, a: Value, b: Value) -> Value {
        self.push(
            InstructionData::FloatCompare { cond, args: [a, b] },
            Type::I32,
        )
    }

    pub fn load(&mut self, ty: Type, opcode: Opcode, addr: Value, offset: u32) -> Value {
        self.load_sized(ty, opcode, addr, offset, ty.bytes(), false)
    }

    /// Load with an access width narrower than `ty`'s natural size,
    /// sign- or zero-extended to `ty` (`i32.load8_s`, `i64.load32_u`, ...).
    pub fn load_sized(
        &mut self,
        ty: Type,
        opcode: Opcode,
        addr: Value,
        offset: u32,
        width: u32,
        signed: bool,
    ) -> Value {
        self.push(
            InstructionData::Load {
                opcode,
                arg: addr,
                offset,
                flags: MemFlags::default(),
                ty,
                width,
                signed,
            },
            ty,
        )
    }

    pub fn store(&mut self, opcode: Opcode, addr: Value, val: Value, offset: u32, width: u32) {
        let inst = self.func.dfg.make_inst(InstructionData::Store {
            opcode,
            args: [addr, val],
            offset,
            flags: MemFlags::default(),
            width,
        });
        self.func.append_inst(self.block, inst);
    }

    pub fn select(&mut self, ty: Type, cond: Value, if_true: Value, if_false: Value) -> Value {
        self.push(
            InstructionData::Select {
                cond,
                if_true,
                if_false,
            },
            ty,
        )
    }

    pub fn trap(&mut self, code: TrapCode) {
        let inst = self.func.dfg.make_inst(InstructionData::Trap { code });
        self.func.append_inst(self.block, inst);
    }

    pub fn func(&mut self) -> &mut Function {
        self.func
    }
}
