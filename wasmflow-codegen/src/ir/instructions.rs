use super::condcodes::{FloatCC, IntCC};
use super::entities::{Block, Value};
use super::trapcode::TrapCode;
use super::types::Type;
use cranelift_entity::EntityList;
use cranelift_entity::ListPool;

/// Opcode tags (§3.1). `InstructionData` below pairs a tag with the operand
/// shape that opcode requires; the tag alone drives optimizer rewrite-rule
/// lookup and lowering pattern-table dispatch.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    Iconst,
    Fconst,
    Vconst,

    Iadd,
    Isub,
    Imul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Ineg,
    Clz,
    Ctz,
    Popcnt,

    Band,
    Bor,
    Bxor,
    Bnot,

    Ishl,
    Ushr,
    Sshr,
    Rotl,
    Rotr,

    Icmp,

    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fneg,
    Fabs,
    Fsqrt,
    Fmin,
    Fmax,
    Fcopysign,
    Fcmp,
    Fceil,
    Ffloor,
    Ftrunc,
    Fnearest,

    /// Widen an i32 to i64 with sign extension.
    Sextend,
    /// Widen an i32 to i64 with zero extension.
    Uextend,
    /// Narrow an i64 to i32 (truncating bit reinterpretation, not a trap).
    Ireduce,
    /// Reinterpret bits between same-width int/float types.
    Bitcast,
    /// Convert an integer to a float (`f32.convert_i32_s` etc.).
    FcvtFromInt,
    /// Convert a float to an integer, trapping on NaN/out-of-range
    /// (`i32.trunc_f32_s` etc.).
    FcvtToIntTrapping,
    /// Convert a float to an integer, saturating on NaN/out-of-range
    /// (the `nontrapping-float-to-int` / "saturating" extension).
    FcvtToIntSat,
    FpromoteF32ToF64,
    FdemoteF64ToF32,

    Load,
    Store,

    MemoryGrow,
    MemorySize,
    MemoryCopy,
    MemoryFill,
    MemoryInit,
    DataDrop,

    TableGet,
    TableSet,
    TableGrow,
    TableSize,
    TableFill,
    TableCopy,
    TableInit,
    ElemDrop,

    RefNull,
    RefIsNull,
    RefFunc,

    /// Allocate a GC struct/array of the given type index; operands are the
    /// field/element initializers.
    GcAlloc,
    GcFieldGet,
    GcFieldSet,

    Select,

    Call,
    CallIndirect,
    /// Tail call: like `Call` but as a terminator (§3.1 extensions).
    ReturnCall,
    ReturnCallIndirect,

    Trap,
}

impl Opcode {
    /// True if this opcode can signal an observable trap and therefore must
    /// not be deleted while unused, and must not be a rewrite target unless
    /// the rewrite preserves trap conditions exactly (§3.1 invariant, §4.2
    /// purity rule).
    pub fn can_trap(self) -> bool {
        matches!(
            self,
            Opcode::SDiv
                | Opcode::UDiv
                | Opcode::SRem
                | Opcode::URem
                | Opcode::Load
                | Opcode::Store
                | Opcode::FcvtToIntTrapping
                | Opcode::MemoryGrow
                | Opcode::TableGet
                | Opcode::TableSet
                | Opcode::TableGrow
                | Opcode::TableFill
                | Opcode::TableCopy
                | Opcode::TableInit
                | Opcode::MemoryCopy
                | Opcode::MemoryFill
                | Opcode::MemoryInit
                | Opcode::Call
                | Opcode::CallIndirect
                | Opcode::ReturnCall
                | Opcode::ReturnCallIndirect
                | Opcode::GcAlloc
                | Opcode::GcFieldGet
                | Opcode::GcFieldSet
                | Opcode::Trap
        )
    }

    /// Side-effectful in the sense of §3.1: must not be reordered across
    /// other side-effectful instructions even when its result is unused.
    pub fn has_side_effects(self) -> bool {
        self.can_trap()
            || matches!(
                self,
                Opcode::DataDrop | Opcode::ElemDrop | Opcode::GcAlloc
            )
    }

    /// Cheap-and-pure: eligible for rematerialization (§4.2 stage 5).
    pub fn is_remat_candidate(self) -> bool {
        matches!(self, Opcode::Iconst | Opcode::Fconst | Opcode::Bnot)
    }
}

/// A 64-bit-max immediate operand, tagged by the type it represents.
///
/// Float variants carry raw bit patterns rather than `f32`/`f64`, so the
/// whole enum derives `Eq`/`Hash` for free (used by the optimizer's e-graph
/// hash-consing table).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Immediate {
    I32(i32),
    I64(i64),
    /// Bit pattern of an `f32`.
    F32(u32),
    /// Bit pattern of an `f64`.
    F64(u64),
    V128(u128),
}

impl Immediate {
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Immediate::I32(v) => Some(v as i64),
            Immediate::I64(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct MemFlags {
    /// Natural alignment in bytes as declared by the Wasm `align` immediate;
    /// purely advisory for the emitter (AArch64 does not require aligned
    /// accesses), but load-CSE widens/narrows matching on it.
    pub align: u32,
}

pub type ValueList = EntityList<Value>;
pub type ValueListPool = ListPool<Value>;

/// Instruction operand/immediate shapes (§3.1). Each variant embeds the
/// `Opcode` so callers can match on shape and tag together without an
/// extra lookup, mirroring `cranelift_codegen::ir::InstructionData`.
#[derive(Clone, Debug)]
pub enum InstructionData {
    UnaryImm {
        opcode: Opcode,
        imm: Immediate,
    },
    Unary {
        opcode: Opcode,
        arg: Value,
    },
    Binary {
        opcode: Opcode,
        args: [Value; 2],
    },
    BinaryImm {
        opcode: Opcode,
        arg: Value,
        imm: Immediate,
    },
    IntCompare {
        cond: IntCC,
        args: [Value; 2],
    },
    IntCompareImm {
        cond: IntCC,
        arg: Value,
        imm: i64,
    },
    FloatCompare {
        cond: FloatCC,
        args: [Value; 2],
    },
    Load {
        opcode: Opcode,
        arg: Value,
        offset: u32,
        flags: MemFlags,
        ty: Type,
        /// Access width in bytes; may be narrower than `ty.bytes()` for
        /// `i32.load8_s`-style narrow loads.
        width: u32,
        /// Sign-extend (vs. zero-extend) a narrow integer load to `ty`.
        /// Meaningless (and `false`) when `width == ty.bytes()`.
        signed: bool,
    },
    Store {
        opcode: Opcode,
        args: [Value; 2],
        offset: u32,
        flags: MemFlags,
        /// Access width in bytes; may be narrower than the stored value's
        /// type for `i32.store8`-style truncating stores.
        width: u32,
    },
    Select {
        cond: Value,
        if_true: Value,
        if_false: Value,
    },
    Call {
        func_index: u32,
        args: ValueList,
    },
    CallIndirect {
        table_index: u32,
        type_index: u32,
        callee: Value,
        args: ValueList,
    },
    TableOp {
        opcode: Opcode,
        table_index: u32,
        args: ValueList,
    },
    MemoryOp {
        opcode: Opcode,
        args: ValueList,
        segment_or_zero: u32,
    },
    RefNull {
        ty: Type,
    },
    RefFunc {
        func_index: u32,
    },
    GcOp {
        opcode: Opcode,
        type_index: u32,
        field: u32,
        args: ValueList,
    },
    Trap {
        code: TrapCode,
    },
    /// An opcode with no value operands at all (`memory.size`, `table.size`
    /// with its index folded into `imm`).
    Nullary {
        opcode: Opcode,
        imm: u32,
    },
    /// Used by rewrites that redirect an instruction's meaning to "just
    /// alias this other value" without deleting it outright (copy/alias
    /// resolution, §4.2 stage 1).
    Copy {
        arg: Value,
    },
}

impl InstructionData {
    pub fn opcode(&self) -> Opcode {
        match self {
            InstructionData::UnaryImm { opcode, .. } => *opcode,
            InstructionData::Unary { opcode, .. } => *opcode,
            InstructionData::Binary { opcode, .. } => *opcode,
            InstructionData::BinaryImm { opcode, .. } => *opcode,
            InstructionData::IntCompare { .. } => Opcode::Icmp,
            InstructionData::IntCompareImm { .. } => Opcode::Icmp,
            InstructionData::FloatCompare { .. } => Opcode::Fcmp,
            InstructionData::Load { opcode, .. } => *opcode,
            InstructionData::Store { opcode, .. } => *opcode,
            InstructionData::Select { .. } => Opcode::Select,
            InstructionData::Call { .. } => Opcode::Call,
            InstructionData::CallIndirect { .. } => Opcode::CallIndirect,
            InstructionData::TableOp { opcode, .. } => *opcode,
            InstructionData::MemoryOp { opcode, .. } => *opcode,
            InstructionData::RefNull { .. } => Opcode::RefNull,
            InstructionData::RefFunc { .. } => Opcode::RefFunc,
            InstructionData::GcOp { opcode, .. } => *opcode,
            InstructionData::Trap { .. } => Opcode::Trap,
            InstructionData::Copy { .. } => Opcode::Bitcast,
            InstructionData::Nullary { opcode, .. } => *opcode,
        }
    }

    /// Every value operand this instruction reads, fixed or list-based
    /// (used by DCE/CSE/rewrite passes that need the full use set).
    pub fn all_args(&self, pool: &ValueListPool) -> smallvec::SmallVec<[Value; 4]> {
        let mut out: smallvec::SmallVec<[Value; 4]> = self.fixed_args().into_iter().collect();
        match self {
            InstructionData::Call { args, .. }
            | InstructionData::CallIndirect { args, .. }
            | InstructionData::TableOp { args, .. }
            | InstructionData::MemoryOp { args, .. }
            | InstructionData::GcOp { args, .. } => out.extend(args.as_slice(pool).iter().copied()),
            _ => {}
        }
        out
    }

    /// Rewrite every value operand in place via `f`, used by copy/alias
    /// resolution and GVN's value renumbering.
    pub fn map_args_mut(&mut self, pool: &mut ValueListPool, mut f: impl FnMut(Value) -> Value) {
        match self {
            InstructionData::Unary { arg, .. } => *arg = f(*arg),
            InstructionData::Binary { args, .. } => {
                args[0] = f(args[0]);
                args[1] = f(args[1]);
            }
            InstructionData::BinaryImm { arg, .. } => *arg = f(*arg),
            InstructionData::IntCompare { args, .. } => {
                args[0] = f(args[0]);
                args[1] = f(args[1]);
            }
            InstructionData::IntCompareImm { arg, .. } => *arg = f(*arg),
            InstructionData::FloatCompare { args, .. } => {
                args[0] = f(args[0]);
                args[1] = f(args[1]);
            }
            InstructionData::Load { arg, .. } => *arg = f(*arg),
            InstructionData::Store { args, .. } => {
                args[0] = f(args[0]);
                args[1] = f(args[1]);
            }
            InstructionData::Select {
                cond,
                if_true,
                if_false,
            } => {
                *cond = f(*cond);
                *if_true = f(*if_true);
                *if_false = f(*if_false);
            }
            InstructionData::CallIndirect { callee, .. } => *callee = f(*callee),
            InstructionData::Copy { arg } => *arg = f(*arg),
            InstructionData::Call { args, .. }
            | InstructionData::TableOp { args, .. }
            | InstructionData::MemoryOp { args, .. }
            | InstructionData::GcOp { args, .. } => {
                let mapped: smallvec::SmallVec<[Value; 4]> =
                    args.as_slice(pool).iter().map(|v| f(*v)).collect();
                args.clear(pool);
                for v in mapped {
                    args.push(v, pool);
                }
            }
            InstructionData::UnaryImm { .. }
            | InstructionData::RefNull { .. }
            | InstructionData::RefFunc { .. }
            | InstructionData::Trap { .. }
            | InstructionData::Nullary { .. } => {}
        }
    }

    /// Fixed (non-list) value operands, for dataflow/use-site walks that
    /// don't need the variable-length call/table/memory argument lists.
    pub fn fixed_args(&self) -> smallvec::SmallVec<[Value; 2]> {
        use smallvec::smallvec;
        match *self {
            InstructionData::Unary { arg, .. } => smallvec![arg],
            InstructionData::Binary { args, .. } => smallvec![args[0], args[1]],
            InstructionData::BinaryImm { arg, .. } => smallvec![arg],
            InstructionData::IntCompare { args, .. } => smallvec![args[0], args[1]],
            InstructionData::IntCompareImm { arg, .. } => smallvec![arg],
            InstructionData::FloatCompare { args, .. } => smallvec![args[0], args[1]],
            InstructionData::Load { arg, .. } => smallvec![arg],
            InstructionData::Store { args, .. } => smallvec![args[0], args[1]],
            InstructionData::Select {
                cond,
                if_true,
                if_false,
            } => smallvec![cond, if_true, if_false],
            InstructionData::CallIndirect { callee, .. } => smallvec![callee],
            InstructionData::Copy { arg } => smallvec![arg],
            _ => smallvec![],
        }
    }
}

/// A control-flow terminator (§3.1). Every block ends with exactly one.
#[derive(Clone, Debug)]
pub enum Terminator {
    Jump {
        target: Block,
        args: Vec<Value>,
    },
    BrIf {
        cond: Value,
        then_block: Block,
        then_args: Vec<Value>,
        else_block: Block,
        else_args: Vec<Value>,
    },
    BrTable {
        index: Value,
        targets: Vec<Block>,
        default: Block,
        /// Shared argument list passed to whichever target is taken; Wasm
        /// validation guarantees every `br_table` label has identical
        /// arity and types, so one list suffices for all of them.
        args: Vec<Value>,
    },
    Return {
        values: Vec<Value>,
    },
    ReturnCall {
        func_index: u32,
        args: Vec<Value>,
    },
    ReturnCallIndirect {
        table_index: u32,
        type_index: u32,
        callee: Value,
        args: Vec<Value>,
    },
    Unreachable {
        code: TrapCode,
    },
}

impl Terminator {
    /// Every value this terminator reads: branch arguments plus any
    /// condition/index/callee operand.
    pub fn all_args(&self) -> smallvec::SmallVec<[Value; 4]> {
        use smallvec::smallvec;
        match self {
            Terminator::Jump { args, .. } => args.iter().copied().collect(),
            Terminator::BrIf {
                cond,
                then_args,
                else_args,
                ..
            } => {
                let mut v: smallvec::SmallVec<[Value; 4]> = smallvec![*cond];
                v.extend(then_args.iter().copied());
                v.extend(else_args.iter().copied());
                v
            }
            Terminator::BrTable { index, args, .. } => {
                let mut v: smallvec::SmallVec<[Value; 4]> = smallvec![*index];
                v.extend(args.iter().copied());
                v
            }
            Terminator::Return { values } => values.iter().copied().collect(),
            Terminator::ReturnCall { args, .. } => args.iter().copied().collect(),
            Terminator::ReturnCallIndirect { callee, args, .. } => {
                let mut v: smallvec::SmallVec<[Value; 4]> = smallvec![*callee];
                v.extend(args.iter().copied());
                v
            }
            Terminator::Unreachable { .. } => smallvec![],
        }
    }

    pub fn map_args_mut(&mut self, mut f: impl FnMut(Value) -> Value) {
        match self {
            Terminator::Jump { args, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Terminator::BrIf {
                cond,
                then_args,
                else_args,
                ..
            } => {
                *cond = f(*cond);
                for a in then_args.iter_mut() {
                    *a = f(*a);
                }
                for a in else_args.iter_mut() {
                    *a = f(*a);
                }
            }
            Terminator::BrTable { index, args, .. } => {
                *index = f(*index);
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Terminator::Return { values } => {
                for v in values.iter_mut() {
                    *v = f(*v);
                }
            }
            Terminator::ReturnCall { args, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Terminator::ReturnCallIndirect { callee, args, .. } => {
                *callee = f(*callee);
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Terminator::Unreachable { .. } => {}
        }
    }

    pub fn successors(&self) -> smallvec::SmallVec<[Block; 2]> {
        use smallvec::smallvec;
        match self {
            Terminator::Jump { target, .. } => smallvec![*target],
            Terminator::BrIf {
                then_block,
                else_block,
                ..
            } => smallvec![*then_block, *else_block],
            Terminator::BrTable {
                targets, default, ..
            } => {
                let mut v = smallvec::SmallVec::new();
                v.extend(targets.iter().copied());
                v.push(*default);
                v
            }
            Terminator::Return { .. }
            | Terminator::ReturnCall { .. }
            | Terminator::ReturnCallIndirect { .. }
            | Terminator::Unreachable { .. } => smallvec![],
        }
    }
}
