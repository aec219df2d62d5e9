//! Bounded equality-graph rewrite pass (§4.2 stage 2): one e-graph built per
//! block, in program order. Each instruction's result gets an e-class;
//! operands that resolve to values defined earlier in the block (or outside
//! it) are treated as opaque leaves. Hash-consing means two instructions
//! that end up structurally identical after canonicalization collapse onto
//! the same class without any extra rule firing.
//!
//! Two distinct ways an e-class can gain an alternative representation:
//!   - `union_into`: a rewrite rule found another *shape* of the same
//!     computation (e.g. a power-of-two multiply restated as a shift). The
//!     new node joins the class's own node set, bounded by
//!     `MAX_ECLASS_NODES`.
//!   - `subsume`: a rewrite rule found that this class's value is simply
//!     *equal to* some independent, already-existing class (an algebraic
//!     identity collapsing to an operand, or a constant fold landing on a
//!     value some earlier instruction already computes). This redirects
//!     extraction to that class without merging node sets, which is what
//!     keeps associative/commutative rules from bouncing two classes back
//!     and forth rediscovering each other forever.
//!
//! Extraction picks, per class, the cheapest representative by an integer
//! cost model (ties broken by shallower nesting depth), optionally scaled
//! by an approximate loop depth so the pass leans harder on cheap
//! representations for code that runs more often. This is one directional
//! pass per block with no saturation loop of its own; `opt::optimize`'s
//! outer fixpoint is what gives a rewrite from one iteration a chance to
//! enable more rewrites in the next.
//!
//! A rewrite never touches a trapping opcode's operands (§4.2 purity rule):
//! such an instruction still gets a leaf class, so later instructions can
//! reference its result, but it is never itself a rewrite target.
//!
//! Constant folding here is width-correct: the folded immediate takes the
//! instruction's own result type rather than always narrowing to 32 bits.

use crate::ir::{Block, Function, Immediate, Inst, InstructionData, IntCC, Opcode, Type, Value};
use std::collections::HashMap;

/// §4.2: "per-eclass node limit".
const MAX_ECLASS_NODES: usize = 5;
/// §4.2: "per-call match limit" — rewrite-rule attempts per instruction.
const MAX_MATCHES_PER_CALL: usize = 5;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
struct EClassId(u32);

/// A hash-consed node shape. Operands are child class ids rather than
/// `Value`s, so two differently-named values computing the same thing
/// structurally coincide.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum ENode {
    Leaf(Value),
    Const(Immediate),
    Binary(Opcode, [EClassId; 2]),
    BinaryImm(Opcode, EClassId, Immediate),
    IntCompare(IntCC, [EClassId; 2]),
    Select([EClassId; 3]),
}

impl ENode {
    /// Unit cost contributed by this node alone, on top of its children's.
    /// Leaves and constants are free: picking one never emits a new
    /// instruction. Shifts are cheaper than multiplies so strength
    /// reduction is actually cost-driven rather than hardcoded.
    fn own_cost(&self) -> u64 {
        match self {
            ENode::Leaf(_) | ENode::Const(_) => 0,
            ENode::Binary(Opcode::Imul, _) => 3,
            ENode::Binary(..) => 1,
            ENode::BinaryImm(..) => 1,
            ENode::IntCompare(..) => 1,
            ENode::Select(..) => 1,
        }
    }

    fn children(&self) -> smallvec::SmallVec<[EClassId; 3]> {
        use smallvec::smallvec;
        match *self {
            ENode::Leaf(_) | ENode::Const(_) => smallvec![],
            ENode::Binary(_, cs) => smallvec![cs[0], cs[1]],
            ENode::BinaryImm(_, c, _) => smallvec![c],
            ENode::IntCompare(_, cs) => smallvec![cs[0], cs[1]],
            ENode::Select(cs) => smallvec![cs[0], cs[1], cs[2]],
        }
    }
}

/// How to materialize a winning candidate back into the original
/// instruction's slot. Stored alongside each `ENode` at construction time,
/// since every candidate is built from values this pass already has on
/// hand — extraction never needs to invent a new SSA value.
#[derive(Clone, Debug)]
enum Splice {
    Const(Immediate),
    Alias(Value),
    Reshape(InstructionData),
}

struct EGraph {
    hashcons: HashMap<ENode, EClassId>,
    nodes: Vec<Vec<(ENode, Splice)>>,
    subsumed: HashMap<EClassId, EClassId>,
    value_class: HashMap<Value, EClassId>,
}

impl EGraph {
    fn new() -> Self {
        EGraph {
            hashcons: HashMap::new(),
            nodes: Vec::new(),
            subsumed: HashMap::new(),
            value_class: HashMap::new(),
        }
    }

    fn fresh_class(&mut self, node: ENode, splice: Splice) -> EClassId {
        let id = EClassId(self.nodes.len() as u32);
        self.nodes.push(vec![(node.clone(), splice)]);
        self.hashcons.insert(node, id);
        id
    }

    /// Hash-consing lookup/insert: returns the existing class for an
    /// identical node if one exists, otherwise allocates a fresh class.
    fn intern(&mut self, node: ENode, splice: Splice) -> EClassId {
        if let Some(&id) = self.hashcons.get(&node) {
            return id;
        }
        self.fresh_class(node, splice)
    }

    /// The class representing `v` as an opaque value, creating one on
    /// first reference (works uniformly for values defined earlier in this
    /// block, block parameters, and values from outside the block).
    fn leaf(&mut self, v: Value) -> EClassId {
        if let Some(&id) = self.value_class.get(&v) {
            return id;
        }
        let id = self.intern(ENode::Leaf(v), Splice::Alias(v));
        self.value_class.insert(v, id);
        id
    }

    /// Follows `subsume` redirects to their final target, with a cycle
    /// guard since redirects should form a DAG but extraction shouldn't
    /// hang if that invariant is ever violated.
    fn resolve(&self, mut id: EClassId) -> EClassId {
        let mut hops = 0;
        while let Some(&next) = self.subsumed.get(&id) {
            id = next;
            hops += 1;
            if hops > 64 {
                break;
            }
        }
        id
    }

    /// Redirects `from`'s extraction to `to` without merging node sets
    /// (§4.2: "subsume without merge" — the alternative to union that
    /// can't be bounced into an infinite loop by an AC rewrite).
    fn subsume(&mut self, from: EClassId, to: EClassId) {
        let to = self.resolve(to);
        if from != to {
            self.subsumed.insert(from, to);
        }
    }

    /// Adds `node` as an alternative representation inside `class`,
    /// bounded by `MAX_ECLASS_NODES`: once full, the current
    /// highest-cost member is evicted to make room.
    fn union_into(&mut self, class: EClassId, node: ENode, splice: Splice) {
        let idx = class.0 as usize;
        if self.nodes[idx].iter().any(|(n, _)| *n == node) {
            return;
        }
        if self.nodes[idx].len() >= MAX_ECLASS_NODES {
            if let Some(worst) = self.nodes[idx]
                .iter()
                .enumerate()
                .max_by_key(|(_, (n, _))| n.own_cost())
                .map(|(i, _)| i)
            {
                self.nodes[idx].remove(worst);
            }
        }
        self.hashcons.entry(node.clone()).or_insert(class);
        self.nodes[idx].push((node, splice));
    }

    /// Lowest-cost representative of `class` (after following `subsume`
    /// redirects), as `(cost, depth, splice)`; ties broken by shallower
    /// nesting depth. `loop_weight` scales every non-free node's own cost,
    /// so extraction leans harder on cheap shapes inside loops.
    fn extract(
        &self,
        class: EClassId,
        loop_weight: u64,
        memo: &mut HashMap<EClassId, (u64, u32, Splice)>,
    ) -> (u64, u32, Splice) {
        let class = self.resolve(class);
        if let Some(v) = memo.get(&class) {
            return v.clone();
        }
        let mut best: Option<(u64, u32, Splice)> = None;
        for (node, splice) in &self.nodes[class.0 as usize] {
            let own = node.own_cost();
            let mut cost = if own == 0 { 0 } else { own.saturating_mul(loop_weight) };
            let mut depth = 0u32;
            for child in node.children() {
                let (c, d, _) = self.extract(child, loop_weight, memo);
                cost = cost.saturating_add(c);
                depth = depth.max(d + 1);
            }
            let better = match &best {
                None => true,
                Some((bc, bd, _)) => (cost, depth) < (*bc, *bd),
            };
            if better {
                best = Some((cost, depth, splice.clone()));
            }
        }
        let result = best.expect("an e-class always has at least one node");
        memo.insert(class, result.clone());
        result
    }
}

pub fn run(func: &mut Function) -> bool {
    let loop_depth = compute_loop_depths(func);
    let mut changed = false;
    for (pos, block) in func.block_order.clone().into_iter().enumerate() {
        let loop_weight = 1u64 << loop_depth[pos].min(8);
        changed |= rewrite_block(func, block, loop_weight);
    }
    changed
}

/// Approximates loop nesting the same way `isa::aarch64::regalloc`'s
/// `compute_loop_depths` does for `VCodeFunction`s: blocks are numbered in
/// roughly reverse-postorder, so a successor at or before the current
/// block's position is a back edge, and everything it spans is one loop
/// level deeper.
fn compute_loop_depths(func: &Function) -> Vec<u32> {
    let order = &func.block_order;
    let index: HashMap<Block, usize> = order.iter().enumerate().map(|(i, &b)| (b, i)).collect();
    let mut depth = vec![0u32; order.len()];
    for (i, &block) in order.iter().enumerate() {
        let Some(term) = &func.layout[block].terminator else {
            continue;
        };
        for succ in term.successors() {
            let Some(&succ_pos) = index.get(&succ) else {
                continue;
            };
            if succ_pos <= i {
                for d in depth[succ_pos..=i].iter_mut() {
                    *d += 1;
                }
            }
        }
    }
    depth
}

fn rewrite_block(func: &mut Function, block: Block, loop_weight: u64) -> bool {
    let mut graph = EGraph::new();
    let mut changed = false;
    let insts = func.layout[block].insts.clone();
    for inst in insts {
        changed |= rewrite_inst(func, &mut graph, inst, loop_weight);
    }
    changed
}

fn rewrite_inst(func: &mut Function, graph: &mut EGraph, inst: Inst, loop_weight: u64) -> bool {
    let data = func.dfg.insts[inst].clone();
    let opcode = data.opcode();

    let Some(&result) = func.dfg.inst_results(inst).first() else {
        return false;
    };

    if opcode.can_trap() {
        graph.leaf(result);
        return false;
    }

    let class = match data.clone() {
        InstructionData::Binary { opcode, args: [a0, b0] } => {
            let (a, b) = canonicalize_commutative(graph, opcode, a0, b0);
            binary_class(func, graph, inst, opcode, a, b)
        }
        InstructionData::IntCompare { cond: cond0, args: [a0, b0] } => {
            let (cond, a, b) = canonicalize_compare(graph, cond0, a0, b0);
            compare_class(graph, cond, a, b)
        }
        InstructionData::Select { cond, if_true, if_false } => select_class(graph, cond, if_true, if_false),
        InstructionData::UnaryImm {
            opcode: Opcode::Iconst | Opcode::Fconst,
            imm,
        } => {
            let c = graph.intern(ENode::Const(imm), Splice::Const(imm));
            graph.value_class.insert(result, c);
            return false;
        }
        InstructionData::Copy { arg } => {
            let c = graph.leaf(arg);
            graph.value_class.insert(result, c);
            return false;
        }
        _ => {
            graph.leaf(result);
            return false;
        }
    };

    graph.value_class.insert(result, class);
    let resolved = graph.resolve(class);
    let mut memo = HashMap::new();
    let (_, _, splice) = graph.extract(resolved, loop_weight, &mut memo);
    apply_splice(func, inst, &data, result, splice)
}

fn apply_splice(func: &mut Function, inst: Inst, old: &InstructionData, result: Value, splice: Splice) -> bool {
    let new_data = match splice {
        Splice::Const(imm) => InstructionData::UnaryImm {
            opcode: if matches!(imm, Immediate::F32(_) | Immediate::F64(_)) {
                Opcode::Fconst
            } else {
                Opcode::Iconst
            },
            imm,
        },
        Splice::Alias(v) if v == result => return false,
        Splice::Alias(v) => InstructionData::Copy { arg: v },
        Splice::Reshape(d) => d,
    };
    if same_shape(old, &new_data) {
        return false;
    }
    func.dfg.insts[inst] = new_data;
    true
}

/// Builds (or looks up) the e-class for a canonicalized `Binary`
/// instruction and registers any rewrite it discovers — constant folding,
/// an algebraic identity, or power-of-two strength reduction — bounded by
/// `MAX_MATCHES_PER_CALL`.
fn binary_class(func: &Function, graph: &mut EGraph, inst: Inst, opcode: Opcode, a: Value, b: Value) -> EClassId {
    let ca = graph.leaf(a);
    let cb = graph.leaf(b);
    let class = graph.intern(
        ENode::Binary(opcode, [ca, cb]),
        Splice::Reshape(InstructionData::Binary { opcode, args: [a, b] }),
    );

    let a_imm = const_imm_value(graph, a);
    let b_imm = const_imm_value(graph, b);
    let result_ty = func.dfg.value_type(func.dfg.first_result(inst));
    let mut attempts = 0usize;

    if attempts < MAX_MATCHES_PER_CALL {
        attempts += 1;
        if let (Some(x), Some(y)) = (a_imm, b_imm) {
            if let Some(imm) = fold_binary(opcode, x, y, result_ty) {
                let target = graph.intern(ENode::Const(imm), Splice::Const(imm));
                graph.subsume(class, target);
            }
        }
    }

    if attempts < MAX_MATCHES_PER_CALL {
        attempts += 1;
        if opcode == Opcode::Band {
            let zero = zero_imm(result_ty);
            if a_imm == Some(zero) || b_imm == Some(zero) {
                let target = graph.intern(ENode::Const(zero), Splice::Const(zero));
                graph.subsume(class, target);
            }
        }
    }

    if attempts < MAX_MATCHES_PER_CALL {
        attempts += 1;
        if let Some(v) = algebraic_identity(opcode, a, b, a_imm, b_imm) {
            let target = graph.leaf(v);
            graph.subsume(class, target);
        }
    }

    if attempts < MAX_MATCHES_PER_CALL {
        attempts += 1;
        // x * 2^k -> x << k (target-independent strength reduction;
        // AArch64-specific shifted-operand fusion happens in lowering).
        if opcode == Opcode::Imul {
            if let Some(v) = b_imm.and_then(|i| i.as_i64()) {
                if v > 1 && (v as u64).is_power_of_two() {
                    let shift = v.trailing_zeros() as i64;
                    let imm = match result_ty {
                        Type::I64 => Immediate::I64(shift),
                        _ => Immediate::I32(shift as i32),
                    };
                    graph.union_into(
                        class,
                        ENode::BinaryImm(Opcode::Ishl, ca, imm),
                        Splice::Reshape(InstructionData::BinaryImm {
                            opcode: Opcode::Ishl,
                            arg: a,
                            imm,
                        }),
                    );
                }
            }
        }
    }

    class
}

fn compare_class(graph: &mut EGraph, cond: IntCC, a: Value, b: Value) -> EClassId {
    let ca = graph.leaf(a);
    let cb = graph.leaf(b);
    let class = graph.intern(
        ENode::IntCompare(cond, [ca, cb]),
        Splice::Reshape(InstructionData::IntCompare { cond, args: [a, b] }),
    );
    if let (Some(x), Some(y)) = (
        const_imm_value(graph, a).and_then(|i| i.as_i64()),
        const_imm_value(graph, b).and_then(|i| i.as_i64()),
    ) {
        let imm = Immediate::I32(eval_intcc(cond, x, y) as i32);
        let target = graph.intern(ENode::Const(imm), Splice::Const(imm));
        graph.subsume(class, target);
    }
    class
}

fn select_class(graph: &mut EGraph, cond: Value, if_true: Value, if_false: Value) -> EClassId {
    let cc = graph.leaf(cond);
    let ct = graph.leaf(if_true);
    let cf = graph.leaf(if_false);
    let class = graph.intern(
        ENode::Select([cc, ct, cf]),
        Splice::Reshape(InstructionData::Select { cond, if_true, if_false }),
    );
    if let Some(c) = const_imm_value(graph, cond).and_then(|i| i.as_i64()) {
        let v = if c != 0 { if_true } else { if_false };
        let target = graph.leaf(v);
        graph.subsume(class, target);
    }
    class
}

/// §4.2: "canonicalize commutative operands (constants to RHS, otherwise by
/// class id)".
fn canonicalize_commutative(graph: &mut EGraph, opcode: Opcode, a: Value, b: Value) -> (Value, Value) {
    if !matches!(opcode, Opcode::Iadd | Opcode::Imul | Opcode::Band | Opcode::Bor | Opcode::Bxor) {
        return (a, b);
    }
    let a_const = const_imm_value(graph, a).is_some();
    let b_const = const_imm_value(graph, b).is_some();
    match (a_const, b_const) {
        (true, false) => (b, a),
        (false, true) | (true, true) => (a, b),
        (false, false) => {
            let (ca, cb) = (graph.leaf(a), graph.leaf(b));
            if ca > cb {
                (b, a)
            } else {
                (a, b)
            }
        }
    }
}

/// Normalizes comparison operand order by ascending class id, inverting
/// the condition via `swap_args` so the comparison's meaning is preserved.
fn canonicalize_compare(graph: &mut EGraph, cond: IntCC, a: Value, b: Value) -> (IntCC, Value, Value) {
    let (ca, cb) = (graph.leaf(a), graph.leaf(b));
    if ca > cb {
        (cond.swap_args(), b, a)
    } else {
        (cond, a, b)
    }
}

fn const_imm_value(graph: &EGraph, v: Value) -> Option<Immediate> {
    let &class = graph.value_class.get(&v)?;
    let class = graph.resolve(class);
    graph.nodes[class.0 as usize].iter().find_map(|(n, _)| match n {
        ENode::Const(imm) => Some(*imm),
        _ => None,
    })
}

fn zero_imm(ty: Type) -> Immediate {
    match ty {
        Type::I64 => Immediate::I64(0),
        _ => Immediate::I32(0),
    }
}

/// Width-correct constant folding: the result takes the instruction's own
/// result type rather than always narrowing to 32 bits, so e.g.
/// `iadd(iconst.i64 0x1_0000_0001, iconst.i64 0)` folds to `I64`, not a
/// truncated `I32`.
fn fold_binary(opcode: Opcode, a: Immediate, b: Immediate, result_ty: Type) -> Option<Immediate> {
    let (a, b) = (a.as_i64()?, b.as_i64()?);
    let v = match opcode {
        Opcode::Iadd => a.wrapping_add(b),
        Opcode::Isub => a.wrapping_sub(b),
        Opcode::Imul => a.wrapping_mul(b),
        Opcode::Band => a & b,
        Opcode::Bor => a | b,
        Opcode::Bxor => a ^ b,
        _ => return None,
    };
    Some(match result_ty {
        Type::I64 => Immediate::I64(v),
        _ => Immediate::I32(v as i32),
    })
}

fn algebraic_identity(opcode: Opcode, a: Value, b: Value, ca: Option<Immediate>, cb: Option<Immediate>) -> Option<Value> {
    let is_zero = |i: Immediate| matches!(i.as_i64(), Some(0));
    let is_one = |i: Immediate| matches!(i.as_i64(), Some(1));
    match opcode {
        Opcode::Iadd | Opcode::Bor | Opcode::Bxor if cb.is_some_and(is_zero) => Some(a),
        Opcode::Iadd | Opcode::Bor if ca.is_some_and(is_zero) => Some(b),
        Opcode::Isub if cb.is_some_and(is_zero) => Some(a),
        Opcode::Imul if cb.is_some_and(is_one) => Some(a),
        Opcode::Imul if ca.is_some_and(is_one) => Some(b),
        Opcode::Band | Opcode::Bor if a == b => Some(a),
        _ => None,
    }
}

fn eval_intcc(cond: IntCC, a: i64, b: i64) -> bool {
    match cond {
        IntCC::Eq => a == b,
        IntCC::Ne => a != b,
        IntCC::SignedLt => a < b,
        IntCC::SignedLe => a <= b,
        IntCC::SignedGt => a > b,
        IntCC::SignedGe => a >= b,
        IntCC::UnsignedLt => (a as u64) < (b as u64),
        IntCC::UnsignedLe => (a as u64) <= (b as u64),
        IntCC::UnsignedGt => (a as u64) > (b as u64),
        IntCC::UnsignedGe => (a as u64) >= (b as u64),
    }
}

/// Compares the shape actually visible to later passes, used only to
/// decide whether splicing `new` in would be a no-op.
fn same_shape(old: &InstructionData, new: &InstructionData) -> bool {
    format!("{old:?}") == format!("{new:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstBuilder, Signature, Terminator};

    fn build_block() -> (Function, Block) {
        let mut func = Function::with_name_signature("f", Signature::default());
        let entry = func.make_block();
        func.entry_block = Some(entry);
        (func, entry)
    }

    #[test]
    fn folds_i64_constant_add_without_truncating() {
        let (mut func, block) = build_block();
        let sum = {
            let mut ins = InstBuilder::new(&mut func, block);
            let a = ins.iconst(Type::I64, 0x1_0000_0001);
            let b = ins.iconst(Type::I64, 0);
            ins.binary(Opcode::Iadd, Type::I64, a, b)
        };
        func.set_terminator(block, Terminator::Return { values: vec![sum] });

        run(&mut func);

        let sum_inst = func.block_insts(block)[2];
        match &func.dfg.insts[sum_inst] {
            InstructionData::UnaryImm { imm: Immediate::I64(v), .. } => assert_eq!(*v, 0x1_0000_0001),
            other => panic!("expected a 64-bit constant fold, got {other:?}"),
        }
    }

    #[test]
    fn band_with_zero_folds_to_a_correctly_widthed_zero() {
        let (mut func, block) = build_block();
        let p = func.append_block_param(block, Type::I64);
        let anded = {
            let mut ins = InstBuilder::new(&mut func, block);
            let z = ins.iconst(Type::I64, 0);
            ins.binary(Opcode::Band, Type::I64, p, z)
        };
        func.set_terminator(block, Terminator::Return { values: vec![anded] });

        run(&mut func);

        let and_inst = func.block_insts(block)[1];
        match &func.dfg.insts[and_inst] {
            InstructionData::UnaryImm { imm: Immediate::I64(v), .. } => assert_eq!(*v, 0),
            other => panic!("expected an I64 zero, got {other:?}"),
        }
    }

    #[test]
    fn add_zero_collapses_to_a_copy_of_the_other_operand() {
        let (mut func, block) = build_block();
        let x = func.append_block_param(block, Type::I32);
        let sum = {
            let mut ins = InstBuilder::new(&mut func, block);
            let z = ins.iconst(Type::I32, 0);
            ins.binary(Opcode::Iadd, Type::I32, x, z)
        };
        func.set_terminator(block, Terminator::Return { values: vec![sum] });

        run(&mut func);

        let sum_inst = func.block_insts(block)[1];
        assert!(matches!(func.dfg.insts[sum_inst], InstructionData::Copy { arg } if arg == x));
    }

    #[test]
    fn multiply_by_power_of_two_becomes_a_shift() {
        let (mut func, block) = build_block();
        let p = func.append_block_param(block, Type::I32);
        let prod = {
            let mut ins = InstBuilder::new(&mut func, block);
            let eight = ins.iconst(Type::I32, 8);
            ins.binary(Opcode::Imul, Type::I32, p, eight)
        };
        func.set_terminator(block, Terminator::Return { values: vec![prod] });

        run(&mut func);

        let prod_inst = func.block_insts(block)[1];
        match &func.dfg.insts[prod_inst] {
            InstructionData::BinaryImm {
                opcode: Opcode::Ishl,
                imm: Immediate::I32(3),
                ..
            } => {}
            other => panic!("expected a shift by 3, got {other:?}"),
        }
    }

    #[test]
    fn trapping_instructions_are_never_rewritten() {
        let (mut func, block) = build_block();
        let q = {
            let mut ins = InstBuilder::new(&mut func, block);
            let a = ins.iconst(Type::I32, 1);
            let b = ins.iconst(Type::I32, 0);
            ins.binary(Opcode::SDiv, Type::I32, a, b)
        };
        func.set_terminator(block, Terminator::Return { values: vec![q] });

        let div_inst = func.block_insts(block)[2];
        let before = format!("{:?}", func.dfg.insts[div_inst]);
        run(&mut func);
        let after = format!("{:?}", func.dfg.insts[div_inst]);
        assert_eq!(before, after);
    }

    #[test]
    fn commutative_constant_operand_is_canonicalized_to_the_rhs() {
        let (mut func, block) = build_block();
        let x = func.append_block_param(block, Type::I32);
        let (c, sum) = {
            let mut ins = InstBuilder::new(&mut func, block);
            let c = ins.iconst(Type::I32, 5);
            let sum = ins.binary(Opcode::Iadd, Type::I32, c, x);
            (c, sum)
        };
        func.set_terminator(block, Terminator::Return { values: vec![sum] });

        run(&mut func);

        let sum_inst = func.block_insts(block)[1];
        match &func.dfg.insts[sum_inst] {
            InstructionData::Binary { args, .. } => assert_eq!(*args, [x, c]),
            other => panic!("expected canonicalized operand order, got {other:?}"),
        }
    }
}
