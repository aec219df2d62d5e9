use crate::ir::{Block, Type};

/// One entry of the structured-control stack (§4.1: "Structured control
/// (block/loop/if) lowers to basic blocks; branch stack is maintained
/// during translation").
pub enum ControlFrame {
    Block {
        merge_block: Block,
        result_types: Vec<Type>,
        /// Operand-stack height at frame entry; `end`/`br` truncate back
        /// to this plus the frame's result arity.
        stack_height: usize,
        reachable: bool,
    },
    Loop {
        header_block: Block,
        /// `loop`'s branch target for `br`/`br_if 0` is back to the header,
        /// which takes the loop's *parameter* types, not its eventual
        /// result types.
        param_types: Vec<Type>,
        stack_height: usize,
        reachable: bool,
    },
    If {
        merge_block: Block,
        else_block: Block,
        has_else: bool,
        result_types: Vec<Type>,
        stack_height: usize,
        reachable: bool,
    },
}

impl ControlFrame {
    /// The block a `br`/`br_if` targeting this frame should jump to, and
    /// the arity that branch must supply.
    pub fn branch_target(&self) -> (Block, usize) {
        match self {
            ControlFrame::Block {
                merge_block,
                result_types,
                ..
            } => (*merge_block, result_types.len()),
            ControlFrame::Loop {
                header_block,
                param_types,
                ..
            } => (*header_block, param_types.len()),
            ControlFrame::If {
                merge_block,
                result_types,
                ..
            } => (*merge_block, result_types.len()),
        }
    }

    pub fn stack_height(&self) -> usize {
        match self {
            ControlFrame::Block { stack_height, .. }
            | ControlFrame::Loop { stack_height, .. }
            | ControlFrame::If { stack_height, .. } => *stack_height,
        }
    }

    pub fn reachable(&self) -> bool {
        match self {
            ControlFrame::Block { reachable, .. }
            | ControlFrame::Loop { reachable, .. }
            | ControlFrame::If { reachable, .. } => *reachable,
        }
    }

    pub fn set_reachable(&mut self, r: bool) {
        match self {
            ControlFrame::Block { reachable, .. }
            | ControlFrame::Loop { reachable, .. }
            | ControlFrame::If { reachable, .. } => *reachable = r,
        }
    }
}
