//! SSA IR for one method body.
//!
//! # Structure
//!
//! An [`IrCode`] owns three arenas: values, instructions and blocks. Nodes
//! refer to each other by [`ValueId`], [`InstrId`] and [`BlockId`], which
//! are the identity keys for every set and map in the analyses: two
//! instructions with identical opcodes are still distinct.
//!
//! Each [`BasicBlock`] is an ordered list of instructions ending in exactly
//! one terminator (`Goto`, `If`, `Return`, `Throw`). A block with catch
//! handlers contains at most one instruction that can throw; its
//! exceptional edges go to each handler's target.
//!
//! Values are defined either by an instruction (its `out`) or by a phi at
//! the head of a block. Use lists are maintained by [`IrCodeBuilder`] and
//! the few mutation entry points below.
//!
//! [`IrCodeBuilder`]: crate::IrCodeBuilder

use smallvec::{smallvec, SmallVec};

use crate::app::{FieldId, MethodId, TypeId};
use crate::effects::instruction_type_can_throw;
use crate::types::TypeElement;

// ── ID newtypes ─────────────────────────────────────────────────────

index_newtype! {
    /// SSA value handle within one [`IrCode`].
    ValueId
}

index_newtype! {
    /// Instruction handle within one [`IrCode`].
    InstrId
}

index_newtype! {
    /// Basic block handle within one [`IrCode`].
    BlockId
}

// ── Operator kinds ──────────────────────────────────────────────────

/// Comparison of an `If`. With a single operand it compares against zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IfKind {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl IfKind {
    pub fn inverted(self) -> IfKind {
        match self {
            IfKind::Eq => IfKind::Ne,
            IfKind::Ne => IfKind::Eq,
            IfKind::Lt => IfKind::Ge,
            IfKind::Ge => IfKind::Lt,
            IfKind::Gt => IfKind::Le,
            IfKind::Le => IfKind::Gt,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinopKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl BinopKind {
    /// Bitwise and shift operators.
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            BinopKind::And
                | BinopKind::Or
                | BinopKind::Xor
                | BinopKind::Shl
                | BinopKind::Shr
                | BinopKind::Ushr
        )
    }

    /// Integer division by zero throws.
    pub fn can_throw(self) -> bool {
        matches!(self, BinopKind::Div | BinopKind::Rem)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Static,
    /// Private methods and constructors.
    Direct,
    Virtual,
    Interface,
    Super,
}

impl InvokeKind {
    #[inline]
    pub fn has_receiver(self) -> bool {
        self != InvokeKind::Static
    }

    /// Dispatch depends on the receiver's runtime type.
    #[inline]
    pub fn is_dynamic(self) -> bool {
        matches!(self, InvokeKind::Virtual | InvokeKind::Interface | InvokeKind::Super)
    }
}

/// Which exceptions a catch handler catches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CatchGuard {
    /// `catch (Throwable)` or `finally`.
    All,
    Type(TypeId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CatchHandler {
    pub guard: CatchGuard,
    pub target: BlockId,
}

// ── Instructions ────────────────────────────────────────────────────

/// One instruction kind per variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// IR argument `index`; index 0 is `this` in instance methods.
    Argument { index: usize },
    ConstNumber { value: i64 },
    ConstNull,
    ConstString { value: String },
    ConstClass { class: TypeId },
    /// Refines the type of `src` (e.g. non-null after a check).
    Assume { src: ValueId },
    Move { src: ValueId },
    CheckCast { src: ValueId, ty: TypeId },
    Binop {
        kind: BinopKind,
        left: ValueId,
        right: ValueId,
    },
    StaticGet { field: FieldId },
    StaticPut { field: FieldId, value: ValueId },
    InstanceGet { field: FieldId, object: ValueId },
    InstancePut {
        field: FieldId,
        object: ValueId,
        value: ValueId,
    },
    ArrayGet { array: ValueId, index: ValueId },
    ArrayPut {
        array: ValueId,
        index: ValueId,
        value: ValueId,
    },
    ArrayLength { array: ValueId },
    NewInstance { class: TypeId },
    NewArrayEmpty { ty: TypeId, size: ValueId },
    NewArrayFilled {
        ty: TypeId,
        elements: SmallVec<[ValueId; 4]>,
    },
    FillArrayData { array: ValueId, data: Vec<i64> },
    Invoke {
        kind: InvokeKind,
        method: MethodId,
        args: SmallVec<[ValueId; 4]>,
    },
    InitClass { class: TypeId },
    DebugPosition,

    // Terminators
    Goto { target: BlockId },
    If {
        kind: IfKind,
        left: ValueId,
        /// `None` compares `left` against zero (or null).
        right: Option<ValueId>,
        true_target: BlockId,
        fallthrough: BlockId,
    },
    Return { value: Option<ValueId> },
    Throw { exception: ValueId },
}

impl Opcode {
    /// Values read by this instruction, in operand order.
    pub fn inputs(&self) -> SmallVec<[ValueId; 4]> {
        match self {
            Opcode::Argument { .. }
            | Opcode::ConstNumber { .. }
            | Opcode::ConstNull
            | Opcode::ConstString { .. }
            | Opcode::ConstClass { .. }
            | Opcode::StaticGet { .. }
            | Opcode::NewInstance { .. }
            | Opcode::InitClass { .. }
            | Opcode::DebugPosition
            | Opcode::Goto { .. }
            | Opcode::Return { value: None } => SmallVec::new(),

            Opcode::Assume { src } | Opcode::Move { src } | Opcode::CheckCast { src, .. } => {
                smallvec![*src]
            }
            Opcode::Binop { left, right, .. } => smallvec![*left, *right],
            Opcode::StaticPut { value, .. } => smallvec![*value],
            Opcode::InstanceGet { object, .. } => smallvec![*object],
            Opcode::InstancePut { object, value, .. } => smallvec![*object, *value],
            Opcode::ArrayGet { array, index } => smallvec![*array, *index],
            Opcode::ArrayPut {
                array,
                index,
                value,
            } => smallvec![*array, *index, *value],
            Opcode::ArrayLength { array } | Opcode::FillArrayData { array, .. } => {
                smallvec![*array]
            }
            Opcode::NewArrayEmpty { size, .. } => smallvec![*size],
            Opcode::NewArrayFilled { elements, .. } => elements.clone(),
            Opcode::Invoke { args, .. } => args.clone(),
            Opcode::If { left, right, .. } => {
                let mut inputs = smallvec![*left];
                inputs.extend(*right);
                inputs
            }
            Opcode::Return { value: Some(v) } => smallvec![*v],
            Opcode::Throw { exception } => smallvec![*exception],
        }
    }

    #[inline]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Goto { .. } | Opcode::If { .. } | Opcode::Return { .. } | Opcode::Throw { .. }
        )
    }

    /// `Goto` or `If`.
    #[inline]
    pub fn is_jump(&self) -> bool {
        matches!(self, Opcode::Goto { .. } | Opcode::If { .. })
    }

    /// The output is the input under another name (same object).
    #[inline]
    pub fn could_introduce_an_alias(&self) -> bool {
        matches!(
            self,
            Opcode::Assume { .. } | Opcode::Move { .. } | Opcode::CheckCast { .. }
        )
    }

    /// Normal-flow successor blocks of a terminator.
    pub fn targets(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Opcode::Goto { target } => smallvec![*target],
            Opcode::If {
                true_target,
                fallthrough,
                ..
            } => {
                if true_target == fallthrough {
                    smallvec![*true_target]
                } else {
                    smallvec![*true_target, *fallthrough]
                }
            }
            _ => SmallVec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub block: BlockId,
    pub opcode: Opcode,
    pub out: Option<ValueId>,
}

// ── Values and blocks ───────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueDefinition {
    Instruction(InstrId),
    Phi {
        block: BlockId,
        operands: SmallVec<[ValueId; 2]>,
    },
}

#[derive(Clone, Debug)]
pub struct Value {
    pub ty: TypeElement,
    pub definition: ValueDefinition,
    /// Instructions reading this value, each listed once.
    pub users: Vec<InstrId>,
    /// Phis reading this value, each listed once.
    pub phi_users: Vec<ValueId>,
}

impl Value {
    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self.definition, ValueDefinition::Phi { .. })
    }

    pub fn definition_instr(&self) -> Option<InstrId> {
        match self.definition {
            ValueDefinition::Instruction(instr) => Some(instr),
            ValueDefinition::Phi { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<InstrId>,
    pub phis: Vec<ValueId>,
    pub catch_handlers: Vec<CatchHandler>,
    /// Normal and exceptional predecessors, deduplicated.
    pub predecessors: Vec<BlockId>,
}

impl BasicBlock {
    #[inline]
    pub fn has_catch_handlers(&self) -> bool {
        !self.catch_handlers.is_empty()
    }
}

// ── IrCode ──────────────────────────────────────────────────────────

/// One method body.
#[derive(Clone, Debug)]
pub struct IrCode {
    pub(crate) context: MethodId,
    pub(crate) context_is_static: bool,
    pub(crate) values: Vec<Value>,
    pub(crate) instrs: Vec<Instruction>,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) entry: BlockId,
    /// Position of each instruction within its block.
    pub(crate) positions: Vec<u32>,
    pub(crate) modification_count: u64,
}

impl IrCode {
    /// The method this code belongs to.
    #[inline]
    pub fn context(&self) -> MethodId {
        self.context
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.context_is_static
    }

    #[inline]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    #[inline]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    #[inline]
    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.index()]
    }

    #[inline]
    pub fn opcode(&self, id: InstrId) -> &Opcode {
        &self.instrs[id.index()].opcode
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().map(|b| b.id)
    }

    /// All instructions, block by block in block order.
    pub fn instructions(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.blocks.iter().flat_map(|b| b.instructions.iter().copied())
    }

    /// Incremented by every mutation of the IR.
    #[inline]
    pub fn modification_count(&self) -> u64 {
        self.modification_count
    }

    // ── Values ──────────────────────────────────────────────────────

    /// Follow `Assume`/`Move` renamings to the underlying value.
    pub fn aliased_value(&self, mut value: ValueId) -> ValueId {
        loop {
            match self.definition_opcode(value) {
                Some(Opcode::Assume { src } | Opcode::Move { src }) => value = *src,
                _ => return value,
            }
        }
    }

    /// Opcode of the instruction defining `value`, `None` for phis.
    pub fn definition_opcode(&self, value: ValueId) -> Option<&Opcode> {
        self.value(value)
            .definition_instr()
            .map(|instr| self.opcode(instr))
    }

    #[inline]
    pub fn users(&self, value: ValueId) -> &[InstrId] {
        &self.value(value).users
    }

    #[inline]
    pub fn phi_users(&self, value: ValueId) -> &[ValueId] {
        &self.value(value).phi_users
    }

    /// Integral value of a constant; `null` is zero.
    pub fn const_number(&self, value: ValueId) -> Option<i64> {
        match self.definition_opcode(self.aliased_value(value))? {
            Opcode::ConstNumber { value } => Some(*value),
            Opcode::ConstNull => Some(0),
            _ => None,
        }
    }

    #[inline]
    pub fn is_zero(&self, value: ValueId) -> bool {
        self.const_number(value) == Some(0)
    }

    pub fn is_constant(&self, value: ValueId) -> bool {
        matches!(
            self.definition_opcode(self.aliased_value(value)),
            Some(
                Opcode::ConstNumber { .. }
                    | Opcode::ConstNull
                    | Opcode::ConstString { .. }
                    | Opcode::ConstClass { .. }
            )
        )
    }

    pub fn argument_index(&self, value: ValueId) -> Option<usize> {
        match self.definition_opcode(self.aliased_value(value))? {
            Opcode::Argument { index } => Some(*index),
            _ => None,
        }
    }

    /// The receiver of an instance method.
    pub fn is_this(&self, value: ValueId) -> bool {
        !self.context_is_static && self.argument_index(value) == Some(0)
    }

    /// Argument values in index order.
    pub fn arguments(&self) -> Vec<ValueId> {
        let mut args: Vec<(usize, ValueId)> = self
            .block(self.entry)
            .instructions
            .iter()
            .filter_map(|&i| match (&self.instr(i).opcode, self.instr(i).out) {
                (Opcode::Argument { index }, Some(out)) => Some((*index, out)),
                _ => None,
            })
            .collect();
        args.sort_unstable_by_key(|&(index, _)| index);
        args.into_iter().map(|(_, v)| v).collect()
    }

    // ── Blocks ──────────────────────────────────────────────────────

    #[inline]
    pub fn index_in_block(&self, instr: InstrId) -> usize {
        self.positions[instr.index()] as usize
    }

    /// Is `a` before `b`? Both must be in the same block.
    pub fn precedes_in_block(&self, a: InstrId, b: InstrId) -> bool {
        debug_assert_eq!(self.instr(a).block, self.instr(b).block);
        self.index_in_block(a) < self.index_in_block(b)
    }

    /// The block's last instruction.
    pub fn terminator(&self, block: BlockId) -> Option<InstrId> {
        self.block(block).instructions.last().copied()
    }

    /// Normal-flow successors.
    pub fn normal_successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        self.terminator(block)
            .map(|t| self.opcode(t).targets())
            .unwrap_or_default()
    }

    /// Normal and exceptional successors, deduplicated.
    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 4]> {
        let mut successors: SmallVec<[BlockId; 4]> =
            self.normal_successors(block).into_iter().collect();
        for handler in &self.block(block).catch_handlers {
            if !successors.contains(&handler.target) {
                successors.push(handler.target);
            }
        }
        successors
    }

    #[inline]
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        &self.block(block).predecessors
    }

    #[inline]
    pub fn catch_handlers(&self, block: BlockId) -> &[CatchHandler] {
        &self.block(block).catch_handlers
    }

    /// The instruction through which a block with catch handlers can throw.
    pub fn exceptional_exit(&self, block: BlockId) -> Option<InstrId> {
        let block = self.block(block);
        if !block.has_catch_handlers() {
            return None;
        }
        block
            .instructions
            .iter()
            .copied()
            .find(|&i| instruction_type_can_throw(self.opcode(i)))
    }

    /// Blocks ending in `Return`.
    pub fn normal_exit_blocks(&self) -> Vec<BlockId> {
        self.block_ids()
            .filter(|&b| {
                self.terminator(b)
                    .is_some_and(|t| matches!(self.opcode(t), Opcode::Return { .. }))
            })
            .collect()
    }

    /// No block has more than one successor.
    pub fn is_straight_line(&self) -> bool {
        self.block_ids().all(|b| self.successors(b).len() <= 1)
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Replace the opcode of `instr`, keeping its output value.
    pub fn replace_opcode(&mut self, instr: InstrId, opcode: Opcode) {
        for input in self.instrs[instr.index()].opcode.inputs() {
            self.values[input.index()].users.retain(|&u| u != instr);
        }
        for input in opcode.inputs() {
            let users = &mut self.values[input.index()].users;
            if !users.contains(&instr) {
                users.push(instr);
            }
        }
        self.instrs[instr.index()].opcode = opcode;
        self.recompute_predecessors();
        self.modification_count += 1;
    }

    pub fn add_catch_handler(&mut self, block: BlockId, handler: CatchHandler) {
        self.blocks[block.index()].catch_handlers.push(handler);
        self.recompute_predecessors();
        self.modification_count += 1;
    }

    pub(crate) fn recompute_predecessors(&mut self) {
        for block in &mut self.blocks {
            block.predecessors.clear();
        }
        for index in 0..self.blocks.len() {
            let block = BlockId::from_usize(index);
            for successor in self.successors(block) {
                if let Some(target) = self.blocks.get_mut(successor.index()) {
                    target.predecessors.push(block);
                }
            }
        }
    }
}
