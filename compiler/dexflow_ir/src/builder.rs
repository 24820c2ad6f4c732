//! Construction and validation of [`IrCode`].
//!
//! The builder appends blocks, instructions and phis in any order and
//! checks structural well-formedness once, in [`IrCodeBuilder::build`].
//! Use lists, predecessor lists and in-block positions are derived there.

use smallvec::SmallVec;

use crate::app::{AppView, MethodId};
use crate::code::{
    BasicBlock, BlockId, CatchGuard, CatchHandler, InstrId, Instruction, IrCode, Opcode, Value,
    ValueDefinition, ValueId,
};
use crate::effects::instruction_type_can_throw;
use crate::types::TypeElement;

/// Structural error found while building IR.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("method has no blocks")]
    Empty,
    #[error("block {0:?} does not end in a terminator")]
    MissingTerminator(BlockId),
    #[error("terminator {instr:?} is not the last instruction of block {block:?}")]
    MisplacedTerminator { block: BlockId, instr: InstrId },
    #[error("block {block:?} targets nonexistent block {target:?}")]
    DanglingTarget { block: BlockId, target: BlockId },
    #[error("block {0:?} has catch handlers and more than one throwing instruction")]
    MultipleThrowingInstructions(BlockId),
    #[error("value {0:?} is used but never defined")]
    UndefinedValue(ValueId),
}

/// Incremental builder for one method body. The first block created is the
/// entry block.
pub struct IrCodeBuilder {
    context: MethodId,
    context_is_static: bool,
    values: Vec<Value>,
    instrs: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
}

impl IrCodeBuilder {
    pub fn new(context: MethodId, context_is_static: bool) -> Self {
        IrCodeBuilder {
            context,
            context_is_static,
            values: Vec::new(),
            instrs: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Builder for the body of `context`, as declared in `app`.
    pub fn for_method(app: &AppView, context: MethodId) -> Self {
        Self::new(context, app.method(context).is_static())
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId::from_usize(self.blocks.len());
        self.blocks.push(BasicBlock {
            id,
            instructions: Vec::new(),
            phis: Vec::new(),
            catch_handlers: Vec::new(),
            predecessors: Vec::new(),
        });
        id
    }

    /// Append an instruction without an output value.
    pub fn push(&mut self, block: BlockId, opcode: Opcode) -> InstrId {
        self.push_instr(block, opcode, None)
    }

    /// Append an instruction defining a new value of type `ty`.
    pub fn push_value(&mut self, block: BlockId, opcode: Opcode, ty: TypeElement) -> ValueId {
        let value = ValueId::from_usize(self.values.len());
        let instr = self.push_instr(block, opcode, Some(value));
        self.values.push(Value {
            ty,
            definition: ValueDefinition::Instruction(instr),
            users: Vec::new(),
            phi_users: Vec::new(),
        });
        value
    }

    fn push_instr(&mut self, block: BlockId, opcode: Opcode, out: Option<ValueId>) -> InstrId {
        let instr = InstrId::from_usize(self.instrs.len());
        self.instrs.push(Instruction { block, opcode, out });
        self.blocks[block.index()].instructions.push(instr);
        instr
    }

    /// Add a phi at the head of `block`. Operands are set separately, once
    /// the incoming values exist.
    pub fn add_phi(&mut self, block: BlockId, ty: TypeElement) -> ValueId {
        let value = ValueId::from_usize(self.values.len());
        self.values.push(Value {
            ty,
            definition: ValueDefinition::Phi {
                block,
                operands: SmallVec::new(),
            },
            users: Vec::new(),
            phi_users: Vec::new(),
        });
        self.blocks[block.index()].phis.push(value);
        value
    }

    pub fn set_phi_operands(&mut self, phi: ValueId, new_operands: &[ValueId]) {
        if let ValueDefinition::Phi { operands, .. } = &mut self.values[phi.index()].definition {
            *operands = new_operands.iter().copied().collect();
        } else {
            debug_assert!(false, "set_phi_operands: {phi:?} is not a phi");
        }
    }

    pub fn add_catch_handler(&mut self, block: BlockId, guard: CatchGuard, target: BlockId) {
        self.blocks[block.index()]
            .catch_handlers
            .push(CatchHandler { guard, target });
    }

    /// Validate and finish the code.
    pub fn build(self) -> Result<IrCode, IrError> {
        if self.blocks.is_empty() {
            return Err(IrError::Empty);
        }
        self.validate()?;

        let mut positions = vec![0u32; self.instrs.len()];
        for block in &self.blocks {
            for (position, &instr) in block.instructions.iter().enumerate() {
                positions[instr.index()] = u32::try_from(position).unwrap_or(u32::MAX);
            }
        }

        let mut code = IrCode {
            context: self.context,
            context_is_static: self.context_is_static,
            values: self.values,
            instrs: self.instrs,
            blocks: self.blocks,
            entry: BlockId::new(0),
            positions,
            modification_count: 0,
        };
        link_users(&mut code);
        code.recompute_predecessors();

        tracing::trace!(
            blocks = code.num_blocks(),
            values = code.num_values(),
            "built IR"
        );
        Ok(code)
    }

    fn validate(&self) -> Result<(), IrError> {
        let num_values = self.values.len();
        let check_block = |block: BlockId, target: BlockId| {
            if target.index() < self.blocks.len() {
                Ok(())
            } else {
                Err(IrError::DanglingTarget { block, target })
            }
        };

        for block in &self.blocks {
            let Some((&last, rest)) = block.instructions.split_last() else {
                return Err(IrError::MissingTerminator(block.id));
            };
            if !self.instrs[last.index()].opcode.is_terminator() {
                return Err(IrError::MissingTerminator(block.id));
            }
            if let Some(&instr) = rest
                .iter()
                .find(|i| self.instrs[i.index()].opcode.is_terminator())
            {
                return Err(IrError::MisplacedTerminator {
                    block: block.id,
                    instr,
                });
            }
            for target in self.instrs[last.index()].opcode.targets() {
                check_block(block.id, target)?;
            }
            for handler in &block.catch_handlers {
                check_block(block.id, handler.target)?;
            }
            if block.has_catch_handlers()
                && block
                    .instructions
                    .iter()
                    .filter(|i| instruction_type_can_throw(&self.instrs[i.index()].opcode))
                    .count()
                    > 1
            {
                return Err(IrError::MultipleThrowingInstructions(block.id));
            }
        }

        for instr in &self.instrs {
            if let Some(&undefined) = instr
                .opcode
                .inputs()
                .iter()
                .find(|v| v.index() >= num_values)
            {
                return Err(IrError::UndefinedValue(undefined));
            }
        }
        for value in &self.values {
            if let ValueDefinition::Phi { operands, .. } = &value.definition {
                if let Some(&undefined) = operands.iter().find(|v| v.index() >= num_values) {
                    return Err(IrError::UndefinedValue(undefined));
                }
            }
        }
        Ok(())
    }
}

fn link_users(code: &mut IrCode) {
    for index in 0..code.instrs.len() {
        let instr = InstrId::from_usize(index);
        for input in code.instrs[index].opcode.inputs() {
            let users = &mut code.values[input.index()].users;
            if !users.contains(&instr) {
                users.push(instr);
            }
        }
    }
    for index in 0..code.values.len() {
        let phi = ValueId::from_usize(index);
        let operands = match &code.values[index].definition {
            ValueDefinition::Phi { operands, .. } => operands.clone(),
            ValueDefinition::Instruction(_) => continue,
        };
        for operand in operands {
            let phi_users = &mut code.values[operand.index()].phi_users;
            if !phi_users.contains(&phi) {
                phi_users.push(phi);
            }
        }
    }
}
