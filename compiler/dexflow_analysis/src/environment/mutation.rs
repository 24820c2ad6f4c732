//! Can a freshly built object be modified before the method returns?
//!
//! A forward dataflow from the object's definition to the normal exits.
//! The per-block state records whether the object has escaped into some
//! place other code could reach. Before it escapes, only direct stores
//! into it count as mutations; afterwards any side effect might mutate it.

use std::collections::VecDeque;

use dexflow_ir::effects::may_have_side_effects;
use dexflow_ir::{AppView, BlockId, InstrId, IrCode, Opcode, TypeId, ValueId};
use rustc_hash::FxHashSet;

/// Is `value` possibly mutated between its definition and a normal exit?
///
/// Instructions in `consumed` were already accounted for while building
/// the value graph (the stores that initialize an array, the constructor
/// call of an instance).
pub(super) fn may_be_mutated(
    code: &IrCode,
    app: &AppView,
    value: ValueId,
    consumed: &FxHashSet<InstrId>,
) -> bool {
    let Some(definition) = code.value(value).definition_instr() else {
        return true;
    };
    let aliases = aliases_of(code, value);
    // Merged into a phi, the object is no longer tracked precisely.
    if aliases.iter().any(|&alias| !code.phi_users(alias).is_empty()) {
        return true;
    }

    let context_holder = app.method(code.context()).holder;
    let scan = MutationScan {
        code,
        app,
        aliases: &aliases,
        consumed,
        context_holder,
    };

    let def_block = code.instr(definition).block;
    let mut exit_states: Vec<Option<bool>> = vec![None; code.num_blocks()];
    let mut worklist: VecDeque<BlockId> = VecDeque::new();
    let mut iterations = 0usize;

    // The defining block is first entered at the definition itself.
    let start = code.index_in_block(definition) + 1;
    let Some(escaped) = scan.block(def_block, start, false) else {
        return true;
    };
    exit_states[def_block.index()] = Some(escaped);
    worklist.extend(code.successors(def_block));

    while let Some(block) = worklist.pop_front() {
        iterations += 1;
        let entry = code
            .predecessors(block)
            .iter()
            .filter_map(|pred| exit_states[pred.index()])
            .fold(false, |acc, escaped| acc || escaped);
        let Some(escaped) = scan.block(block, 0, entry) else {
            tracing::trace!(?value, ?block, "mutation possible");
            return true;
        };
        if exit_states[block.index()] != Some(escaped) {
            exit_states[block.index()] = Some(escaped);
            worklist.extend(code.successors(block));
        }
    }
    tracing::trace!(?value, iterations, "not mutated before exit");
    false
}

/// `value` and every value that may alias it through an assume, move or
/// check-cast.
fn aliases_of(code: &IrCode, value: ValueId) -> FxHashSet<ValueId> {
    let mut aliases = FxHashSet::default();
    let mut worklist = vec![value];
    aliases.insert(value);
    while let Some(current) = worklist.pop() {
        for &user in code.users(current) {
            let instr = code.instr(user);
            let (
                Opcode::Assume { src } | Opcode::Move { src } | Opcode::CheckCast { src, .. },
                Some(out),
            ) = (&instr.opcode, instr.out)
            else {
                continue;
            };
            if *src == current && aliases.insert(out) {
                worklist.push(out);
            }
        }
    }
    aliases
}

struct MutationScan<'a> {
    code: &'a IrCode,
    app: &'a AppView,
    aliases: &'a FxHashSet<ValueId>,
    consumed: &'a FxHashSet<InstrId>,
    context_holder: TypeId,
}

impl MutationScan<'_> {
    fn is_tracked(&self, value: ValueId) -> bool {
        self.aliases.contains(&value)
    }

    /// Scan `block` from position `start`. Returns the escaped state at
    /// the block's end, or `None` if the value may be mutated.
    fn block(&self, block: BlockId, start: usize, mut escaped: bool) -> Option<bool> {
        let instructions = &self.code.block(block).instructions;
        for &instr in instructions.iter().skip(start) {
            let opcode = self.code.opcode(instr);
            if self.consumed.contains(&instr) {
                // Stored into another value under construction.
                if opcode.inputs().iter().skip(1).any(|&v| self.is_tracked(v)) {
                    escaped = true;
                }
                continue;
            }
            match opcode {
                Opcode::ArrayPut { array, value, .. } => {
                    if self.is_tracked(*array) {
                        return None;
                    }
                    if self.is_tracked(*value) {
                        escaped = true;
                    }
                }
                Opcode::FillArrayData { array, .. } => {
                    if self.is_tracked(*array) {
                        return None;
                    }
                }
                Opcode::InstancePut { object, value, .. } => {
                    if self.is_tracked(*object) {
                        return None;
                    }
                    if self.is_tracked(*value) {
                        escaped = true;
                    }
                }
                Opcode::Invoke { args, .. } if args.iter().any(|&a| self.is_tracked(a)) => {
                    return None;
                }
                Opcode::StaticPut { field, value } => {
                    let holder = self.app.field(*field).holder;
                    let quiet = holder == self.context_holder
                        || !self
                            .app
                            .class_initialization_may_have_side_effects(holder, Some(self.code.context()));
                    if self.is_tracked(*value) {
                        if !quiet {
                            return None;
                        }
                        escaped = true;
                    } else if escaped && !quiet {
                        return None;
                    }
                }
                _ => {
                    if escaped && may_have_side_effects(self.code, self.app, instr) {
                        return None;
                    }
                }
            }
        }
        Some(escaped)
    }
}
