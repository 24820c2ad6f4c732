//! Simple-inlining constraints.
//!
//! [`SimpleInliningConstraintAnalysis`] finds the conditions on a method's
//! arguments under which its body, once inlined at a call site with
//! those arguments, reduces to a trivial exit: at most a few instructions
//! before a `return`, or a `throw` that leaves the method. Branches on
//! argument values are what make the difference, e.g.
//!
//! ```text
//! static boolean isNull(Object a) { if (a == null) return true; return false; }
//! ```
//!
//! is trivial for every argument, while a method that only returns early
//! when `a` is null is trivial under `a == null`.

mod constraint;

use dexflow_ir::{AppView, BlockId, IfKind, InstrId, IrCode, Opcode, ValueId};

use crate::options::AnalysisOptions;
use crate::stack::ensure_sufficient_stack;

pub use constraint::{
    ArgumentChanges, ArgumentConstraintKind, SimpleInliningArgumentConstraint,
    SimpleInliningConstraint, SimpleInliningConstraintWithDepth,
};

pub struct SimpleInliningConstraintAnalysis<'a> {
    app: &'a AppView,
    options: &'a AnalysisOptions,
}

impl<'a> SimpleInliningConstraintAnalysis<'a> {
    pub fn new(app: &'a AppView, options: &'a AnalysisOptions) -> Self {
        SimpleInliningConstraintAnalysis { app, options }
    }

    pub fn analyze_code(&self, code: &IrCode) -> SimpleInliningConstraintWithDepth {
        let method = code.context();
        if self.app.method(method).params.is_empty() || !self.options.is_inlining_enabled() {
            tracing::debug!(?method, "inlining constraints not applicable");
            return SimpleInliningConstraintWithDepth::never();
        }
        let mut walk = ConstraintWalk {
            code,
            threshold: self.options.simple_inlining_constraint_threshold,
            seen: vec![false; code.num_blocks()],
        };
        let result = walk.analyze_block(code.entry(), 0);
        tracing::debug!(
            ?method,
            constraint = ?result.constraint,
            depth = result.instruction_depth,
            "simple inlining constraint"
        );
        result
    }
}

/// Depth-first walk from the entry; each block is visited at most once.
struct ConstraintWalk<'a> {
    code: &'a IrCode,
    threshold: usize,
    seen: Vec<bool>,
}

impl ConstraintWalk<'_> {
    fn analyze_block(&mut self, block: BlockId, depth: usize) -> SimpleInliningConstraintWithDepth {
        if std::mem::replace(&mut self.seen[block.index()], true) {
            return SimpleInliningConstraintWithDepth::never();
        }
        ensure_sufficient_stack(|| self.analyze_instructions(block, depth))
    }

    fn analyze_instructions(
        &mut self,
        block: BlockId,
        mut depth: usize,
    ) -> SimpleInliningConstraintWithDepth {
        let code = self.code;
        for &instr in &code.block(block).instructions {
            let opcode = code.opcode(instr);
            if opcode.is_terminator() {
                return self.analyze_terminator(block, instr, depth);
            }
            if matches!(
                opcode,
                Opcode::Argument { .. } | Opcode::Assume { .. } | Opcode::DebugPosition
            ) {
                continue;
            }
            depth += 1;
            if depth > self.threshold {
                tracing::trace!(?block, depth, "instruction depth exceeded");
                return SimpleInliningConstraintWithDepth::never();
            }
        }
        SimpleInliningConstraintWithDepth::never()
    }

    fn analyze_terminator(
        &mut self,
        block: BlockId,
        instr: InstrId,
        depth: usize,
    ) -> SimpleInliningConstraintWithDepth {
        let code = self.code;
        match *code.opcode(instr) {
            Opcode::Return { .. } => SimpleInliningConstraintWithDepth::always(depth),
            Opcode::Throw { .. } => {
                if code.block(block).has_catch_handlers() {
                    SimpleInliningConstraintWithDepth::never()
                } else {
                    SimpleInliningConstraintWithDepth::always(depth)
                }
            }
            Opcode::Goto { target } => self.analyze_block(target, depth),
            Opcode::If {
                kind,
                left,
                right,
                true_target,
                fallthrough,
            } => {
                let Some((when_true, when_false)) = self.branch_constraints(kind, left, right) else {
                    return SimpleInliningConstraintWithDepth::never();
                };
                let true_branch = SimpleInliningConstraintWithDepth {
                    constraint: when_true,
                    instruction_depth: depth,
                }
                .meet_with(|| self.analyze_block(true_target, depth));
                let false_branch = SimpleInliningConstraintWithDepth {
                    constraint: when_false,
                    instruction_depth: depth,
                }
                .meet_with(|| self.analyze_block(fallthrough, depth));
                true_branch.join(false_branch)
            }
            _ => SimpleInliningConstraintWithDepth::never(),
        }
    }

    /// The argument predicates that hold on the true and false edges of
    /// an `if`, when it tests a single argument.
    fn branch_constraints(
        &self,
        kind: IfKind,
        left: ValueId,
        right: Option<ValueId>,
    ) -> Option<(SimpleInliningConstraint, SimpleInliningConstraint)> {
        if !matches!(kind, IfKind::Eq | IfKind::Ne) {
            return None;
        }
        let code = self.code;
        let (argument, equal) = match right {
            None => {
                let argument = self.argument(left)?;
                let ty = code.value(argument).ty;
                let equal = if ty.is_reference() {
                    ArgumentConstraintKind::Null
                } else if ty.is_boolean() {
                    ArgumentConstraintKind::BooleanFalse
                } else {
                    return None;
                };
                (argument, equal)
            }
            Some(right) => {
                let (argument, constant) = match (self.argument(left), self.argument(right)) {
                    (Some(argument), None) => (argument, right),
                    (None, Some(argument)) => (argument, left),
                    _ => return None,
                };
                if !code.value(argument).ty.is_primitive() {
                    return None;
                }
                (argument, ArgumentConstraintKind::Equal(code.const_number(constant)?))
            }
        };
        let index = code.argument_index(argument)?;
        let when_equal = SimpleInliningConstraint::argument(index, equal);
        let when_not_equal = SimpleInliningConstraint::argument(index, equal.complement());
        Some(match kind {
            IfKind::Eq => (when_equal, when_not_equal),
            _ => (when_not_equal, when_equal),
        })
    }

    /// The alias-resolved argument behind `value`, other than the receiver.
    fn argument(&self, value: ValueId) -> Option<ValueId> {
        let root = self.code.aliased_value(value);
        (self.code.argument_index(root).is_some() && !self.code.is_this(root)).then_some(root)
    }
}

#[cfg(test)]
mod tests;
