//! The simple-inlining constraint algebra.
//!
//! A constraint is a boolean formula over predicates on a call's actual
//! arguments. `meet` is conjunction and `join` is disjunction. Both keep
//! formulas normalized: `Always`/`Never` never appear inside a combinator,
//! a combinator never directly contains one of its own kind, and operands
//! are sorted and deduplicated, so equal formulas compare equal.

use std::collections::BTreeMap;

use dexflow_ir::{InstrId, IrCode, Nullability, Opcode, SingleValue, ValueId};

/// A predicate on one argument value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArgumentConstraintKind {
    Null,
    NotNull,
    BooleanTrue,
    BooleanFalse,
    Equal(i64),
    NotEqual(i64),
}

impl ArgumentConstraintKind {
    /// The predicate that holds exactly when this one does not.
    pub fn complement(self) -> Self {
        match self {
            ArgumentConstraintKind::Null => ArgumentConstraintKind::NotNull,
            ArgumentConstraintKind::NotNull => ArgumentConstraintKind::Null,
            ArgumentConstraintKind::BooleanTrue => ArgumentConstraintKind::BooleanFalse,
            ArgumentConstraintKind::BooleanFalse => ArgumentConstraintKind::BooleanTrue,
            ArgumentConstraintKind::Equal(n) => ArgumentConstraintKind::NotEqual(n),
            ArgumentConstraintKind::NotEqual(n) => ArgumentConstraintKind::Equal(n),
        }
    }

    /// Does the predicate hold for `value` in `code`?
    fn is_satisfied_by_value(self, code: &IrCode, value: ValueId) -> bool {
        let root = code.aliased_value(value);
        let ty = code.value(root).ty;
        match self {
            ArgumentConstraintKind::Null => {
                ty.nullability() == Nullability::DefinitelyNull
                    || matches!(code.definition_opcode(root), Some(Opcode::ConstNull))
            }
            ArgumentConstraintKind::NotNull => ty.is_definitely_not_null(),
            ArgumentConstraintKind::BooleanTrue => code.const_number(root) == Some(1),
            ArgumentConstraintKind::BooleanFalse => code.const_number(root) == Some(0),
            ArgumentConstraintKind::Equal(n) => code.const_number(root) == Some(n),
            ArgumentConstraintKind::NotEqual(n) => {
                code.const_number(root).is_some_and(|m| m != n)
            }
        }
    }

    /// Does the predicate hold for the known constant `value`?
    fn is_satisfied_by_constant(self, value: &SingleValue) -> bool {
        let number = match value {
            SingleValue::Number(n) => Some(*n),
            _ => None,
        };
        match self {
            ArgumentConstraintKind::Null => value.is_zero(),
            ArgumentConstraintKind::NotNull => !value.is_zero(),
            ArgumentConstraintKind::BooleanTrue => number == Some(1),
            ArgumentConstraintKind::BooleanFalse => number == Some(0),
            ArgumentConstraintKind::Equal(n) => number == Some(n),
            ArgumentConstraintKind::NotEqual(n) => number.is_some_and(|m| m != n),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimpleInliningArgumentConstraint {
    /// IR argument index; 0 is the receiver of instance methods.
    pub argument_index: usize,
    pub kind: ArgumentConstraintKind,
}

impl SimpleInliningArgumentConstraint {
    #[must_use]
    pub fn complement(self) -> Self {
        SimpleInliningArgumentConstraint {
            argument_index: self.argument_index,
            kind: self.kind.complement(),
        }
    }
}

/// When inlining a call is known to leave no more than a trivial exit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SimpleInliningConstraint {
    Always,
    Never,
    Argument(SimpleInliningArgumentConstraint),
    /// At least two operands, none of them `Always`, `Never` or a
    /// conjunction.
    Conjunction(Vec<SimpleInliningConstraint>),
    /// At least two operands, none of them `Always`, `Never` or a
    /// disjunction.
    Disjunction(Vec<SimpleInliningConstraint>),
}

impl SimpleInliningConstraint {
    pub fn argument(argument_index: usize, kind: ArgumentConstraintKind) -> Self {
        SimpleInliningConstraint::Argument(SimpleInliningArgumentConstraint {
            argument_index,
            kind,
        })
    }

    #[inline]
    pub fn is_always(&self) -> bool {
        matches!(self, SimpleInliningConstraint::Always)
    }

    #[inline]
    pub fn is_never(&self) -> bool {
        matches!(self, SimpleInliningConstraint::Never)
    }

    /// Conjunction.
    #[must_use]
    pub fn meet(self, other: SimpleInliningConstraint) -> SimpleInliningConstraint {
        match (self, other) {
            (SimpleInliningConstraint::Never, _) | (_, SimpleInliningConstraint::Never) => {
                SimpleInliningConstraint::Never
            }
            (SimpleInliningConstraint::Always, x) | (x, SimpleInliningConstraint::Always) => x,
            (a, b) => {
                let mut operands = a.into_conjuncts();
                operands.extend(b.into_conjuncts());
                Self::normalize(operands, Combinator::Conjunction)
            }
        }
    }

    /// Conjunction with a lazily computed operand, not computed when this
    /// constraint is already `Never`.
    #[must_use]
    pub fn meet_with(self, other: impl FnOnce() -> SimpleInliningConstraint) -> SimpleInliningConstraint {
        if self.is_never() {
            return self;
        }
        self.meet(other())
    }

    /// Disjunction.
    #[must_use]
    pub fn join(self, other: SimpleInliningConstraint) -> SimpleInliningConstraint {
        match (self, other) {
            (SimpleInliningConstraint::Always, _) | (_, SimpleInliningConstraint::Always) => {
                SimpleInliningConstraint::Always
            }
            (SimpleInliningConstraint::Never, x) | (x, SimpleInliningConstraint::Never) => x,
            (a, b) => {
                let mut operands = a.into_disjuncts();
                operands.extend(b.into_disjuncts());
                Self::normalize(operands, Combinator::Disjunction)
            }
        }
    }

    fn into_conjuncts(self) -> Vec<SimpleInliningConstraint> {
        match self {
            SimpleInliningConstraint::Conjunction(operands) => operands,
            other => vec![other],
        }
    }

    fn into_disjuncts(self) -> Vec<SimpleInliningConstraint> {
        match self {
            SimpleInliningConstraint::Disjunction(operands) => operands,
            other => vec![other],
        }
    }

    fn normalize(mut operands: Vec<SimpleInliningConstraint>, combinator: Combinator) -> Self {
        operands.sort_unstable();
        operands.dedup();

        // `p && !p` is never satisfied, `p || !p` always is.
        let has_complementary_pair = operands.iter().any(|operand| match operand {
            SimpleInliningConstraint::Argument(c) => operands
                .binary_search(&SimpleInliningConstraint::Argument(c.complement()))
                .is_ok(),
            _ => false,
        });
        if has_complementary_pair {
            return match combinator {
                Combinator::Conjunction => SimpleInliningConstraint::Never,
                Combinator::Disjunction => SimpleInliningConstraint::Always,
            };
        }

        if operands.len() == 1 {
            if let Some(single) = operands.pop() {
                return single;
            }
        }
        match combinator {
            Combinator::Conjunction => SimpleInliningConstraint::Conjunction(operands),
            Combinator::Disjunction => SimpleInliningConstraint::Disjunction(operands),
        }
    }

    /// Evaluate against the arguments of the call `invoke`.
    pub fn is_satisfied(&self, code: &IrCode, invoke: InstrId) -> bool {
        let Opcode::Invoke { args, .. } = code.opcode(invoke) else {
            return false;
        };
        self.is_satisfied_by_arguments(code, args)
    }

    fn is_satisfied_by_arguments(&self, code: &IrCode, args: &[ValueId]) -> bool {
        match self {
            SimpleInliningConstraint::Always => true,
            SimpleInliningConstraint::Never => false,
            SimpleInliningConstraint::Argument(c) => args
                .get(c.argument_index)
                .is_some_and(|&arg| c.kind.is_satisfied_by_value(code, arg)),
            SimpleInliningConstraint::Conjunction(operands) => operands
                .iter()
                .all(|c| c.is_satisfied_by_arguments(code, args)),
            SimpleInliningConstraint::Disjunction(operands) => operands
                .iter()
                .any(|c| c.is_satisfied_by_arguments(code, args)),
        }
    }

    /// Rewrite for a method whose parameter list changed: predicates on a
    /// removed argument are decided by its known constant (or become
    /// `Never` when there is none), the remaining indices are shifted.
    #[must_use]
    pub fn fixup_after_parameters_changed(&self, changes: &ArgumentChanges) -> Self {
        self.rewrite(&|c| {
            if let Some(removed) = changes.removed.get(&c.argument_index) {
                return match removed {
                    Some(value) if c.kind.is_satisfied_by_constant(value) => {
                        SimpleInliningConstraint::Always
                    }
                    _ => SimpleInliningConstraint::Never,
                };
            }
            SimpleInliningConstraint::Argument(SimpleInliningArgumentConstraint {
                argument_index: changes.new_argument_index(c.argument_index),
                kind: c.kind,
            })
        })
    }

    /// Rewrite for a method whose arguments at `unboxed` now carry the
    /// primitive value instead of a box: null checks become checks against
    /// zero.
    #[must_use]
    pub fn rewritten_with_unboxed_arguments(&self, unboxed: &[usize]) -> Self {
        self.rewrite(&|c| {
            if !unboxed.contains(&c.argument_index) {
                return SimpleInliningConstraint::Argument(c);
            }
            let kind = match c.kind {
                ArgumentConstraintKind::Null => ArgumentConstraintKind::Equal(0),
                ArgumentConstraintKind::NotNull => ArgumentConstraintKind::NotEqual(0),
                other => other,
            };
            SimpleInliningConstraint::argument(c.argument_index, kind)
        })
    }

    /// Replace every argument predicate, renormalizing on the way up.
    fn rewrite(
        &self,
        f: &dyn Fn(SimpleInliningArgumentConstraint) -> SimpleInliningConstraint,
    ) -> SimpleInliningConstraint {
        match self {
            SimpleInliningConstraint::Always | SimpleInliningConstraint::Never => self.clone(),
            SimpleInliningConstraint::Argument(c) => f(*c),
            SimpleInliningConstraint::Conjunction(operands) => operands
                .iter()
                .fold(SimpleInliningConstraint::Always, |acc, c| acc.meet(c.rewrite(f))),
            SimpleInliningConstraint::Disjunction(operands) => operands
                .iter()
                .fold(SimpleInliningConstraint::Never, |acc, c| acc.join(c.rewrite(f))),
        }
    }
}

#[derive(Clone, Copy)]
enum Combinator {
    Conjunction,
    Disjunction,
}

/// Arguments removed from a method's signature.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArgumentChanges {
    /// Removed IR argument indices, with the constant every caller passed
    /// when it is known.
    removed: BTreeMap<usize, Option<SingleValue>>,
}

impl ArgumentChanges {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn remove_argument(mut self, index: usize) -> Self {
        self.removed.insert(index, None);
        self
    }

    #[must_use]
    pub fn remove_constant_argument(mut self, index: usize, value: SingleValue) -> Self {
        self.removed.insert(index, Some(value));
        self
    }

    pub fn is_removed(&self, index: usize) -> bool {
        self.removed.contains_key(&index)
    }

    /// Index of a kept argument after the removals.
    pub fn new_argument_index(&self, index: usize) -> usize {
        index - self.removed.range(..index).count()
    }
}

/// A constraint together with the deepest instruction depth reached on the
/// paths that contributed to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleInliningConstraintWithDepth {
    pub constraint: SimpleInliningConstraint,
    pub instruction_depth: usize,
}

impl SimpleInliningConstraintWithDepth {
    pub fn always(instruction_depth: usize) -> Self {
        SimpleInliningConstraintWithDepth {
            constraint: SimpleInliningConstraint::Always,
            instruction_depth,
        }
    }

    pub fn never() -> Self {
        SimpleInliningConstraintWithDepth {
            constraint: SimpleInliningConstraint::Never,
            instruction_depth: 0,
        }
    }

    /// The path continues into `other`, whose depth already includes ours.
    #[must_use]
    pub fn meet(self, other: SimpleInliningConstraintWithDepth) -> Self {
        SimpleInliningConstraintWithDepth {
            constraint: self.constraint.meet(other.constraint),
            instruction_depth: other.instruction_depth,
        }
    }

    #[must_use]
    pub fn meet_with(self, other: impl FnOnce() -> SimpleInliningConstraintWithDepth) -> Self {
        if self.constraint.is_never() {
            return self;
        }
        self.meet(other())
    }

    #[must_use]
    pub fn join(self, other: SimpleInliningConstraintWithDepth) -> Self {
        SimpleInliningConstraintWithDepth {
            constraint: self.constraint.join(other.constraint),
            instruction_depth: self.instruction_depth.max(other.instruction_depth),
        }
    }
}
