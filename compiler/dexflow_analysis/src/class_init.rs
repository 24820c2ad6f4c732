//! Class-initialization analysis.
//!
//! Answers whether a class is guaranteed to be initialized when control
//! reaches a given instruction. The instruction's own block is scanned up
//! to the instruction, then every strictly dominating block is scanned in
//! full (or up to its throwing instruction, when it has catch handlers).
//!
//! An instruction that would initialize the class only counts if it cannot
//! throw on the way to the query point. Inside a block every earlier
//! instruction completed normally, otherwise the query point would not be
//! reached. For a dominator with catch handlers, a throw is only a concern
//! when one of its handlers leads back to the queried block.

use dexflow_ir::effects::{instruction_type_can_throw, thrown_exceptions};
use dexflow_ir::{
    AppView, BlockId, CatchGuard, DominatorTree, FieldId, Inclusive, InstrId, InvokeKind, IrCode,
    MethodId, Opcode, PredecessorMarks, ThrownExceptions, TypeId, TypeKind, ValueId,
};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// How far the search for an initializing instruction looks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Query {
    /// Only instructions that initialize the class itself.
    Directly,
    /// Also instructions that initialize the class through a callee, a
    /// subclass, or another class initializer.
    DirectlyOrIndirectly,
}

/// What may be assumed about an instruction that would trigger
/// initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnalysisAssumption {
    /// The instruction completes normally.
    InstructionDoesNotThrow,
    /// Nothing; it may throw before initializing anything.
    None,
}

/// Stateful class-initialization queries over one method body.
///
/// The dominator tree and predecessor marks are built on first use and
/// reused across queries. Call [`notify_code_has_changed`] whenever the IR
/// is rewritten and [`finish`] when the pass is done.
///
/// [`notify_code_has_changed`]: Self::notify_code_has_changed
/// [`finish`]: Self::finish
pub struct ClassInitializationAnalysis<'a> {
    app: Option<&'a AppView>,
    dominator_tree: Option<DominatorTree>,
    marks: Option<PredecessorMarks>,
}

impl<'a> ClassInitializationAnalysis<'a> {
    pub fn new(app: &'a AppView) -> Self {
        ClassInitializationAnalysis {
            app: Some(app),
            dominator_tree: None,
            marks: None,
        }
    }

    /// An analysis without whole-program knowledge; every query answers
    /// `false`.
    pub fn trivial() -> Self {
        ClassInitializationAnalysis {
            app: None,
            dominator_tree: None,
            marks: None,
        }
    }

    /// Is `ty` definitely initialized on every path reaching `instr`?
    pub fn is_class_definitely_loaded_before_instruction(
        &mut self,
        code: &IrCode,
        ty: TypeId,
        instr: InstrId,
    ) -> bool {
        let Some(app) = self.app else {
            return false;
        };
        let block = code.instr(instr).block;

        // Earlier instructions in the same block completed normally.
        for &previous in &code.block(block).instructions {
            if previous == instr {
                break;
            }
            if definitely_triggers_class_initialization(
                code,
                app,
                previous,
                ty,
                Query::DirectlyOrIndirectly,
                AnalysisAssumption::InstructionDoesNotThrow,
            ) {
                tracing::trace!(?ty, ?instr, by = ?previous, "initialized in block");
                return true;
            }
        }

        let tree = self
            .dominator_tree
            .get_or_insert_with(|| DominatorTree::build(code));
        debug_assert_eq!(
            tree.built_at(),
            code.modification_count(),
            "dominator tree queried after the code changed"
        );
        let dominators: Vec<BlockId> = tree.dominator_blocks(block, Inclusive::No).collect();

        for dominator in dominators {
            let assumption = self.assumption_for_dominator(code, app, dominator, block);
            let dominator_block = code.block(dominator);
            for &previous in &dominator_block.instructions {
                if definitely_triggers_class_initialization(
                    code,
                    app,
                    previous,
                    ty,
                    Query::DirectlyOrIndirectly,
                    assumption,
                ) {
                    tracing::trace!(?ty, ?instr, by = ?previous, "initialized in dominator");
                    return true;
                }
                // Control may leave the block here.
                if dominator_block.has_catch_handlers()
                    && instruction_type_can_throw(code.opcode(previous))
                {
                    break;
                }
            }
        }
        tracing::trace!(?ty, ?instr, "initialization not proven");
        false
    }

    /// Can the throwing instruction of `dominator` be assumed not to throw
    /// when reasoning about `target`?
    fn assumption_for_dominator(
        &mut self,
        code: &IrCode,
        app: &AppView,
        dominator: BlockId,
        target: BlockId,
    ) -> AnalysisAssumption {
        if !code.block(dominator).has_catch_handlers() {
            return AnalysisAssumption::InstructionDoesNotThrow;
        }
        let Some(exit) = code.exceptional_exit(dominator) else {
            return AnalysisAssumption::InstructionDoesNotThrow;
        };
        let thrown = thrown_exceptions(code, app, exit);
        if thrown == ThrownExceptions::None {
            return AnalysisAssumption::InstructionDoesNotThrow;
        }

        let marks = self.marks.get_or_insert_with(PredecessorMarks::new);
        if marks.target() != Some(target) {
            marks.mark_transitive_predecessors(code, target);
        }
        for handler in code.catch_handlers(dominator) {
            if !marks.is_marked(handler.target) {
                continue;
            }
            match handler.guard {
                CatchGuard::All => return AnalysisAssumption::None,
                CatchGuard::Type(guard) => {
                    if thrown.may_be_caught_by(guard, app) {
                        return AnalysisAssumption::None;
                    }
                }
            }
        }
        AnalysisAssumption::InstructionDoesNotThrow
    }

    /// Drop every cached structure; the IR has been rewritten.
    pub fn notify_code_has_changed(&mut self) {
        self.dominator_tree = None;
        self.marks = None;
    }

    /// Release the predecessor marks.
    pub fn finish(&mut self) {
        self.marks = None;
    }
}

/// What an initializing instruction refers to.
#[derive(Clone, Copy, Debug)]
enum Initializer {
    Class(TypeId),
    Field(FieldId),
    Method(MethodId),
}

/// Does executing `instr` guarantee that `ty` is initialized afterwards?
pub fn definitely_triggers_class_initialization(
    code: &IrCode,
    app: &AppView,
    instr: InstrId,
    ty: TypeId,
    query: Query,
    assumption: AnalysisAssumption,
) -> bool {
    let does_not_throw = assumption == AnalysisAssumption::InstructionDoesNotThrow;
    let not_null = |v: ValueId| code.value(v).ty.is_definitely_not_null();
    let no_args: &[ValueId] = &[];

    match code.opcode(instr) {
        Opcode::InitClass { class } | Opcode::NewInstance { class } => {
            does_not_throw
                && app.class(*class).is_some()
                && is_type_initialized_by(code, app, no_args, Initializer::Class(*class), ty, query)
        }
        Opcode::StaticGet { field } | Opcode::StaticPut { field, .. } => {
            does_not_throw
                && is_type_initialized_by(code, app, no_args, Initializer::Field(*field), ty, query)
        }
        Opcode::InstanceGet { field, object } | Opcode::InstancePut { field, object, .. } => {
            // A live receiver means its class, and so the holder, was
            // initialized before the access.
            (does_not_throw || not_null(*object))
                && is_type_initialized_by(
                    code,
                    app,
                    no_args,
                    Initializer::Class(app.field(*field).holder),
                    ty,
                    query,
                )
        }
        Opcode::Invoke { kind, method, args } => match kind {
            InvokeKind::Static => {
                let target = app.single_target(*method).unwrap_or(*method);
                does_not_throw
                    && is_type_initialized_by(code, app, args, Initializer::Method(target), ty, query)
            }
            InvokeKind::Direct => {
                let receiver_ok = args.first().is_some_and(|&r| not_null(r));
                (does_not_throw || receiver_ok)
                    && is_type_initialized_by(code, app, args, Initializer::Method(*method), ty, query)
            }
            InvokeKind::Virtual | InvokeKind::Super | InvokeKind::Interface => {
                let receiver_ok = args.first().is_some_and(|&r| not_null(r));
                if query == Query::Directly || !(does_not_throw || receiver_ok) {
                    return false;
                }
                match app.single_target(*method) {
                    Some(target) => {
                        is_type_initialized_by(code, app, args, Initializer::Method(target), ty, query)
                    }
                    // The receiver's class extends the resolved holder, but an
                    // interface holder says nothing about the receiver's class.
                    None if *kind == InvokeKind::Interface => false,
                    None => app.is_subclass_of(app.method(*method).holder, ty),
                }
            }
        },
        _ => false,
    }
}

/// Does the initializer of `ty` necessarily run when `initializer` is used
/// with `args`?
fn is_type_initialized_by(
    code: &IrCode,
    app: &AppView,
    args: &[ValueId],
    initializer: Initializer,
    ty: TypeId,
    query: Query,
) -> bool {
    let holder = match initializer {
        Initializer::Class(class) => class,
        Initializer::Field(field) => app.field(field).holder,
        Initializer::Method(method) => app.method(method).holder,
    };
    if query == Query::Directly {
        return holder == ty;
    }

    let mut worklist = VecDeque::from([holder]);
    if let Initializer::Method(method) = initializer {
        let def = app.method(method);
        worklist.extend(
            def.optimization_info
                .initialized_classes_on_normal_exit
                .iter()
                .copied(),
        );
        let arg_class = |index: usize| {
            args.get(index)
                .and_then(|&arg| code.value(arg).ty.class_type())
                .or_else(|| def.argument_type(index))
        };
        if !def.is_static() {
            worklist.extend(arg_class(0));
        }
        // Normal completion means these arguments were non-null, so their
        // classes were instantiated.
        for &index in &def.optimization_info.non_null_param_or_throw {
            worklist.extend(arg_class(index));
        }
    }

    let mut visited = FxHashSet::default();
    while let Some(known) = worklist.pop_front() {
        if app.type_kind(known) != TypeKind::Class {
            continue;
        }
        if app.is_subclass_of(known, ty) {
            return true;
        }
        if !visited.insert(known) {
            continue;
        }
        let clinit = app.class(known).and_then(|c| c.class_initializer);
        if let Some(clinit) = clinit {
            worklist.extend(
                app.method(clinit)
                    .optimization_info
                    .initialized_classes_on_normal_exit
                    .iter()
                    .copied(),
            );
        }
    }
    false
}

#[cfg(test)]
mod tests;
