#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]

use dexflow_ir::{CatchGuard, InvokeKind, IrCodeBuilder, MethodFlags, SingleValue, TypeElement};
use pretty_assertions::assert_eq;
use smallvec::smallvec;

use crate::test_helpers::{boolean, int, maybe_null, non_null, program, Program};

use super::*;

use ArgumentConstraintKind::{BooleanFalse, BooleanTrue, Equal, NotEqual, NotNull, Null};

fn arg(index: usize, kind: ArgumentConstraintKind) -> SimpleInliningConstraint {
    SimpleInliningConstraint::argument(index, kind)
}

// ── Algebra ─────────────────────────────────────────────────────────

#[test]
fn identities_and_absorption() {
    let x = arg(0, Null);
    assert_eq!(x.clone().meet(SimpleInliningConstraint::Always), x);
    assert_eq!(
        x.clone().meet(SimpleInliningConstraint::Never),
        SimpleInliningConstraint::Never
    );
    assert_eq!(
        x.clone().join(SimpleInliningConstraint::Always),
        SimpleInliningConstraint::Always
    );
    assert_eq!(x.clone().join(SimpleInliningConstraint::Never), x);
}

#[test]
fn combinators_are_flattened() {
    let a = arg(0, Null);
    let b = arg(1, BooleanTrue);
    let c = arg(2, Equal(3));
    let left = a.clone().meet(b.clone()).meet(c.clone());
    let right = a.clone().meet(b.clone().meet(c.clone()));
    assert_eq!(left, right);
    assert_eq!(
        left,
        SimpleInliningConstraint::Conjunction(vec![a.clone(), b.clone(), c.clone()])
    );

    let or = c.clone().join(a.clone()).join(b.clone().join(a.clone()));
    assert_eq!(
        or,
        SimpleInliningConstraint::Disjunction(vec![a, b, c])
    );
}

#[test]
fn complementary_predicates() {
    assert_eq!(
        arg(1, Null).join(arg(1, NotNull)),
        SimpleInliningConstraint::Always
    );
    assert_eq!(
        arg(1, BooleanTrue).meet(arg(1, BooleanFalse)),
        SimpleInliningConstraint::Never
    );
    // Different arguments do not cancel.
    assert!(matches!(
        arg(1, Null).join(arg(2, NotNull)),
        SimpleInliningConstraint::Disjunction(_)
    ));
}

#[test]
fn lazy_meet_skips_never() {
    let result = SimpleInliningConstraint::Never
        .meet_with(|| unreachable!("operand of Never must not be computed"));
    assert_eq!(result, SimpleInliningConstraint::Never);
    assert_eq!(
        SimpleInliningConstraint::Always.meet_with(|| arg(0, Null)),
        arg(0, Null)
    );
}

#[test]
fn depth_tracking() {
    let shallow = SimpleInliningConstraintWithDepth::always(1);
    let deep = SimpleInliningConstraintWithDepth {
        constraint: arg(0, Null),
        instruction_depth: 2,
    };
    let met = SimpleInliningConstraintWithDepth::always(0).meet(deep.clone());
    assert_eq!(met, deep);
    assert_eq!(shallow.join(deep).instruction_depth, 2);
}

#[test]
fn fixup_after_removed_arguments() {
    let constraint = arg(1, Null).meet(arg(2, BooleanTrue)).meet(arg(3, NotNull));

    // Argument 1 is always null, argument 2 is gone without a known value.
    let changes = ArgumentChanges::new()
        .remove_constant_argument(1, SingleValue::Number(0))
        .remove_argument(2);
    assert!(changes.is_removed(2));
    assert_eq!(changes.new_argument_index(3), 1);
    assert_eq!(
        constraint.fixup_after_parameters_changed(&changes),
        SimpleInliningConstraint::Never
    );

    let changes = ArgumentChanges::new().remove_constant_argument(2, SingleValue::Number(1));
    assert_eq!(
        constraint.fixup_after_parameters_changed(&changes),
        arg(1, Null).meet(arg(2, NotNull))
    );

    let changes = ArgumentChanges::new().remove_constant_argument(1, SingleValue::String("s".into()));
    assert_eq!(
        arg(1, NotNull)
            .join(arg(2, Equal(4)))
            .fixup_after_parameters_changed(&changes),
        SimpleInliningConstraint::Always
    );
}

#[test]
fn unboxed_arguments() {
    let constraint = arg(1, Null).join(arg(2, NotNull).meet(arg(3, BooleanFalse)));
    assert_eq!(
        constraint.rewritten_with_unboxed_arguments(&[1, 2]),
        arg(1, Equal(0)).join(arg(2, NotEqual(0)).meet(arg(3, BooleanFalse)))
    );
}

// ── Satisfaction ────────────────────────────────────────────────────

#[test]
fn satisfied_by_constant_arguments() {
    let mut p = program();
    let (object, boolean_ty, int_ty) = (p.object, p.app.well_known().boolean, p.int);
    let callee = p.static_method(p.a, "callee", vec![object, boolean_ty, int_ty]);
    let caller = p.static_method(p.b, "caller", vec![]);
    let mut ir = IrCodeBuilder::for_method(&p.app, caller);
    let b0 = ir.new_block();
    let null = ir.push_value(b0, Opcode::ConstNull, TypeElement::null());
    let yes = ir.push_value(b0, Opcode::ConstNumber { value: 1 }, boolean());
    let seven = ir.push_value(b0, Opcode::ConstNumber { value: 7 }, int());
    let call = ir.push(
        b0,
        Opcode::Invoke {
            kind: InvokeKind::Static,
            method: callee,
            args: smallvec![null, yes, seven],
        },
    );
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    assert!(arg(0, Null).is_satisfied(&code, call));
    assert!(!arg(0, NotNull).is_satisfied(&code, call));
    assert!(arg(1, BooleanTrue).is_satisfied(&code, call));
    assert!(arg(2, NotEqual(3)).is_satisfied(&code, call));
    assert!(!arg(2, Equal(3)).is_satisfied(&code, call));
    assert!(arg(0, Null).meet(arg(2, Equal(7))).is_satisfied(&code, call));
    assert!(arg(0, NotNull).join(arg(1, BooleanTrue)).is_satisfied(&code, call));
    assert!(!arg(5, Null).is_satisfied(&code, call));

    let ret = code.terminator(b0).unwrap();
    assert!(!SimpleInliningConstraint::Always.is_satisfied(&code, ret));
}

// ── Analysis ────────────────────────────────────────────────────────

fn analyze(p: &Program, code: &IrCode) -> SimpleInliningConstraintWithDepth {
    let options = AnalysisOptions::default();
    SimpleInliningConstraintAnalysis::new(&p.app, &options).analyze_code(code)
}

/// `void m(Object a) { if (a == null) return; <three calls>; return; }`
fn early_return_on_null(p: &mut Program) -> IrCode {
    let (object, a, b) = (p.object, p.a, p.b);
    let other = p.static_method(b, "other", vec![]);
    let method = p.static_method(a, "m", vec![object]);
    let mut ir = IrCodeBuilder::for_method(&p.app, method);
    let entry = ir.new_block();
    let early = ir.new_block();
    let slow = ir.new_block();
    let a = ir.push_value(entry, Opcode::Argument { index: 0 }, maybe_null(&p.app, object));
    ir.push(
        entry,
        Opcode::If {
            kind: IfKind::Eq,
            left: a,
            right: None,
            true_target: early,
            fallthrough: slow,
        },
    );
    ir.push(early, Opcode::Return { value: None });
    for _ in 0..3 {
        ir.push(
            slow,
            Opcode::Invoke {
                kind: InvokeKind::Static,
                method: other,
                args: smallvec![],
            },
        );
    }
    ir.push(slow, Opcode::Return { value: None });
    ir.build().unwrap()
}

#[test]
fn early_return_constrains_argument() {
    let mut p = program();
    let code = early_return_on_null(&mut p);
    let result = analyze(&p, &code);
    assert_eq!(result.constraint, arg(0, Null));
    assert_eq!(result.instruction_depth, 0);
}

#[test]
fn disabled_inlining_and_no_arguments() {
    let mut p = program();
    let code = early_return_on_null(&mut p);
    let options = AnalysisOptions::default().with_debug(true);
    let result = SimpleInliningConstraintAnalysis::new(&p.app, &options).analyze_code(&code);
    assert_eq!(result, SimpleInliningConstraintWithDepth::never());

    let nullary = p.static_method(p.a, "nullary", vec![]);
    let mut ir = IrCodeBuilder::for_method(&p.app, nullary);
    let b0 = ir.new_block();
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();
    assert_eq!(analyze(&p, &code), SimpleInliningConstraintWithDepth::never());
}

/// `void m(boolean flag) { if (flag) throw e; return; }`, with and without
/// a handler around the throw.
#[test]
fn throw_exits_unless_caught() {
    let build = |handled: bool| {
        let mut p = program();
        let boolean_ty = p.app.well_known().boolean;
        let throwable = p.app.well_known().throwable;
        let method = p.static_method(p.a, "m", vec![boolean_ty, throwable]);
        let mut ir = IrCodeBuilder::for_method(&p.app, method);
        let entry = ir.new_block();
        let throws = ir.new_block();
        let done = ir.new_block();
        let flag = ir.push_value(entry, Opcode::Argument { index: 0 }, boolean());
        let e = ir.push_value(entry, Opcode::Argument { index: 1 }, non_null(&p.app, throwable));
        ir.push(
            entry,
            Opcode::If {
                kind: IfKind::Ne,
                left: flag,
                right: None,
                true_target: throws,
                fallthrough: done,
            },
        );
        ir.push(throws, Opcode::Throw { exception: e });
        if handled {
            ir.add_catch_handler(throws, CatchGuard::All, done);
        }
        ir.push(done, Opcode::Return { value: None });
        let code = ir.build().unwrap();
        analyze(&p, &code).constraint
    };
    assert_eq!(build(false), SimpleInliningConstraint::Always);
    assert_eq!(build(true), arg(0, BooleanFalse));
}

/// `int m(int x) { if (x != 42) return 0; <calls>; }`
#[test]
fn comparison_with_constant() {
    let mut p = program();
    let int_ty = p.int;
    let other = p.static_method(p.b, "other", vec![]);
    let a = p.a;
    let method = p.app.add_method(a, "m", vec![int_ty], int_ty, MethodFlags::STATIC);
    let mut ir = IrCodeBuilder::for_method(&p.app, method);
    let entry = ir.new_block();
    let fast = ir.new_block();
    let slow = ir.new_block();
    let x = ir.push_value(entry, Opcode::Argument { index: 0 }, int());
    let answer = ir.push_value(entry, Opcode::ConstNumber { value: 42 }, int());
    ir.push(
        entry,
        Opcode::If {
            kind: IfKind::Ne,
            left: answer,
            right: Some(x),
            true_target: fast,
            fallthrough: slow,
        },
    );
    let zero = ir.push_value(fast, Opcode::ConstNumber { value: 0 }, int());
    ir.push(fast, Opcode::Return { value: Some(zero) });
    for _ in 0..3 {
        ir.push(
            slow,
            Opcode::Invoke {
                kind: InvokeKind::Static,
                method: other,
                args: smallvec![],
            },
        );
    }
    ir.push(slow, Opcode::Return { value: Some(x) });
    let code = ir.build().unwrap();

    let result = analyze(&p, &code);
    assert_eq!(result.constraint, arg(0, NotEqual(42)));
    assert_eq!(result.instruction_depth, 2);
}

/// Tests of the receiver say nothing about call-site arguments.
#[test]
fn receiver_tests_are_not_constraints() {
    let mut p = program();
    let int_ty = p.int;
    let method = p.virtual_method(p.a, "m", vec![int_ty]);
    let mut ir = IrCodeBuilder::for_method(&p.app, method);
    let entry = ir.new_block();
    let left = ir.new_block();
    let right = ir.new_block();
    let this = ir.push_value(entry, Opcode::Argument { index: 0 }, non_null(&p.app, p.a));
    ir.push_value(entry, Opcode::Argument { index: 1 }, int());
    ir.push(
        entry,
        Opcode::If {
            kind: IfKind::Eq,
            left: this,
            right: None,
            true_target: left,
            fallthrough: right,
        },
    );
    ir.push(left, Opcode::Return { value: None });
    ir.push(right, Opcode::Return { value: None });
    let code = ir.build().unwrap();
    assert_eq!(analyze(&p, &code), SimpleInliningConstraintWithDepth::never());
}

/// A loop back to a visited block contributes `Never`.
#[test]
fn back_edge_is_never() {
    let mut p = program();
    let object = p.object;
    let method = p.static_method(p.a, "m", vec![object]);
    let mut ir = IrCodeBuilder::for_method(&p.app, method);
    let entry = ir.new_block();
    let exit = ir.new_block();
    let a = ir.push_value(entry, Opcode::Argument { index: 0 }, maybe_null(&p.app, object));
    ir.push(
        entry,
        Opcode::If {
            kind: IfKind::Ne,
            left: a,
            right: None,
            true_target: entry,
            fallthrough: exit,
        },
    );
    ir.push(exit, Opcode::Return { value: None });
    let code = ir.build().unwrap();
    assert_eq!(analyze(&p, &code).constraint, arg(0, Null));
}
