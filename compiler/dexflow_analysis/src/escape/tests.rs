#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]

use dexflow_ir::{
    FieldFlags, IfKind, InvokeKind, IrCodeBuilder, MethodFlags, MethodId, TypeElement, ValueId,
};
use pretty_assertions::assert_eq;
use smallvec::smallvec;

use crate::test_helpers::{int, maybe_null, non_null, program};

use super::*;

fn init(constructor: MethodId, receiver: ValueId) -> Opcode {
    Opcode::Invoke {
        kind: InvokeKind::Direct,
        method: constructor,
        args: smallvec![receiver],
    }
}

fn sorted(set: FxHashSet<InstrId>) -> Vec<InstrId> {
    let mut instrs: Vec<_> = set.into_iter().collect();
    instrs.sort_unstable();
    instrs
}

/// Storing an object into another object that is returned lets both escape.
#[test]
fn escape_through_containing_object() {
    let mut p = program();
    let a_init = p.constructor(p.a, vec![]);
    let b_init = p.constructor(p.b, vec![]);
    let field = p.app.add_field(p.b, "a", p.a, FieldFlags::empty());
    let main = p.app.add_method(p.b, "make", vec![], p.b, MethodFlags::STATIC);

    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let a = ir.push_value(b0, Opcode::NewInstance { class: p.a }, non_null(&p.app, p.a));
    let a_ctor = ir.push(b0, init(a_init, a));
    let b = ir.push_value(b0, Opcode::NewInstance { class: p.b }, non_null(&p.app, p.b));
    let b_ctor = ir.push(b0, init(b_init, b));
    ir.push(
        b0,
        Opcode::InstancePut {
            field,
            object: b,
            value: a,
        },
    );
    let ret = ir.push(b0, Opcode::Return { value: Some(b) });
    let code = ir.build().unwrap();

    let analysis = EscapeAnalysis::new(&p.app);
    assert_eq!(sorted(analysis.escape(&code, a)), vec![a_ctor, b_ctor, ret]);
    assert_eq!(sorted(analysis.escape(&code, b)), vec![b_ctor, ret]);
}

/// Stores into an argument array are visible to the caller.
#[test]
fn store_into_argument_array_escapes() {
    let mut p = program();
    let array_ty = p.app.intern_type("[Ljava/lang/Object;");
    let main = p.static_method(p.b, "fill", vec![array_ty]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let array = ir.push_value(b0, Opcode::Argument { index: 0 }, maybe_null(&p.app, array_ty));
    let string = ir.push_value(
        b0,
        Opcode::ConstString {
            value: "x".to_owned(),
        },
        non_null(&p.app, p.app.well_known().string),
    );
    let zero = ir.push_value(b0, Opcode::ConstNumber { value: 0 }, int());
    let put = ir.push(
        b0,
        Opcode::ArrayPut {
            array,
            index: zero,
            value: string,
        },
    );
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    let analysis = EscapeAnalysis::new(&p.app);
    assert_eq!(sorted(analysis.escape(&code, string)), vec![put]);
}

/// A local array does not leak what is stored into it.
#[test]
fn store_into_local_array_does_not_escape() {
    let mut p = program();
    let array_ty = p.app.intern_type("[Ljava/lang/Object;");
    let string_ty = p.app.well_known().string;
    let main = p.static_method(p.b, "local", vec![]);
    let app = &p.app;
    let mut ir = IrCodeBuilder::for_method(app, main);
    let b0 = ir.new_block();
    let one = ir.push_value(b0, Opcode::ConstNumber { value: 1 }, int());
    let array = ir.push_value(
        b0,
        Opcode::NewArrayEmpty {
            ty: array_ty,
            size: one,
        },
        non_null(app, array_ty),
    );
    let string = ir.push_value(
        b0,
        Opcode::ConstString {
            value: "x".to_owned(),
        },
        non_null(app, string_ty),
    );
    let zero = ir.push_value(b0, Opcode::ConstNumber { value: 0 }, int());
    ir.push(
        b0,
        Opcode::ArrayPut {
            array,
            index: zero,
            value: string,
        },
    );
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    assert!(!EscapeAnalysis::new(app).is_escaping(&code, string));
}

/// Self-recursion with the same arguments is not an escape; any other
/// argument order is.
#[test]
fn self_recursive_call() {
    let mut p = program();
    let main = p.static_method(p.b, "loop", vec![p.object, p.object]);
    let object = maybe_null(&p.app, p.object);

    let build = |swap: bool| {
        let mut ir = IrCodeBuilder::for_method(&p.app, main);
        let b0 = ir.new_block();
        let x = ir.push_value(b0, Opcode::Argument { index: 0 }, object);
        let y = ir.push_value(b0, Opcode::Argument { index: 1 }, object);
        let args = if swap { smallvec![y, x] } else { smallvec![x, y] };
        let call = ir.push(
            b0,
            Opcode::Invoke {
                kind: InvokeKind::Static,
                method: main,
                args,
            },
        );
        ir.push(b0, Opcode::Return { value: None });
        (ir.build().unwrap(), x, call)
    };

    let analysis = EscapeAnalysis::new(&p.app);
    let (same, x, _) = build(false);
    assert!(analysis.escape(&same, x).is_empty());
    let (swapped, x, call) = build(true);
    assert_eq!(sorted(analysis.escape(&swapped, x)), vec![call]);
}

/// Aliases and phis are followed.
#[test]
fn escape_through_alias_and_phi() {
    let mut p = program();
    let main = p
        .app
        .add_method(p.b, "pick", vec![p.int, p.object], p.object, MethodFlags::STATIC);
    let object = maybe_null(&p.app, p.object);

    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let entry = ir.new_block();
    let left = ir.new_block();
    let right = ir.new_block();
    let join = ir.new_block();
    let flag = ir.push_value(entry, Opcode::Argument { index: 0 }, int());
    let x = ir.push_value(entry, Opcode::Argument { index: 1 }, object);
    ir.push(
        entry,
        Opcode::If {
            kind: IfKind::Eq,
            left: flag,
            right: None,
            true_target: left,
            fallthrough: right,
        },
    );
    let refined = ir.push_value(left, Opcode::Assume { src: x }, non_null(&p.app, p.object));
    ir.push(left, Opcode::Goto { target: join });
    let null = ir.push_value(right, Opcode::ConstNull, TypeElement::null());
    ir.push(right, Opcode::Goto { target: join });
    let phi = ir.add_phi(join, object);
    ir.set_phi_operands(phi, &[refined, null]);
    let ret = ir.push(join, Opcode::Return { value: Some(phi) });
    let code = ir.build().unwrap();

    let analysis = EscapeAnalysis::new(&p.app);
    assert_eq!(sorted(analysis.escape(&code, x)), vec![ret]);
    assert_eq!(sorted(analysis.escape(&code, null)), vec![ret]);
}

struct ReturnsAreFine;

impl EscapeAnalysisConfiguration for ReturnsAreFine {
    fn is_legitimate_escape_route(
        &self,
        code: &IrCode,
        _app: &AppView,
        _value: ValueId,
        instr: InstrId,
    ) -> bool {
        matches!(code.opcode(instr), Opcode::Return { .. })
    }
}

#[test]
fn configuration_excludes_routes() {
    let mut p = program();
    let init_a = p.constructor(p.a, vec![]);
    let main = p.app.add_method(p.b, "make", vec![], p.a, MethodFlags::STATIC);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let a = ir.push_value(b0, Opcode::NewInstance { class: p.a }, non_null(&p.app, p.a));
    let ctor = ir.push(b0, init(init_a, a));
    ir.push(b0, Opcode::Return { value: Some(a) });
    let code = ir.build().unwrap();

    let analysis = EscapeAnalysis::with_configuration(&p.app, ReturnsAreFine);
    assert_eq!(sorted(analysis.escape(&code, a)), vec![ctor]);
}
