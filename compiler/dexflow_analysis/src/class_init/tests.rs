#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]

use dexflow_ir::{
    CatchGuard, ClassFlags, FieldFlags, IfKind, InstrId, IrCodeBuilder, MethodId, Opcode, ValueId,
};
use smallvec::smallvec;

use crate::test_helpers::{int, maybe_null, non_null, program, Program};

use super::*;

fn call(method: MethodId) -> Opcode {
    Opcode::Invoke {
        kind: InvokeKind::Static,
        method,
        args: smallvec![],
    }
}

/// `b0: A.foo(); goto b1` / `b1: B.bar(); return`.
fn two_blocks(p: &mut Program) -> (IrCodeBuilder, InstrId, InstrId) {
    let foo = p.static_method(p.a, "foo", vec![]);
    let bar = p.static_method(p.b, "bar", vec![]);
    let main = p.static_method(p.b, "main", vec![]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let b1 = ir.new_block();
    let first = ir.push(b0, call(foo));
    ir.push(b0, Opcode::Goto { target: b1 });
    let second = ir.push(b1, call(bar));
    ir.push(b1, Opcode::Return { value: None });
    (ir, first, second)
}

/// A static call initializes its holder for everything after it.
#[test]
fn static_invoke_in_dominator() {
    let mut p = program();
    let (ir, first, second) = two_blocks(&mut p);
    let code = ir.build().unwrap();

    let mut analysis = ClassInitializationAnalysis::new(&p.app);
    assert!(analysis.is_class_definitely_loaded_before_instruction(&code, p.a, second));
    assert!(!analysis.is_class_definitely_loaded_before_instruction(&code, p.a, first));
    assert!(!analysis.is_class_definitely_loaded_before_instruction(&code, p.b, second));
    analysis.finish();
}

#[test]
fn trivial_analysis_proves_nothing() {
    let mut p = program();
    let (ir, _, second) = two_blocks(&mut p);
    let code = ir.build().unwrap();

    let mut analysis = ClassInitializationAnalysis::trivial();
    assert!(!analysis.is_class_definitely_loaded_before_instruction(&code, p.a, second));
}

/// Initialization on one arm of a diamond does not reach the join.
#[test]
fn one_arm_of_diamond_is_not_enough() {
    let mut p = program();
    let foo = p.static_method(p.a, "foo", vec![]);
    let main = p.static_method(p.b, "main", vec![p.int]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let entry = ir.new_block();
    let left = ir.new_block();
    let right = ir.new_block();
    let join = ir.new_block();
    let arg = ir.push_value(entry, Opcode::Argument { index: 0 }, int());
    ir.push(
        entry,
        Opcode::If {
            kind: IfKind::Eq,
            left: arg,
            right: None,
            true_target: left,
            fallthrough: right,
        },
    );
    ir.push(left, call(foo));
    ir.push(left, Opcode::Goto { target: join });
    ir.push(right, Opcode::Goto { target: join });
    let exit = ir.push(join, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    let mut analysis = ClassInitializationAnalysis::new(&p.app);
    assert!(!analysis.is_class_definitely_loaded_before_instruction(&code, p.a, exit));
}

/// Builds `b0: A.foo() [catch-all -> b2]; goto b1`, `b1: return`, and `b2`
/// either rejoining `b1` or returning on its own.
fn guarded_call(p: &mut Program, handler_rejoins: bool) -> (IrCode, InstrId) {
    let foo = p.static_method(p.a, "foo", vec![]);
    let main = p.static_method(p.b, "main", vec![]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let b1 = ir.new_block();
    let b2 = ir.new_block();
    ir.push(b0, call(foo));
    ir.push(b0, Opcode::Goto { target: b1 });
    ir.add_catch_handler(b0, CatchGuard::All, b2);
    let exit = ir.push(b1, Opcode::Return { value: None });
    if handler_rejoins {
        ir.push(b2, Opcode::Goto { target: b1 });
    } else {
        ir.push(b2, Opcode::Return { value: None });
    }
    (ir.build().unwrap(), exit)
}

/// A handler that leads back to the query point means the call may have
/// thrown before initializing anything.
#[test]
fn catch_handler_reaching_target_blocks_assumption() {
    let mut p = program();
    let (code, exit) = guarded_call(&mut p, true);
    let mut analysis = ClassInitializationAnalysis::new(&p.app);
    assert!(!analysis.is_class_definitely_loaded_before_instruction(&code, p.a, exit));
}

#[test]
fn catch_handler_elsewhere_keeps_assumption() {
    let mut p = program();
    let (code, exit) = guarded_call(&mut p, false);
    let mut analysis = ClassInitializationAnalysis::new(&p.app);
    assert!(analysis.is_class_definitely_loaded_before_instruction(&code, p.a, exit));
}

/// A typed handler that cannot catch what the exit throws is harmless.
#[test]
fn unrelated_catch_guard_keeps_assumption() {
    let mut p = program();
    let arithmetic = p.app.well_known().arithmetic_exception;
    let main = p.static_method(p.b, "main", vec![]);
    let field = p.static_field(p.a, "f", p.int, main);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let b1 = ir.new_block();
    let b2 = ir.new_block();
    ir.push_value(b0, Opcode::StaticGet { field }, int());
    ir.push(b0, Opcode::Goto { target: b1 });
    ir.add_catch_handler(b0, CatchGuard::Type(arithmetic), b2);
    let exit = ir.push(b1, Opcode::Return { value: None });
    ir.push(b2, Opcode::Goto { target: b1 });
    let code = ir.build().unwrap();

    let mut analysis = ClassInitializationAnalysis::new(&p.app);
    assert!(analysis.is_class_definitely_loaded_before_instruction(&code, p.a, exit));
}

/// Instantiating a subclass initializes its superclasses, not the reverse.
#[test]
fn subclass_instantiation_initializes_superclass() {
    let mut p = program();
    let sub = p.app.define_class("LSub;", Some(p.a), ClassFlags::empty());
    let main = p.static_method(p.b, "main", vec![]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    ir.push_value(b0, Opcode::NewInstance { class: sub }, non_null(&p.app, sub));
    let exit = ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    let mut analysis = ClassInitializationAnalysis::new(&p.app);
    assert!(analysis.is_class_definitely_loaded_before_instruction(&code, p.a, exit));
    assert!(analysis.is_class_definitely_loaded_before_instruction(&code, sub, exit));

    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    ir.push_value(b0, Opcode::NewInstance { class: p.a }, non_null(&p.app, p.a));
    let exit = ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();
    let mut analysis = ClassInitializationAnalysis::new(&p.app);
    assert!(!analysis.is_class_definitely_loaded_before_instruction(&code, sub, exit));
}

/// An instance field access proves its holder initialized only when the
/// receiver is known non-null or the access is assumed not to throw.
#[test]
fn instance_get_depends_on_receiver_nullability() {
    let mut p = program();
    let main = p.static_method(p.b, "main", vec![p.a, p.a]);
    let field = p.app.add_field(p.a, "x", p.int, FieldFlags::empty());
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let nullable = ir.push_value(b0, Opcode::Argument { index: 0 }, maybe_null(&p.app, p.a));
    let present = ir.push_value(b0, Opcode::Argument { index: 1 }, non_null(&p.app, p.a));
    let get_nullable = ir.push_value(
        b0,
        Opcode::InstanceGet {
            field,
            object: nullable,
        },
        int(),
    );
    let get_present = ir.push_value(
        b0,
        Opcode::InstanceGet {
            field,
            object: present,
        },
        int(),
    );
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();
    let def = |v: ValueId| code.value(v).definition_instr().unwrap();

    let check = |instr, query, assumption| {
        definitely_triggers_class_initialization(&code, &p.app, instr, p.a, query, assumption)
    };
    assert!(!check(def(get_nullable), Query::DirectlyOrIndirectly, AnalysisAssumption::None));
    assert!(check(
        def(get_nullable),
        Query::DirectlyOrIndirectly,
        AnalysisAssumption::InstructionDoesNotThrow
    ));
    assert!(check(def(get_present), Query::DirectlyOrIndirectly, AnalysisAssumption::None));
    assert!(check(def(get_present), Query::Directly, AnalysisAssumption::None));
    assert!(!check(def(get_nullable), Query::Directly, AnalysisAssumption::None));
}

/// A field access or constructor call directly initializes exactly its
/// holder once the receiver is known to be live.
#[test]
fn receiver_access_directly_initializes_holder() {
    let mut p = program();
    let sub = p.app.define_class("LSub;", Some(p.a), ClassFlags::empty());
    let init = p.constructor(sub, vec![]);
    let field = p.app.add_field(sub, "x", p.int, FieldFlags::empty());
    let main = p.static_method(p.b, "main", vec![sub]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let receiver = ir.push_value(b0, Opcode::Argument { index: 0 }, non_null(&p.app, sub));
    let value = ir.push_value(b0, Opcode::ConstNumber { value: 1 }, int());
    let put = ir.push(
        b0,
        Opcode::InstancePut {
            field,
            object: receiver,
            value,
        },
    );
    let invoke = ir.push(
        b0,
        Opcode::Invoke {
            kind: InvokeKind::Direct,
            method: init,
            args: smallvec![receiver],
        },
    );
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    for instr in [put, invoke] {
        let check = |ty, query| {
            definitely_triggers_class_initialization(
                &code,
                &p.app,
                instr,
                ty,
                query,
                AnalysisAssumption::None,
            )
        };
        assert!(check(sub, Query::Directly));
        assert!(!check(p.a, Query::Directly));
        assert!(!check(p.b, Query::Directly));
        assert!(check(p.a, Query::DirectlyOrIndirectly));
    }
}

/// Classes a callee initializes on normal exit count only indirectly.
#[test]
fn callee_initialized_classes() {
    let mut p = program();
    let helper = p.static_method(p.b, "helper", vec![]);
    p.app
        .method_mut(helper)
        .optimization_info
        .initialized_classes_on_normal_exit = vec![p.a];
    let main = p.static_method(p.b, "main", vec![]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let invoke = ir.push(b0, call(helper));
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    let does_not_throw = AnalysisAssumption::InstructionDoesNotThrow;
    assert!(definitely_triggers_class_initialization(
        &code,
        &p.app,
        invoke,
        p.a,
        Query::DirectlyOrIndirectly,
        does_not_throw
    ));
    assert!(!definitely_triggers_class_initialization(
        &code,
        &p.app,
        invoke,
        p.a,
        Query::Directly,
        does_not_throw
    ));
    assert!(!definitely_triggers_class_initialization(
        &code,
        &p.app,
        invoke,
        p.a,
        Query::DirectlyOrIndirectly,
        AnalysisAssumption::None
    ));
}

/// Class initializers of known-initialized classes are followed.
#[test]
fn class_initializer_chain() {
    let mut p = program();
    let clinit = p.class_initializer(p.b);
    p.app
        .method_mut(clinit)
        .optimization_info
        .initialized_classes_on_normal_exit = vec![p.a];
    let touch = p.static_method(p.b, "touch", vec![]);
    let main = p.static_method(p.object, "main", vec![]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let invoke = ir.push(b0, call(touch));
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    assert!(definitely_triggers_class_initialization(
        &code,
        &p.app,
        invoke,
        p.a,
        Query::DirectlyOrIndirectly,
        AnalysisAssumption::InstructionDoesNotThrow
    ));
}

/// Interface calls without a known target prove nothing about the
/// receiver's class.
#[test]
fn interface_invoke_without_single_target() {
    let mut p = program();
    let iface = p
        .app
        .define_class("LI;", Some(p.object), ClassFlags::INTERFACE);
    let run = p.virtual_method(iface, "run", vec![]);
    let main = p.static_method(p.b, "main", vec![iface]);
    let mut ir = IrCodeBuilder::for_method(&p.app, main);
    let b0 = ir.new_block();
    let receiver = ir.push_value(b0, Opcode::Argument { index: 0 }, non_null(&p.app, iface));
    let invoke = ir.push(
        b0,
        Opcode::Invoke {
            kind: InvokeKind::Interface,
            method: run,
            args: smallvec![receiver],
        },
    );
    ir.push(b0, Opcode::Return { value: None });
    let code = ir.build().unwrap();

    assert!(!definitely_triggers_class_initialization(
        &code,
        &p.app,
        invoke,
        iface,
        Query::DirectlyOrIndirectly,
        AnalysisAssumption::InstructionDoesNotThrow
    ));
}

/// After a rewrite the caches are rebuilt from the new code.
#[test]
fn notify_code_has_changed_rebuilds_caches() {
    let mut p = program();
    let (ir, first, second) = two_blocks(&mut p);
    let mut code = ir.build().unwrap();
    let mut analysis = ClassInitializationAnalysis::new(&p.app);
    assert!(analysis.is_class_definitely_loaded_before_instruction(&code, p.a, second));

    code.replace_opcode(first, Opcode::DebugPosition);
    analysis.notify_code_has_changed();
    assert!(!analysis.is_class_definitely_loaded_before_instruction(&code, p.a, second));
}
