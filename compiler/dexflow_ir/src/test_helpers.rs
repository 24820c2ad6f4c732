//! Shared test utilities for the IR crate.
//!
//! Only compiled in test builds.

use crate::app::{AppView, ClassFlags, MethodFlags, MethodId, TypeId};
use crate::builder::IrCodeBuilder;
use crate::code::{BlockId, IfKind, Opcode, ValueId};
use crate::types::{PrimitiveType, TypeElement};

/// Shorthand for `ValueId::new(n)`.
pub(crate) fn v(n: u32) -> ValueId {
    ValueId::new(n)
}

/// Shorthand for `BlockId::new(n)`.
pub(crate) fn b(n: u32) -> BlockId {
    BlockId::new(n)
}

pub(crate) fn int() -> TypeElement {
    TypeElement::Primitive(PrimitiveType::Int)
}

/// A program with one class `LA;` declaring a static `m(I)V`.
pub(crate) struct Fixture {
    pub app: AppView,
    pub a: TypeId,
    pub method: MethodId,
}

pub(crate) fn fixture() -> Fixture {
    let mut app = AppView::new();
    let object = app.well_known().object;
    let int = app.well_known().int;
    let void = app.well_known().void;
    let a = app.define_class("LA;", Some(object), ClassFlags::empty());
    let method = app.add_method(a, "m", vec![int], void, MethodFlags::STATIC);
    Fixture { app, a, method }
}

/// `b0: if v0 == 0 -> b1 else b2; b1: goto b3; b2: goto b3; b3: return`.
pub(crate) fn diamond(method: MethodId) -> IrCodeBuilder {
    let mut ir = IrCodeBuilder::new(method, true);
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
    ir.push(left, Opcode::Goto { target: join });
    ir.push(right, Opcode::Goto { target: join });
    ir.push(join, Opcode::Return { value: None });
    ir
}
