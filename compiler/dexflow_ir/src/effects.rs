//! Conservative effect predicates for instructions.
//!
//! All predicates over-approximate: "may throw" and "may have side effects"
//! answer `true` unless the instruction provably cannot. Virtual machine
//! errors that any instruction may raise (out of memory, stack overflow)
//! are not modelled.

use smallvec::{smallvec, SmallVec};

use crate::app::{AppView, TypeId};
use crate::code::{InstrId, InvokeKind, IrCode, Opcode};

/// Exceptions an instruction may throw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThrownExceptions {
    None,
    /// Only instances of these types (or their subtypes).
    Known(SmallVec<[TypeId; 2]>),
    /// Any throwable.
    Any,
}

impl ThrownExceptions {
    /// Could a handler guarded by `guard` catch one of these exceptions?
    pub fn may_be_caught_by(&self, guard: TypeId, app: &AppView) -> bool {
        match self {
            ThrownExceptions::None => false,
            ThrownExceptions::Any => true,
            ThrownExceptions::Known(types) => types
                .iter()
                .any(|&t| app.is_subtype(t, guard) || app.is_subtype(guard, t)),
        }
    }
}

/// Can an instruction of this kind throw at all, irrespective of operands?
pub fn instruction_type_can_throw(opcode: &Opcode) -> bool {
    match opcode {
        Opcode::Argument { .. }
        | Opcode::ConstNumber { .. }
        | Opcode::ConstNull
        | Opcode::ConstString { .. }
        | Opcode::Assume { .. }
        | Opcode::Move { .. }
        | Opcode::DebugPosition
        | Opcode::Goto { .. }
        | Opcode::If { .. }
        | Opcode::Return { .. } => false,
        Opcode::Binop { kind, .. } => kind.can_throw(),
        Opcode::ConstClass { .. }
        | Opcode::CheckCast { .. }
        | Opcode::StaticGet { .. }
        | Opcode::StaticPut { .. }
        | Opcode::InstanceGet { .. }
        | Opcode::InstancePut { .. }
        | Opcode::ArrayGet { .. }
        | Opcode::ArrayPut { .. }
        | Opcode::ArrayLength { .. }
        | Opcode::NewInstance { .. }
        | Opcode::NewArrayEmpty { .. }
        | Opcode::NewArrayFilled { .. }
        | Opcode::FillArrayData { .. }
        | Opcode::Invoke { .. }
        | Opcode::InitClass { .. }
        | Opcode::Throw { .. } => true,
    }
}

/// The exception types `instr` may throw.
pub fn thrown_exceptions(code: &IrCode, app: &AppView, instr: InstrId) -> ThrownExceptions {
    let opcode = code.opcode(instr);
    if !instruction_type_can_throw(opcode) {
        return ThrownExceptions::None;
    }
    let wk = app.well_known();
    let known = |types: &[TypeId]| ThrownExceptions::Known(types.iter().copied().collect());
    match opcode {
        Opcode::Binop { .. } => known(&[wk.arithmetic_exception]),
        Opcode::CheckCast { .. } => known(&[wk.class_cast_exception]),
        Opcode::InstanceGet { .. } | Opcode::InstancePut { .. } | Opcode::ArrayLength { .. } => {
            known(&[wk.null_pointer_exception])
        }
        Opcode::FillArrayData { .. } => known(&[wk.null_pointer_exception]),
        Opcode::ArrayGet { .. } => known(&[
            wk.null_pointer_exception,
            wk.array_index_out_of_bounds_exception,
        ]),
        Opcode::ArrayPut { .. } => ThrownExceptions::Known(smallvec![
            wk.null_pointer_exception,
            wk.array_index_out_of_bounds_exception,
            wk.array_store_exception,
        ]),
        Opcode::NewArrayEmpty { .. } => known(&[wk.negative_array_size_exception]),
        // Class loading and initialization failures are all errors.
        Opcode::ConstClass { .. }
        | Opcode::StaticGet { .. }
        | Opcode::StaticPut { .. }
        | Opcode::NewInstance { .. }
        | Opcode::NewArrayFilled { .. }
        | Opcode::InitClass { .. } => known(&[wk.error]),
        _ => ThrownExceptions::Any,
    }
}

/// Could executing `instr` be observed by anything but its output value?
pub fn may_have_side_effects(code: &IrCode, app: &AppView, instr: InstrId) -> bool {
    let context = Some(code.context());
    let not_null = |v| code.value(v).ty.is_definitely_not_null();
    match code.opcode(instr) {
        Opcode::Argument { .. }
        | Opcode::ConstNumber { .. }
        | Opcode::ConstNull
        | Opcode::ConstString { .. }
        | Opcode::Assume { .. }
        | Opcode::Move { .. }
        | Opcode::DebugPosition
        | Opcode::Goto { .. }
        | Opcode::If { .. }
        | Opcode::Return { .. }
        | Opcode::NewArrayFilled { .. } => false,

        Opcode::Binop { kind, right, .. } => {
            kind.can_throw() && code.const_number(*right).map_or(true, |c| c == 0)
        }
        // Loads the class without initializing it.
        Opcode::ConstClass { class } => app.class(*class).is_none(),
        Opcode::NewInstance { class } | Opcode::InitClass { class } => {
            app.class(*class).is_none()
                || app.class_initialization_may_have_side_effects(*class, context)
        }
        Opcode::StaticGet { field } => {
            let holder = app.field(*field).holder;
            app.class_initialization_may_have_side_effects(holder, context)
        }
        Opcode::InstanceGet { object, .. } => !not_null(*object),
        Opcode::ArrayLength { array } => !not_null(*array),
        Opcode::NewArrayEmpty { size, .. } => code.const_number(*size).map_or(true, |n| n < 0),
        Opcode::Invoke { kind, method, args } => {
            if kind.has_receiver() && args.first().map_or(true, |&r| !not_null(r)) {
                return true;
            }
            let target = if kind.is_dynamic() {
                match app.single_target(*method) {
                    Some(target) => target,
                    None => return true,
                }
            } else {
                *method
            };
            let def = app.method(target);
            if *kind == InvokeKind::Static
                && app.class_initialization_may_have_side_effects(def.holder, context)
            {
                return true;
            }
            def.optimization_info.may_have_side_effects
        }
        Opcode::CheckCast { .. }
        | Opcode::StaticPut { .. }
        | Opcode::InstancePut { .. }
        | Opcode::ArrayGet { .. }
        | Opcode::ArrayPut { .. }
        | Opcode::FillArrayData { .. }
        | Opcode::Throw { .. } => true,
    }
}
