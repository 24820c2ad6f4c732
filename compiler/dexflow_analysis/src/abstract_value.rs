//! Abstract values and dynamic types of IR values.

use dexflow_ir::{AbstractValue, AppView, IrCode, Opcode, SingleValue, TypeElement, TypeId, ValueId};

/// What is statically known about the runtime value of `value`.
///
/// Constants are known directly; a static field read is as precise as the
/// abstract value previously recorded for the field.
pub(crate) fn compute_abstract_value(code: &IrCode, app: &AppView, value: ValueId) -> AbstractValue {
    let root = code.aliased_value(value);
    let Some(opcode) = code.definition_opcode(root) else {
        return AbstractValue::Unknown;
    };
    match opcode {
        Opcode::ConstNumber { value } => AbstractValue::Single(SingleValue::Number(*value)),
        Opcode::ConstNull => AbstractValue::Single(SingleValue::Number(0)),
        Opcode::ConstString { value } => AbstractValue::Single(SingleValue::String(value.clone())),
        Opcode::ConstClass { class } => AbstractValue::Single(SingleValue::ConstClass(*class)),
        Opcode::StaticGet { field } => match &app.field(*field).optimization_info.abstract_value {
            single @ AbstractValue::Single(_) => single.clone(),
            _ => AbstractValue::Unknown,
        },
        _ => AbstractValue::Unknown,
    }
}

/// The most precise static type of `value`.
pub(crate) fn dynamic_upper_bound_type(code: &IrCode, value: ValueId) -> TypeElement {
    code.value(value).ty
}

/// The exact runtime class of `value`, when it is a fresh allocation.
pub(crate) fn dynamic_lower_bound_type(code: &IrCode, value: ValueId) -> Option<TypeId> {
    match code.definition_opcode(code.aliased_value(value))? {
        Opcode::NewInstance { class } => Some(*class),
        _ => None,
    }
}
