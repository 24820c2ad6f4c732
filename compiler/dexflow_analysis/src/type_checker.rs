//! Post-optimization type verification.
//!
//! [`TypeChecker`] re-checks the places where a value flows into a declared
//! type: field stores, returns and throws. It is deliberately incomplete.
//! A `false` verdict means "do not trust this code", never "the input
//! program is invalid".

use dexflow_ir::{
    AppView, FieldId, InstrId, IrCode, Nullability, Opcode, TypeElement, TypeId, TypeKind, ValueId,
};

/// Assignability of IR value types to declared types.
pub struct VerifyTypesHelper<'a> {
    app: &'a AppView,
}

impl<'a> VerifyTypesHelper<'a> {
    pub fn new(app: &'a AppView) -> Self {
        VerifyTypesHelper { app }
    }

    /// Can a value of type `value` be stored where `target` is declared?
    ///
    /// Nullability is ignored. Any reference is assignable to an interface,
    /// as the JVM verifier does not check interface types either.
    pub fn is_assignable(&self, value: TypeElement, target: TypeId) -> bool {
        let app = self.app;
        match (value, app.type_kind(target)) {
            (TypeElement::Bottom, _) => true,
            (TypeElement::Primitive(a), TypeKind::Primitive(b)) => {
                a == b || (a.is_int_like() && b.is_int_like())
            }
            (TypeElement::Reference { .. }, TypeKind::Class)
                if app.class(target).is_some_and(|c| c.is_interface()) =>
            {
                true
            }
            (TypeElement::Reference { .. }, TypeKind::Class | TypeKind::Array) => value
                .with_nullability(Nullability::Maybe)
                .less_than_or_equal(TypeElement::from_type(target, Nullability::Maybe, app), app),
            _ => false,
        }
    }
}

pub struct TypeChecker<'a> {
    app: &'a AppView,
    helper: VerifyTypesHelper<'a>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(app: &'a AppView) -> Self {
        TypeChecker {
            app,
            helper: VerifyTypesHelper::new(app),
        }
    }

    /// `true` when every field store, return and throw in `code` is
    /// well typed.
    pub fn check(&self, code: &IrCode) -> bool {
        let verdict = code.instructions().all(|instr| self.check_instruction(code, instr));
        tracing::debug!(method = ?code.context(), verdict, "type check");
        verdict
    }

    fn check_instruction(&self, code: &IrCode, instr: InstrId) -> bool {
        let ok = match *code.opcode(instr) {
            Opcode::InstancePut { field, value, .. } | Opcode::StaticPut { field, value } => {
                self.check_field_put(code, field, value)
            }
            Opcode::Return { value: Some(value) } => {
                let return_type = self.app.method(code.context()).return_type;
                self.check_value(code, value, return_type)
            }
            Opcode::Throw { exception } => {
                self.check_value(code, exception, self.app.well_known().throwable)
            }
            _ => true,
        };
        if !ok {
            tracing::trace!(?instr, opcode = ?code.opcode(instr), "ill-typed instruction");
        }
        ok
    }

    fn check_field_put(&self, code: &IrCode, field: FieldId, value: ValueId) -> bool {
        self.check_value(code, value, self.app.field(field).ty)
    }

    fn check_value(&self, code: &IrCode, value: ValueId, target: TypeId) -> bool {
        self.helper.is_assignable(code.value(value).ty, target)
    }
}
