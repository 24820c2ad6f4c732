//! Shared test utilities for the analysis crate.
//!
//! Only compiled in test builds.

use dexflow_ir::{
    AppView, ClassFlags, FieldFlags, FieldId, MethodFlags, MethodId, Nullability, PrimitiveType,
    TypeElement, TypeId,
};

pub(crate) fn int() -> TypeElement {
    TypeElement::Primitive(PrimitiveType::Int)
}

pub(crate) fn boolean() -> TypeElement {
    TypeElement::Primitive(PrimitiveType::Boolean)
}

pub(crate) fn maybe_null(app: &AppView, ty: TypeId) -> TypeElement {
    TypeElement::from_type(ty, Nullability::Maybe, app)
}

pub(crate) fn non_null(app: &AppView, ty: TypeId) -> TypeElement {
    TypeElement::from_type(ty, Nullability::DefinitelyNotNull, app)
}

/// A program with two unrelated classes `LA;` and `LB;`.
pub(crate) struct Program {
    pub app: AppView,
    pub object: TypeId,
    pub void: TypeId,
    pub int: TypeId,
    pub a: TypeId,
    pub b: TypeId,
}

pub(crate) fn program() -> Program {
    let mut app = AppView::new();
    let wk = *app.well_known();
    let a = app.define_class("LA;", Some(wk.object), ClassFlags::empty());
    let b = app.define_class("LB;", Some(wk.object), ClassFlags::empty());
    Program {
        app,
        object: wk.object,
        void: wk.void,
        int: wk.int,
        a,
        b,
    }
}

impl Program {
    pub fn static_method(&mut self, holder: TypeId, name: &str, params: Vec<TypeId>) -> MethodId {
        self.app
            .add_method(holder, name, params, self.void, MethodFlags::STATIC)
    }

    pub fn virtual_method(&mut self, holder: TypeId, name: &str, params: Vec<TypeId>) -> MethodId {
        self.app
            .add_method(holder, name, params, self.void, MethodFlags::empty())
    }

    pub fn constructor(&mut self, holder: TypeId, params: Vec<TypeId>) -> MethodId {
        self.app
            .add_method(holder, "<init>", params, self.void, MethodFlags::CONSTRUCTOR)
    }

    pub fn class_initializer(&mut self, holder: TypeId) -> MethodId {
        self.app.add_method(
            holder,
            "<clinit>",
            Vec::new(),
            self.void,
            MethodFlags::STATIC | MethodFlags::CLASS_INITIALIZER,
        )
    }

    /// A static field of `holder` written only in `writer`.
    pub fn static_field(
        &mut self,
        holder: TypeId,
        name: &str,
        ty: TypeId,
        writer: MethodId,
    ) -> FieldId {
        let field = self.app.add_field(holder, name, ty, FieldFlags::STATIC);
        self.app.field_mut(field).written_only_in = Some(writer);
        field
    }

    /// An instance field of `holder` written only in its constructors.
    pub fn instance_field(&mut self, holder: TypeId, name: &str, ty: TypeId, flags: FieldFlags) -> FieldId {
        let field = self.app.add_field(holder, name, ty, flags);
        self.app
            .field_mut(field)
            .written_only_in_instance_initializers = true;
        field
    }

    /// Mark `method` as free of side effects.
    pub fn pure(&mut self, method: MethodId) {
        self.app.method_mut(method).optimization_info.may_have_side_effects = false;
    }
}
