//! Whole-program knowledge: class hierarchy, definitions and liveness facts.
//!
//! [`AppView`] is the in-process stand-in for everything the analyses ask
//! of the surrounding optimizer: "what is the superclass of `A`", "is this
//! field only written in `<clinit>`", "is this class pinned by a keep rule",
//! "what does this virtual call resolve to". Definitions are created up
//! front (by a bytecode reader in a real driver, by test fixtures here) and
//! are then only read, apart from the optimization info that earlier passes
//! record into them.
//!
//! Types are interned by descriptor (`LA;`, `I`, `[LA;`) into [`TypeId`]s,
//! so type equality is a `u32` comparison.

use std::collections::VecDeque;

use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::optimization::{FieldOptimizationInfo, MethodOptimizationInfo};
use crate::types::PrimitiveType;

// ── Item handles ────────────────────────────────────────────────────

index_newtype! {
    /// Interned type descriptor.
    TypeId
}

index_newtype! {
    /// Field definition handle within an [`AppView`].
    FieldId
}

index_newtype! {
    /// Method definition handle within an [`AppView`].
    MethodId
}

/// Shape of a type, derived from its descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive(PrimitiveType),
    Void,
    Class,
    Array,
}

// ── Flags ───────────────────────────────────────────────────────────

bitflags! {
    /// Properties of a class definition.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct ClassFlags: u32 {
        const INTERFACE = 1 << 0;
        const ENUM = 1 << 1;
        /// Defined outside the program (no code available).
        const LIBRARY = 1 << 2;
        /// Kept by a keep rule; may not be renamed, removed or merged.
        const PINNED = 1 << 3;
        /// The class initializer has observable side effects.
        const CLINIT_SIDE_EFFECTS = 1 << 4;
    }
}

bitflags! {
    /// Properties of a field definition.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct FieldFlags: u32 {
        const STATIC = 1 << 0;
        const FINAL = 1 << 1;
        /// An enum constant field (`static final E A`).
        const ENUM = 1 << 2;
        const PINNED = 1 << 3;
    }
}

bitflags! {
    /// Properties of a method definition.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct MethodFlags: u32 {
        const STATIC = 1 << 0;
        /// Instance initializer (`<init>`).
        const CONSTRUCTOR = 1 << 1;
        /// Class initializer (`<clinit>`).
        const CLASS_INITIALIZER = 1 << 2;
        const LIBRARY = 1 << 3;
    }
}

// ── Definitions ─────────────────────────────────────────────────────

/// A class, interface or enum definition.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub ty: TypeId,
    pub super_type: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub flags: ClassFlags,
    pub class_initializer: Option<MethodId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
}

impl ClassDef {
    #[inline]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    #[inline]
    pub fn is_enum(&self) -> bool {
        self.flags.contains(ClassFlags::ENUM)
    }
}

/// A field definition plus the liveness facts known about it.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub holder: TypeId,
    pub name: String,
    pub ty: TypeId,
    pub flags: FieldFlags,
    /// Set when whole-program analysis proved that every write to this
    /// field happens inside this one method.
    pub written_only_in: Option<MethodId>,
    /// Set when every write to this (instance) field happens inside an
    /// instance initializer of its holder.
    pub written_only_in_instance_initializers: bool,
    pub optimization_info: FieldOptimizationInfo,
}

impl FieldDef {
    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.flags.contains(FieldFlags::FINAL)
    }
}

/// A method definition plus the optimization info known about it.
#[derive(Clone, Debug)]
pub struct MethodDef {
    pub holder: TypeId,
    pub name: String,
    /// Declared parameter types, excluding the receiver.
    pub params: Vec<TypeId>,
    pub return_type: TypeId,
    pub flags: MethodFlags,
    pub optimization_info: MethodOptimizationInfo,
}

impl MethodDef {
    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    #[inline]
    pub fn is_instance_initializer(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    #[inline]
    pub fn is_class_initializer(&self) -> bool {
        self.flags.contains(MethodFlags::CLASS_INITIALIZER)
    }

    /// Number of IR arguments, including the receiver of instance methods.
    pub fn arity(&self) -> usize {
        self.params.len() + usize::from(!self.is_static())
    }

    /// Type of IR argument `index`; index 0 is the receiver of instance methods.
    pub fn argument_type(&self, index: usize) -> Option<TypeId> {
        if self.is_static() {
            self.params.get(index).copied()
        } else if index == 0 {
            Some(self.holder)
        } else {
            self.params.get(index - 1).copied()
        }
    }
}

// ── Well-known items ────────────────────────────────────────────────

/// Library types and methods the analyses refer to by identity.
#[derive(Clone, Copy, Debug)]
pub struct WellKnown {
    pub object: TypeId,
    pub string: TypeId,
    pub class: TypeId,
    pub enum_: TypeId,
    pub throwable: TypeId,
    pub exception: TypeId,
    pub runtime_exception: TypeId,
    pub null_pointer_exception: TypeId,
    pub arithmetic_exception: TypeId,
    pub array_index_out_of_bounds_exception: TypeId,
    pub array_store_exception: TypeId,
    pub class_cast_exception: TypeId,
    pub negative_array_size_exception: TypeId,
    pub error: TypeId,
    pub linkage_error: TypeId,
    pub exception_in_initializer_error: TypeId,
    pub no_class_def_found_error: TypeId,
    pub boolean: TypeId,
    pub int: TypeId,
    pub long: TypeId,
    pub void: TypeId,
    /// `java.lang.Class.desiredAssertionStatus()`.
    pub desired_assertion_status: MethodId,
}

// ── AppView ─────────────────────────────────────────────────────────

/// The whole program: interned types, definitions and liveness facts.
#[derive(Clone, Debug)]
pub struct AppView {
    descriptors: Vec<String>,
    type_index: FxHashMap<String, TypeId>,
    array_elements: FxHashMap<TypeId, TypeId>,
    classes: FxHashMap<TypeId, ClassDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    single_targets: FxHashMap<MethodId, MethodId>,
    well_known: WellKnown,
}

impl Default for AppView {
    fn default() -> Self {
        Self::new()
    }
}

impl AppView {
    /// Create a program containing only the well-known library classes.
    pub fn new() -> Self {
        let placeholder = TypeId::new(0);
        let mut app = AppView {
            descriptors: Vec::new(),
            type_index: FxHashMap::default(),
            array_elements: FxHashMap::default(),
            classes: FxHashMap::default(),
            fields: Vec::new(),
            methods: Vec::new(),
            single_targets: FxHashMap::default(),
            well_known: WellKnown {
                object: placeholder,
                string: placeholder,
                class: placeholder,
                enum_: placeholder,
                throwable: placeholder,
                exception: placeholder,
                runtime_exception: placeholder,
                null_pointer_exception: placeholder,
                arithmetic_exception: placeholder,
                array_index_out_of_bounds_exception: placeholder,
                array_store_exception: placeholder,
                class_cast_exception: placeholder,
                negative_array_size_exception: placeholder,
                error: placeholder,
                linkage_error: placeholder,
                exception_in_initializer_error: placeholder,
                no_class_def_found_error: placeholder,
                boolean: placeholder,
                int: placeholder,
                long: placeholder,
                void: placeholder,
                desired_assertion_status: MethodId::new(0),
            },
        };

        let lib = ClassFlags::LIBRARY;
        let object = app.define_class("Ljava/lang/Object;", None, lib);
        let string = app.define_class("Ljava/lang/String;", Some(object), lib);
        let class = app.define_class("Ljava/lang/Class;", Some(object), lib);
        let enum_ = app.define_class("Ljava/lang/Enum;", Some(object), lib);
        let throwable = app.define_class("Ljava/lang/Throwable;", Some(object), lib);
        let exception = app.define_class("Ljava/lang/Exception;", Some(throwable), lib);
        let runtime_exception =
            app.define_class("Ljava/lang/RuntimeException;", Some(exception), lib);
        let runtime = |app: &mut AppView, descriptor: &str| {
            app.define_class(descriptor, Some(runtime_exception), lib)
        };
        let null_pointer_exception = runtime(&mut app, "Ljava/lang/NullPointerException;");
        let arithmetic_exception = runtime(&mut app, "Ljava/lang/ArithmeticException;");
        let array_index_out_of_bounds_exception =
            runtime(&mut app, "Ljava/lang/ArrayIndexOutOfBoundsException;");
        let array_store_exception = runtime(&mut app, "Ljava/lang/ArrayStoreException;");
        let class_cast_exception = runtime(&mut app, "Ljava/lang/ClassCastException;");
        let negative_array_size_exception =
            runtime(&mut app, "Ljava/lang/NegativeArraySizeException;");
        let error = app.define_class("Ljava/lang/Error;", Some(throwable), lib);
        let linkage_error = app.define_class("Ljava/lang/LinkageError;", Some(error), lib);
        let exception_in_initializer_error = app.define_class(
            "Ljava/lang/ExceptionInInitializerError;",
            Some(linkage_error),
            lib,
        );
        let no_class_def_found_error =
            app.define_class("Ljava/lang/NoClassDefFoundError;", Some(linkage_error), lib);

        let boolean = app.intern_type("Z");
        let int = app.intern_type("I");
        let long = app.intern_type("J");
        let void = app.intern_type("V");

        let desired_assertion_status = app.add_method(
            class,
            "desiredAssertionStatus",
            vec![],
            boolean,
            MethodFlags::LIBRARY,
        );
        app.method_mut(desired_assertion_status)
            .optimization_info
            .may_have_side_effects = false;

        app.well_known = WellKnown {
            object,
            string,
            class,
            enum_,
            throwable,
            exception,
            runtime_exception,
            null_pointer_exception,
            arithmetic_exception,
            array_index_out_of_bounds_exception,
            array_store_exception,
            class_cast_exception,
            negative_array_size_exception,
            error,
            linkage_error,
            exception_in_initializer_error,
            no_class_def_found_error,
            boolean,
            int,
            long,
            void,
            desired_assertion_status,
        };
        app
    }

    #[inline]
    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    // ── Types ───────────────────────────────────────────────────────

    /// Intern a type descriptor, returning its stable [`TypeId`].
    ///
    /// Array descriptors also intern their element type.
    pub fn intern_type(&mut self, descriptor: &str) -> TypeId {
        if let Some(&ty) = self.type_index.get(descriptor) {
            return ty;
        }
        let ty = TypeId::from_usize(self.descriptors.len());
        self.descriptors.push(descriptor.to_owned());
        self.type_index.insert(descriptor.to_owned(), ty);
        if let Some(element) = descriptor.strip_prefix('[') {
            let element = self.intern_type(element);
            self.array_elements.insert(ty, element);
        }
        ty
    }

    /// Look up an already interned descriptor.
    pub fn lookup_type(&self, descriptor: &str) -> Option<TypeId> {
        self.type_index.get(descriptor).copied()
    }

    pub fn descriptor(&self, ty: TypeId) -> &str {
        &self.descriptors[ty.index()]
    }

    pub fn type_kind(&self, ty: TypeId) -> TypeKind {
        let descriptor = self.descriptor(ty);
        match descriptor.as_bytes().first() {
            Some(b'[') => TypeKind::Array,
            Some(b'L') => TypeKind::Class,
            Some(b'V') => TypeKind::Void,
            Some(&c) => PrimitiveType::from_descriptor(char::from(c))
                .map_or(TypeKind::Class, TypeKind::Primitive),
            None => TypeKind::Class,
        }
    }

    #[inline]
    pub fn is_reference_type(&self, ty: TypeId) -> bool {
        matches!(self.type_kind(ty), TypeKind::Class | TypeKind::Array)
    }

    /// Element type of an array type.
    pub fn array_element_type(&self, ty: TypeId) -> Option<TypeId> {
        self.array_elements.get(&ty).copied()
    }

    // ── Definitions ─────────────────────────────────────────────────

    /// Define (or redefine) a class.
    pub fn define_class(
        &mut self,
        descriptor: &str,
        super_type: Option<TypeId>,
        flags: ClassFlags,
    ) -> TypeId {
        let ty = self.intern_type(descriptor);
        self.classes.insert(
            ty,
            ClassDef {
                ty,
                super_type,
                interfaces: Vec::new(),
                flags,
                class_initializer: None,
                fields: Vec::new(),
                methods: Vec::new(),
            },
        );
        ty
    }

    pub fn add_interface(&mut self, ty: TypeId, interface: TypeId) {
        if let Some(class) = self.classes.get_mut(&ty) {
            class.interfaces.push(interface);
        }
    }

    pub fn add_field(&mut self, holder: TypeId, name: &str, ty: TypeId, flags: FieldFlags) -> FieldId {
        let id = FieldId::from_usize(self.fields.len());
        self.fields.push(FieldDef {
            holder,
            name: name.to_owned(),
            ty,
            flags,
            written_only_in: None,
            written_only_in_instance_initializers: false,
            optimization_info: FieldOptimizationInfo::default(),
        });
        if let Some(class) = self.classes.get_mut(&holder) {
            class.fields.push(id);
        }
        id
    }

    /// Add a method. A method flagged [`MethodFlags::CLASS_INITIALIZER`]
    /// becomes its holder's class initializer.
    pub fn add_method(
        &mut self,
        holder: TypeId,
        name: &str,
        params: Vec<TypeId>,
        return_type: TypeId,
        flags: MethodFlags,
    ) -> MethodId {
        let id = MethodId::from_usize(self.methods.len());
        self.methods.push(MethodDef {
            holder,
            name: name.to_owned(),
            params,
            return_type,
            flags,
            optimization_info: MethodOptimizationInfo::default(),
        });
        if let Some(class) = self.classes.get_mut(&holder) {
            class.methods.push(id);
            if flags.contains(MethodFlags::CLASS_INITIALIZER) {
                class.class_initializer = Some(id);
            }
        }
        id
    }

    pub fn class(&self, ty: TypeId) -> Option<&ClassDef> {
        self.classes.get(&ty)
    }

    pub fn class_mut(&mut self, ty: TypeId) -> Option<&mut ClassDef> {
        self.classes.get_mut(&ty)
    }

    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.index()]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut FieldDef {
        &mut self.fields[id.index()]
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.index()]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.index()]
    }

    /// Instance fields of `ty` and of its program superclasses.
    pub fn instance_fields(&self, ty: TypeId) -> Vec<FieldId> {
        let mut result = Vec::new();
        let mut current = Some(ty);
        while let Some(t) = current {
            let Some(class) = self.class(t) else { break };
            result.extend(
                class
                    .fields
                    .iter()
                    .copied()
                    .filter(|&f| !self.field(f).is_static()),
            );
            current = class.super_type;
        }
        result
    }

    // ── Call resolution ─────────────────────────────────────────────

    /// Record that calls to `invoked` always dispatch to `target`.
    pub fn set_single_target(&mut self, invoked: MethodId, target: MethodId) {
        self.single_targets.insert(invoked, target);
    }

    /// The unique dispatch target of a virtual/interface/super call, if
    /// whole-program analysis found one.
    pub fn single_target(&self, invoked: MethodId) -> Option<MethodId> {
        self.single_targets.get(&invoked).copied()
    }

    // ── Subtyping ───────────────────────────────────────────────────

    /// Is `sub` a subtype of `sup` (reflexive, through superclasses,
    /// interfaces and array covariance)?
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup {
            return true;
        }
        match (self.type_kind(sub), self.type_kind(sup)) {
            (TypeKind::Class | TypeKind::Array, TypeKind::Class) if sup == self.well_known.object => {
                true
            }
            (TypeKind::Array, TypeKind::Array) => {
                match (self.array_element_type(sub), self.array_element_type(sup)) {
                    (Some(a), Some(b)) if self.is_reference_type(a) && self.is_reference_type(b) => {
                        self.is_subtype(a, b)
                    }
                    _ => false,
                }
            }
            (TypeKind::Class, TypeKind::Class) => {
                let mut visited = FxHashSet::default();
                let mut worklist = VecDeque::from([sub]);
                while let Some(current) = worklist.pop_front() {
                    if current == sup {
                        return true;
                    }
                    if !visited.insert(current) {
                        continue;
                    }
                    if let Some(class) = self.class(current) {
                        worklist.extend(class.super_type);
                        worklist.extend(class.interfaces.iter().copied());
                    }
                }
                false
            }
            _ => false,
        }
    }

    /// Is `sup` `sub` itself or one of its superclasses? Interfaces are
    /// not considered: initializing a class does not initialize them.
    pub fn is_subclass_of(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut current = Some(sub);
        while let Some(t) = current {
            if t == sup {
                return true;
            }
            current = self.class(t).and_then(|c| c.super_type);
        }
        false
    }

    // ── Liveness facts ──────────────────────────────────────────────

    pub fn is_pinned_class(&self, ty: TypeId) -> bool {
        self.class(ty)
            .is_some_and(|c| c.flags.contains(ClassFlags::PINNED))
    }

    pub fn is_pinned_field(&self, field: FieldId) -> bool {
        self.field(field).flags.contains(FieldFlags::PINNED)
    }

    /// Is every write to `field` inside `method`? Pinned fields may be
    /// written reflectively and never qualify.
    pub fn is_field_only_written_in_method(&self, field: FieldId, method: MethodId) -> bool {
        !self.is_pinned_field(field) && self.is_field_only_written_in_method_ignoring_pinning(field, method)
    }

    pub fn is_field_only_written_in_method_ignoring_pinning(
        &self,
        field: FieldId,
        method: MethodId,
    ) -> bool {
        self.field(field).written_only_in == Some(method)
    }

    pub fn is_instance_field_written_only_in_instance_initializers(&self, field: FieldId) -> bool {
        let def = self.field(field);
        !def.is_static() && !self.is_pinned_field(field) && def.written_only_in_instance_initializers
    }

    /// Could initializing `ty` from within `context` run code with
    /// observable side effects?
    ///
    /// Classes that `context`'s holder extends are already initialized
    /// when `context` runs.
    pub fn class_initialization_may_have_side_effects(
        &self,
        ty: TypeId,
        context: Option<MethodId>,
    ) -> bool {
        if let Some(context) = context {
            if self.is_subclass_of(self.method(context).holder, ty) {
                return false;
            }
        }
        let mut current = Some(ty);
        while let Some(t) = current {
            let Some(class) = self.class(t) else {
                return true;
            };
            if class.flags.contains(ClassFlags::CLINIT_SIDE_EFFECTS) {
                return true;
            }
            current = class.super_type;
        }
        false
    }
}
