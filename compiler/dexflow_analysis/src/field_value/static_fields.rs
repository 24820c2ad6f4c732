//! Static field values after a class initializer.

use std::collections::BTreeMap;

use dexflow_ir::{
    AbstractValue, AppView, FieldFlags, FieldId, InstanceFieldInitializationInfo,
    InstrId, InvokeKind, IrCode, MethodId, Nullability, ObjectState, Opcode, SingleValue,
    TypeElement, TypeId, ValueId,
};

use super::{ClassInitializerDefaults, FieldWriteScan, PutVisibility};
use crate::abstract_value::{compute_abstract_value, dynamic_lower_bound_type, dynamic_upper_bound_type};
use crate::feedback::OptimizationFeedback;

/// Name of the synthetic static field holding an enum's constants.
const ENUM_VALUES_FIELD: &str = "$VALUES";

pub struct StaticFieldValueAnalysis<'a> {
    app: &'a AppView,
    code: &'a IrCode,
    context: MethodId,
    holder: TypeId,
    defaults: &'a ClassInitializerDefaults,
    scan: FieldWriteScan<'a>,
}

impl<'a> StaticFieldValueAnalysis<'a> {
    /// Record what the class initializer `code` leaves in the static fields
    /// of its holder.
    pub fn run(
        app: &'a AppView,
        code: &'a IrCode,
        defaults: &'a ClassInitializerDefaults,
        feedback: &mut dyn OptimizationFeedback,
    ) {
        let context = code.context();
        let method = app.method(context);
        if !method.is_class_initializer() {
            tracing::debug!(?context, "not a class initializer");
            return;
        }
        let mut analysis = StaticFieldValueAnalysis {
            app,
            code,
            context,
            holder: method.holder,
            defaults,
            scan: FieldWriteScan::new(app, code),
        };
        analysis.compute_field_optimization_info(feedback);
    }

    fn is_subject_to_optimization(&self, field: FieldId) -> bool {
        let def = self.app.field(field);
        def.is_static()
            && def.holder == self.holder
            && self.app.is_field_only_written_in_method(field, self.context)
    }

    /// Enum constants stay eligible when kept, as long as they are written
    /// only here.
    fn is_enum_field_subject_to_optimization(&self, field: FieldId) -> bool {
        let def = self.app.field(field);
        def.is_static()
            && def.flags.contains(FieldFlags::ENUM)
            && def.holder == self.holder
            && self.holder_is_enum()
            && self
                .app
                .is_field_only_written_in_method_ignoring_pinning(field, self.context)
    }

    fn holder_is_enum(&self) -> bool {
        self.app.class(self.holder).is_some_and(|c| c.is_enum())
    }

    fn is_eligible(&self, field: FieldId) -> bool {
        self.is_subject_to_optimization(field) || self.is_enum_field_subject_to_optimization(field)
    }

    fn collect_puts(&self) -> BTreeMap<FieldId, Vec<(InstrId, ValueId)>> {
        let mut puts: BTreeMap<FieldId, Vec<(InstrId, ValueId)>> = BTreeMap::new();
        for instr in self.code.instructions() {
            if let Opcode::StaticPut { field, value } = *self.code.opcode(instr) {
                if self.is_eligible(field) {
                    puts.entry(field).or_default().push((instr, value));
                }
            }
        }
        puts
    }

    fn compute_field_optimization_info(&mut self, feedback: &mut dyn OptimizationFeedback) {
        let puts = self.collect_puts();
        let mut recorded = 0usize;

        for (&field, writes) in &puts {
            let &[(put, value)] = writes.as_slice() else {
                tracing::trace!(?field, writes = writes.len(), "field written more than once");
                continue;
            };
            // Earlier reads see the implicit zero default.
            let prior_same =
                !self.defaults.has_static_value(field) && self.code.is_zero(value);
            match self.scan.classify_put(field, put, prior_same) {
                PutVisibility::Exact => {
                    self.update_field_optimization_info(field, value, feedback);
                    recorded += 1;
                }
                PutVisibility::AfterPriorRead => {
                    if self.record_value_before_and_after(field, value, feedback) {
                        recorded += 1;
                    }
                }
                PutVisibility::Partial => {
                    tracing::trace!(?field, "write does not reach every exit");
                }
            }
        }

        for (field, value) in self.defaults.iter() {
            if puts.contains_key(&field) || !self.is_eligible(field) {
                continue;
            }
            feedback.record_field_has_abstract_value(field, AbstractValue::Single(value.clone()));
            recorded += 1;
        }

        tracing::debug!(
            method = ?self.context,
            candidates = puts.len(),
            recorded,
            "static field values"
        );
    }

    /// A read before the write sees the default, every exit sees the write.
    fn record_value_before_and_after(
        &self,
        field: FieldId,
        value: ValueId,
        feedback: &mut dyn OptimizationFeedback,
    ) -> bool {
        let before = self
            .defaults
            .static_value(field)
            .cloned()
            .unwrap_or(SingleValue::Number(0));
        if !before.is_zero() {
            return false;
        }
        let after = compute_abstract_value(self.code, self.app, value);
        if !after.is_single_constant() {
            return false;
        }
        let AbstractValue::Single(after) = after else {
            return false;
        };
        feedback.record_field_has_abstract_value(field, AbstractValue::one_of(before, after));
        true
    }

    fn update_field_optimization_info(
        &self,
        field: FieldId,
        value: ValueId,
        feedback: &mut dyn OptimizationFeedback,
    ) {
        let (app, code) = (self.app, self.code);
        let root = code.aliased_value(value);
        let field_def = app.field(field);

        let abstract_value = self.compute_abstract_value(field, root);
        if abstract_value.is_unknown() {
            if app.is_reference_type(field_def.ty) {
                let state = self.compute_object_state(root);
                feedback.record_field_has_abstract_value(
                    field,
                    AbstractValue::Single(SingleValue::Field { field, state }),
                );
            }
        } else {
            feedback.record_field_has_abstract_value(field, abstract_value);
        }

        let field_type = TypeElement::from_type(field_def.ty, Nullability::Maybe, app);
        let upper = dynamic_upper_bound_type(code, root);
        if upper.strictly_less_than(field_type, app) {
            feedback.mark_field_has_dynamic_upper_bound_type(field, upper);
        }
        if let Some(lower) = dynamic_lower_bound_type(code, root) {
            debug_assert!(TypeElement::from_type(lower, Nullability::DefinitelyNotNull, app)
                .less_than_or_equal(upper.with_nullability(Nullability::Maybe), app));
            feedback.mark_field_has_dynamic_lower_bound_type(field, lower);
        }
    }

    fn compute_abstract_value(&self, field: FieldId, root: ValueId) -> AbstractValue {
        if self.holder_is_enum() {
            if let Some(values) = self.compute_enum_values_array(field, root) {
                return AbstractValue::Single(values);
            }
            if let Some(constant) = self.compute_single_enum_field_value(root) {
                return AbstractValue::Single(constant);
            }
        }
        compute_abstract_value(self.code, self.app, root)
    }

    /// `$VALUES = new E[] { A, B, ... }`: every slot holds a known enum
    /// constant.
    fn compute_enum_values_array(&self, field: FieldId, array: ValueId) -> Option<SingleValue> {
        let (app, code) = (self.app, self.code);
        let def = app.field(field);
        if def.name != ENUM_VALUES_FIELD || app.array_element_type(def.ty) != Some(self.holder) {
            return None;
        }
        let Opcode::NewArrayEmpty { size, .. } = code.definition_opcode(array)? else {
            return None;
        };
        let length = usize::try_from(code.const_number(*size)?).ok()?;

        let mut slots: Vec<Option<SingleValue>> = vec![None; length];
        for &user in code.users(array) {
            match code.opcode(user) {
                Opcode::ArrayPut {
                    array: target,
                    index,
                    value,
                } if *target == array && *value != array => {
                    let index = usize::try_from(code.const_number(*index)?).ok()?;
                    let slot = slots.get_mut(index)?;
                    if slot.is_some() {
                        return None;
                    }
                    *slot = Some(self.enum_constant(*value)?);
                }
                Opcode::StaticPut { field: target, .. } if *target == field => {}
                _ => return None,
            }
        }
        let values = slots.into_iter().collect::<Option<Vec<_>>>()?;
        tracing::trace!(?field, constants = values.len(), "enum values array");
        Some(SingleValue::Field {
            field,
            state: ObjectState::EnumValues(values),
        })
    }

    /// The enum constant `value` refers to: either the freshly built
    /// instance, or a read of the constant's field.
    fn enum_constant(&self, value: ValueId) -> Option<SingleValue> {
        let code = self.code;
        let root = code.aliased_value(value);
        match code.definition_opcode(root)? {
            Opcode::NewInstance { .. } => self.compute_single_enum_field_value(root),
            Opcode::StaticGet { field } if self.app.field(*field).flags.contains(FieldFlags::ENUM) => {
                let field = *field;
                code.instructions().find_map(|instr| match *code.opcode(instr) {
                    Opcode::StaticPut { field: f, value } if f == field => {
                        self.compute_single_enum_field_value(code.aliased_value(value))
                    }
                    _ => None,
                })
            }
            _ => None,
        }
    }

    /// Recognize the enum constant idiom:
    ///
    /// ```text
    /// v = new-instance E        (or a direct subclass of E)
    /// invoke-direct E.<init>(v, ...)
    /// $VALUES_array[i] = v      (optional)
    /// E.CONSTANT = v
    /// ```
    fn compute_single_enum_field_value(&self, value: ValueId) -> Option<SingleValue> {
        let (app, code) = (self.app, self.code);
        let Opcode::NewInstance { class } = *code.definition_opcode(value)? else {
            return None;
        };
        if class != self.holder
            && app.class(class).and_then(|c| c.super_type) != Some(self.holder)
        {
            return None;
        }
        if !code.phi_users(value).is_empty() {
            return None;
        }

        let mut enum_field = None;
        for &user in code.users(value) {
            match code.opcode(user) {
                Opcode::ArrayPut {
                    array,
                    index,
                    value: stored,
                } => {
                    if *stored != value || *array == value || *index == value {
                        return None;
                    }
                    if !matches!(
                        code.definition_opcode(code.aliased_value(*array)),
                        Some(Opcode::NewArrayEmpty { .. })
                    ) {
                        return None;
                    }
                }
                Opcode::Invoke {
                    kind: InvokeKind::Direct,
                    method,
                    args,
                } => {
                    if !app.method(*method).is_instance_initializer()
                        || args.first() != Some(&value)
                        || args.iter().skip(1).any(|&a| a == value)
                    {
                        return None;
                    }
                }
                Opcode::StaticPut { field, .. } => {
                    let def = app.field(*field);
                    if def.holder == self.holder && def.flags.contains(FieldFlags::ENUM) {
                        if enum_field.is_some() {
                            return None;
                        }
                        enum_field = Some(*field);
                    }
                }
                _ => return None,
            }
        }
        let field = enum_field?;
        Some(SingleValue::Field {
            field,
            state: self.compute_object_state(value),
        })
    }

    /// The instance fields of a freshly constructed object, as far as its
    /// constructor describes them.
    fn compute_object_state(&self, value: ValueId) -> ObjectState {
        let (app, code) = (self.app, self.code);
        if !matches!(code.definition_opcode(value), Some(Opcode::NewInstance { .. })) {
            return ObjectState::Empty;
        }

        let mut constructor_calls = code.users(value).iter().filter_map(|&user| match code.opcode(user) {
            Opcode::Invoke {
                kind: InvokeKind::Direct,
                method,
                args,
            } if args.first().map(|&r| code.aliased_value(r)) == Some(value)
                && app.method(*method).is_instance_initializer() =>
            {
                Some((*method, args))
            }
            _ => None,
        });
        let (Some((constructor, args)), None) = (constructor_calls.next(), constructor_calls.next())
        else {
            return ObjectState::Empty;
        };
        let Some(info) = &app.method(constructor).optimization_info.instance_initializer_info else {
            return ObjectState::Empty;
        };

        let mut fields = BTreeMap::new();
        for (field, init) in info.field_infos.iter() {
            if !app.is_instance_field_written_only_in_instance_initializers(field) {
                continue;
            }
            let field_value = match init {
                InstanceFieldInitializationInfo::Argument(index) => args
                    .get(*index)
                    .map(|&arg| compute_abstract_value(code, app, arg))
                    .unwrap_or_default(),
                InstanceFieldInitializationInfo::Value(single) => AbstractValue::Single(single.clone()),
                InstanceFieldInitializationInfo::Unknown
                | InstanceFieldInitializationInfo::Type { .. } => AbstractValue::Unknown,
            };
            if !field_value.is_unknown() {
                fields.insert(field, field_value);
            }
        }
        ObjectState::from_fields(fields)
    }
}
