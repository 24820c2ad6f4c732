//! Instance field values after a constructor.

use std::collections::BTreeMap;

use dexflow_ir::{
    AppView, FieldId, InstanceFieldInitializationInfo, InstanceFieldInitializationInfoCollection,
    InstrId, InvokeKind, IrCode, MethodId, Nullability, Opcode, TypeElement, TypeId, ValueId,
};

use super::{FieldWriteScan, PutVisibility};
use crate::abstract_value::{compute_abstract_value, dynamic_lower_bound_type, dynamic_upper_bound_type};
use crate::feedback::OptimizationFeedback;

/// One write of a field of the receiver.
enum FieldWrite {
    Put { instr: InstrId, value: ValueId },
    /// Written by the constructor this one forwards to via `this(...)`.
    Forwarded(InstanceFieldInitializationInfo),
}

pub struct InstanceFieldValueAnalysis<'a> {
    app: &'a AppView,
    code: &'a IrCode,
    #[allow(dead_code)]
    context: MethodId,
    holder: TypeId,
    scan: FieldWriteScan<'a>,
    infos: InstanceFieldInitializationInfoCollection,
}

impl<'a> InstanceFieldValueAnalysis<'a> {
    /// Describe what the constructor `code` stores into the fields of its
    /// receiver. The result is also recorded in `feedback`.
    pub fn run(
        app: &'a AppView,
        code: &'a IrCode,
        feedback: &mut dyn OptimizationFeedback,
    ) -> InstanceFieldInitializationInfoCollection {
        let context = code.context();
        let method = app.method(context);
        if !method.is_instance_initializer() || code.is_static() {
            tracing::debug!(?context, "not an instance initializer");
            return InstanceFieldInitializationInfoCollection::new();
        }
        let mut analysis = InstanceFieldValueAnalysis {
            app,
            code,
            context,
            holder: method.holder,
            scan: FieldWriteScan::new(app, code),
            infos: InstanceFieldInitializationInfoCollection::new(),
        };
        analysis.compute_field_optimization_info();
        tracing::debug!(method = ?context, recorded = analysis.infos.len(), "instance field values");
        feedback.record_instance_field_initialization_infos(context, analysis.infos.clone());
        analysis.infos
    }

    fn is_subject_to_optimization(&self, field: FieldId) -> bool {
        let def = self.app.field(field);
        !def.is_static() && def.holder == self.holder
    }

    fn collect_writes(&self) -> BTreeMap<FieldId, Vec<FieldWrite>> {
        let code = self.code;
        let mut writes: BTreeMap<FieldId, Vec<FieldWrite>> = BTreeMap::new();
        for instr in code.instructions() {
            match code.opcode(instr) {
                Opcode::InstancePut {
                    field,
                    object,
                    value,
                } if code.is_this(*object) && self.is_subject_to_optimization(*field) => {
                    writes.entry(*field).or_default().push(FieldWrite::Put {
                        instr,
                        value: *value,
                    });
                }
                Opcode::Invoke {
                    kind: InvokeKind::Direct,
                    method,
                    args,
                } if self.app.method(*method).is_instance_initializer() => {
                    self.analyze_forwarding_constructor_call(*method, args, &mut writes);
                }
                _ => {}
            }
        }
        writes
    }

    /// `this(...)`: the fields the other constructor initializes count as
    /// written here, with arguments translated to this constructor's.
    fn analyze_forwarding_constructor_call(
        &self,
        target: MethodId,
        args: &[ValueId],
        writes: &mut BTreeMap<FieldId, Vec<FieldWrite>>,
    ) {
        let (app, code) = (self.app, self.code);
        if !args.first().is_some_and(|&receiver| code.is_this(receiver))
            || app.method(target).holder != self.holder
        {
            return;
        }
        let Some(info) = &app.method(target).optimization_info.instance_initializer_info else {
            return;
        };
        for (field, init) in info.field_infos.iter() {
            if !self.is_subject_to_optimization(field) {
                continue;
            }
            let translated = match init {
                InstanceFieldInitializationInfo::Argument(index) => match args.get(*index) {
                    Some(&arg) => self.value_initialization_info(arg),
                    None => InstanceFieldInitializationInfo::Unknown,
                },
                other => other.clone(),
            };
            writes
                .entry(field)
                .or_default()
                .push(FieldWrite::Forwarded(translated));
        }
    }

    /// An argument of this constructor or a single known value.
    fn value_initialization_info(&self, value: ValueId) -> InstanceFieldInitializationInfo {
        let code = self.code;
        if let Some(index) = code.argument_index(value) {
            if !code.is_this(value) {
                return InstanceFieldInitializationInfo::Argument(index);
            }
        }
        match compute_abstract_value(code, self.app, value).as_single() {
            Some(single) => InstanceFieldInitializationInfo::Value(single.clone()),
            None => InstanceFieldInitializationInfo::Unknown,
        }
    }

    fn compute_field_optimization_info(&mut self) {
        let writes = self.collect_writes();
        for (field, writes) in writes {
            let [write] = writes.as_slice() else {
                continue;
            };
            match write {
                FieldWrite::Forwarded(info) => self.infos.set(field, info.clone()),
                FieldWrite::Put { instr, value } => {
                    // Earlier reads see the implicit zero default.
                    let prior_same = self.code.is_zero(*value);
                    if self.scan.classify_put(field, *instr, prior_same) == PutVisibility::Exact {
                        self.update_field_optimization_info(field, *value);
                    }
                }
            }
        }
    }

    fn update_field_optimization_info(&mut self, field: FieldId, value: ValueId) {
        let app = self.app;
        let def = app.field(field);
        if !def.is_final() && !app.is_instance_field_written_only_in_instance_initializers(field) {
            return;
        }

        let info = self.value_initialization_info(value);
        if !info.is_unknown() {
            self.infos.set(field, info);
            return;
        }

        if !app.is_reference_type(def.ty) {
            return;
        }
        let root = self.code.aliased_value(value);
        let lower = dynamic_lower_bound_type(self.code, root);
        let upper = dynamic_upper_bound_type(self.code, root);
        let field_type = TypeElement::from_type(def.ty, Nullability::Maybe, app);
        if lower.is_some() || upper.strictly_less_than(field_type, app) {
            self.infos
                .set(field, InstanceFieldInitializationInfo::Type { lower, upper });
        }
    }
}
