//! Sink for facts the analyses derive about fields and methods.
//!
//! Analyses report through [`OptimizationFeedback`] instead of writing into
//! the [`AppView`] they read from; the driver decides when recorded facts
//! become visible to later passes.

use std::collections::BTreeMap;

use dexflow_ir::{
    AbstractValue, AppView, FieldId, FieldOptimizationInfo, InstanceFieldInitializationInfoCollection,
    MethodId, TypeElement, TypeId,
};

pub trait OptimizationFeedback {
    fn record_field_has_abstract_value(&mut self, field: FieldId, value: AbstractValue);

    fn mark_field_has_dynamic_upper_bound_type(&mut self, field: FieldId, ty: TypeElement);

    fn mark_field_has_dynamic_lower_bound_type(&mut self, field: FieldId, ty: TypeId);

    fn record_instance_field_initialization_infos(
        &mut self,
        constructor: MethodId,
        infos: InstanceFieldInitializationInfoCollection,
    );
}

/// Collects feedback in memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptimizationFeedbackSimple {
    pub fields: BTreeMap<FieldId, FieldOptimizationInfo>,
    pub instance_field_initialization_infos:
        BTreeMap<MethodId, InstanceFieldInitializationInfoCollection>,
}

impl OptimizationFeedbackSimple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_info(&self, field: FieldId) -> Option<&FieldOptimizationInfo> {
        self.fields.get(&field)
    }

    /// The recorded abstract value of `field`, `Unknown` if none.
    pub fn abstract_value(&self, field: FieldId) -> AbstractValue {
        self.field_info(field)
            .map(|info| info.abstract_value.clone())
            .unwrap_or_default()
    }

    /// Publish the collected facts into `app`.
    pub fn apply(self, app: &mut AppView) {
        tracing::debug!(
            fields = self.fields.len(),
            constructors = self.instance_field_initialization_infos.len(),
            "applying optimization feedback"
        );
        for (field, info) in self.fields {
            app.field_mut(field).optimization_info = info;
        }
        for (constructor, infos) in self.instance_field_initialization_infos {
            let info = &mut app.method_mut(constructor).optimization_info;
            info.instance_initializer_info
                .get_or_insert_with(Default::default)
                .field_infos = infos;
        }
    }
}

impl OptimizationFeedback for OptimizationFeedbackSimple {
    fn record_field_has_abstract_value(&mut self, field: FieldId, value: AbstractValue) {
        self.fields.entry(field).or_default().abstract_value = value;
    }

    fn mark_field_has_dynamic_upper_bound_type(&mut self, field: FieldId, ty: TypeElement) {
        self.fields.entry(field).or_default().dynamic_upper_bound = Some(ty);
    }

    fn mark_field_has_dynamic_lower_bound_type(&mut self, field: FieldId, ty: TypeId) {
        self.fields.entry(field).or_default().dynamic_lower_bound = Some(ty);
    }

    fn record_instance_field_initialization_infos(
        &mut self,
        constructor: MethodId,
        infos: InstanceFieldInitializationInfoCollection,
    ) {
        self.instance_field_initialization_infos
            .insert(constructor, infos);
    }
}
