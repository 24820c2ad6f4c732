//! The abstract field-set lattice and per-instruction read sets.

use std::collections::BTreeSet;

use dexflow_ir::{AppView, FieldId, InstrId, IrCode, Opcode};

/// A set of fields, or "any field".
///
/// `Bottom ⊑ Concrete(S) ⊑ Top`; `Concrete` sets are never empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AbstractFieldSet {
    #[default]
    Bottom,
    Concrete(BTreeSet<FieldId>),
    Top,
}

impl AbstractFieldSet {
    pub fn singleton(field: FieldId) -> Self {
        AbstractFieldSet::Concrete(BTreeSet::from([field]))
    }

    /// A concrete set, `Bottom` if empty.
    pub fn from_fields(fields: impl IntoIterator<Item = FieldId>) -> Self {
        let fields: BTreeSet<FieldId> = fields.into_iter().collect();
        if fields.is_empty() {
            AbstractFieldSet::Bottom
        } else {
            AbstractFieldSet::Concrete(fields)
        }
    }

    /// A recorded method read set; unknown means `Top`.
    pub fn from_read_set(read_set: Option<&[FieldId]>) -> Self {
        match read_set {
            Some(fields) => Self::from_fields(fields.iter().copied()),
            None => AbstractFieldSet::Top,
        }
    }

    #[inline]
    pub fn is_bottom(&self) -> bool {
        matches!(self, AbstractFieldSet::Bottom)
    }

    #[inline]
    pub fn is_top(&self) -> bool {
        matches!(self, AbstractFieldSet::Top)
    }

    pub fn contains(&self, field: FieldId) -> bool {
        match self {
            AbstractFieldSet::Bottom => false,
            AbstractFieldSet::Concrete(fields) => fields.contains(&field),
            AbstractFieldSet::Top => true,
        }
    }

    #[must_use]
    pub fn join(&self, other: &AbstractFieldSet) -> AbstractFieldSet {
        match (self, other) {
            (AbstractFieldSet::Top, _) | (_, AbstractFieldSet::Top) => AbstractFieldSet::Top,
            (AbstractFieldSet::Bottom, x) | (x, AbstractFieldSet::Bottom) => x.clone(),
            (AbstractFieldSet::Concrete(a), AbstractFieldSet::Concrete(b)) => {
                AbstractFieldSet::Concrete(a.union(b).copied().collect())
            }
        }
    }

    pub fn less_than_or_equal(&self, other: &AbstractFieldSet) -> bool {
        match (self, other) {
            (AbstractFieldSet::Bottom, _) | (_, AbstractFieldSet::Top) => true,
            (AbstractFieldSet::Top, _) | (_, AbstractFieldSet::Bottom) => false,
            (AbstractFieldSet::Concrete(a), AbstractFieldSet::Concrete(b)) => a.is_subset(b),
        }
    }

    /// Number of fields in a concrete set; `None` for `Top`.
    pub fn len(&self) -> Option<usize> {
        match self {
            AbstractFieldSet::Bottom => Some(0),
            AbstractFieldSet::Concrete(fields) => Some(fields.len()),
            AbstractFieldSet::Top => None,
        }
    }
}

/// The fields `instr` may read, including those read by any code it may
/// run (callees, class initializers).
pub fn read_set(code: &IrCode, app: &AppView, instr: InstrId) -> AbstractFieldSet {
    let context = Some(code.context());
    let initialization_may_run_code =
        |class| app.class_initialization_may_have_side_effects(class, context);
    match code.opcode(instr) {
        Opcode::StaticGet { field } => {
            if initialization_may_run_code(app.field(*field).holder) {
                AbstractFieldSet::Top
            } else {
                AbstractFieldSet::singleton(*field)
            }
        }
        Opcode::InstanceGet { field, .. } => AbstractFieldSet::singleton(*field),
        Opcode::StaticPut { field, .. } => {
            if initialization_may_run_code(app.field(*field).holder) {
                AbstractFieldSet::Top
            } else {
                AbstractFieldSet::Bottom
            }
        }
        Opcode::NewInstance { class } | Opcode::InitClass { class } => {
            if initialization_may_run_code(*class) {
                AbstractFieldSet::Top
            } else {
                AbstractFieldSet::Bottom
            }
        }
        Opcode::Invoke { kind, method, .. } => {
            let target = if kind.is_dynamic() {
                match app.single_target(*method) {
                    Some(target) => target,
                    None => return AbstractFieldSet::Top,
                }
            } else {
                *method
            };
            let def = app.method(target);
            if def.is_static() && initialization_may_run_code(def.holder) {
                return AbstractFieldSet::Top;
            }
            AbstractFieldSet::from_read_set(def.optimization_info.field_read_set.as_deref())
        }
        _ => AbstractFieldSet::Bottom,
    }
}
