//! Optimization info: facts earlier passes recorded about fields and methods.
//!
//! The analyses read these facts from [`AppView`](crate::AppView)
//! definitions and produce new ones through an explicit feedback sink; they
//! never write them back themselves.

use std::collections::BTreeMap;

use crate::app::{FieldId, MethodId, TypeId};
use crate::types::TypeElement;

// ── Abstract values ─────────────────────────────────────────────────

/// A single compile-time-known runtime value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SingleValue {
    /// An integral or boolean constant. `null` is `Number(0)` on reference
    /// typed fields.
    Number(i64),
    String(String),
    ConstClass(TypeId),
    /// The object stored in a static final field, with what is known
    /// about the object's own fields.
    Field { field: FieldId, state: ObjectState },
}

impl SingleValue {
    #[inline]
    pub fn is_zero(&self) -> bool {
        matches!(self, SingleValue::Number(0))
    }
}

/// Compile-time approximation of the value a field (or value) holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AbstractValue {
    #[default]
    Unknown,
    Single(SingleValue),
    /// One of two values, e.g. the default before a write and the written
    /// value after it.
    OneOf(SingleValue, SingleValue),
}

impl AbstractValue {
    /// `Single` if both values coincide.
    pub fn one_of(first: SingleValue, second: SingleValue) -> AbstractValue {
        if first == second {
            AbstractValue::Single(first)
        } else {
            AbstractValue::OneOf(first, second)
        }
    }

    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self, AbstractValue::Unknown)
    }

    pub fn as_single(&self) -> Option<&SingleValue> {
        match self {
            AbstractValue::Single(v) => Some(v),
            _ => None,
        }
    }

    /// A single constant (not a field reference).
    pub fn is_single_constant(&self) -> bool {
        matches!(
            self,
            AbstractValue::Single(
                SingleValue::Number(_) | SingleValue::String(_) | SingleValue::ConstClass(_)
            )
        )
    }
}

/// What is known about the fields of an object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectState {
    #[default]
    Empty,
    Fields(BTreeMap<FieldId, AbstractValue>),
    /// The contents of an enum's `$VALUES` array, in ordinal order.
    EnumValues(Vec<SingleValue>),
}

impl ObjectState {
    pub fn from_fields(fields: BTreeMap<FieldId, AbstractValue>) -> ObjectState {
        if fields.is_empty() {
            ObjectState::Empty
        } else {
            ObjectState::Fields(fields)
        }
    }

    pub fn field_value(&self, field: FieldId) -> AbstractValue {
        match self {
            ObjectState::Fields(map) => map.get(&field).cloned().unwrap_or_default(),
            ObjectState::Empty | ObjectState::EnumValues(_) => AbstractValue::Unknown,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, ObjectState::Empty)
    }
}

// ── Instance initializers ───────────────────────────────────────────

/// What an instance initializer stores into one field of the receiver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstanceFieldInitializationInfo {
    #[default]
    Unknown,
    /// The constructor argument at this IR argument index (0 is `this`).
    Argument(usize),
    Value(SingleValue),
    /// Only the dynamic type is known.
    Type {
        lower: Option<TypeId>,
        upper: TypeElement,
    },
}

impl InstanceFieldInitializationInfo {
    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self, InstanceFieldInitializationInfo::Unknown)
    }
}

/// Per-field initialization infos of one instance initializer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstanceFieldInitializationInfoCollection {
    infos: BTreeMap<FieldId, InstanceFieldInitializationInfo>,
}

impl InstanceFieldInitializationInfoCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `info` for `field`; unknown infos are not stored.
    pub fn set(&mut self, field: FieldId, info: InstanceFieldInitializationInfo) {
        if info.is_unknown() {
            self.infos.remove(&field);
        } else {
            self.infos.insert(field, info);
        }
    }

    pub fn get(&self, field: FieldId) -> &InstanceFieldInitializationInfo {
        static UNKNOWN: InstanceFieldInitializationInfo = InstanceFieldInitializationInfo::Unknown;
        self.infos.get(&field).unwrap_or(&UNKNOWN)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &InstanceFieldInitializationInfo)> {
        self.infos.iter().map(|(&f, i)| (f, i))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }
}

/// Summary of an instance initializer's behavior.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstanceInitializerInfo {
    pub field_infos: InstanceFieldInitializationInfoCollection,
    /// Anything beyond the field writes described by `field_infos`.
    pub may_have_other_side_effects: bool,
    pub receiver_may_escape: bool,
}

impl Default for InstanceInitializerInfo {
    fn default() -> Self {
        InstanceInitializerInfo {
            field_infos: InstanceFieldInitializationInfoCollection::new(),
            may_have_other_side_effects: true,
            receiver_may_escape: true,
        }
    }
}

impl InstanceInitializerInfo {
    /// Only writes fields of the receiver and lets nothing else observe it.
    pub fn is_trivial(&self) -> bool {
        !self.may_have_other_side_effects && !self.receiver_may_escape
    }
}

// ── Field and method info ───────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldOptimizationInfo {
    pub abstract_value: AbstractValue,
    pub dynamic_upper_bound: Option<TypeElement>,
    pub dynamic_lower_bound: Option<TypeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodOptimizationInfo {
    /// Classes guaranteed initialized whenever the method returns normally.
    pub initialized_classes_on_normal_exit: Vec<TypeId>,
    /// IR argument indices the method dereferences (or null-checks and
    /// throws on) before any other effect.
    pub non_null_param_or_throw: Vec<usize>,
    pub may_have_side_effects: bool,
    /// Fields the method may read; `None` when unknown.
    pub field_read_set: Option<Vec<FieldId>>,
    pub instance_initializer_info: Option<InstanceInitializerInfo>,
    /// Set for methods whose whole body is known to forward to another
    /// constructor of the same class.
    pub forwards_to: Option<MethodId>,
}

impl Default for MethodOptimizationInfo {
    fn default() -> Self {
        MethodOptimizationInfo {
            initialized_classes_on_normal_exit: Vec::new(),
            non_null_param_or_throw: Vec::new(),
            may_have_side_effects: true,
            field_read_set: None,
            instance_initializer_info: None,
            forwards_to: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn one_of_collapses_equal_values() {
        assert_eq!(
            AbstractValue::one_of(SingleValue::Number(0), SingleValue::Number(0)),
            AbstractValue::Single(SingleValue::Number(0))
        );
        assert_eq!(
            AbstractValue::one_of(SingleValue::Number(0), SingleValue::Number(1)),
            AbstractValue::OneOf(SingleValue::Number(0), SingleValue::Number(1))
        );
    }

    #[test]
    fn collection_drops_unknown_infos() {
        let mut infos = InstanceFieldInitializationInfoCollection::new();
        infos.set(FieldId::new(3), InstanceFieldInitializationInfo::Argument(1));
        infos.set(FieldId::new(4), InstanceFieldInitializationInfo::Unknown);
        assert_eq!(infos.len(), 1);
        assert_eq!(
            infos.get(FieldId::new(3)),
            &InstanceFieldInitializationInfo::Argument(1)
        );
        assert!(infos.get(FieldId::new(4)).is_unknown());

        infos.set(FieldId::new(3), InstanceFieldInitializationInfo::Unknown);
        assert!(infos.is_empty());
    }

    #[test]
    fn object_state_defaults_to_unknown_fields() {
        let state = ObjectState::from_fields(BTreeMap::from([(
            FieldId::new(1),
            AbstractValue::Single(SingleValue::Number(7)),
        )]));
        assert_eq!(
            state.field_value(FieldId::new(1)),
            AbstractValue::Single(SingleValue::Number(7))
        );
        assert!(state.field_value(FieldId::new(2)).is_unknown());
        assert!(ObjectState::from_fields(BTreeMap::new()).is_empty());
    }
}
