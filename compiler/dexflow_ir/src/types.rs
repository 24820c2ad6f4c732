//! Static types of IR values.
//!
//! [`TypeElement`] pairs a type with a [`Nullability`]. The order is the
//! subtype order combined with nullability: `A! ⊑ A ⊑ Object`, `null ⊑ A`.
//! Class-hierarchy questions are delegated to [`AppView`].

use crate::app::{AppView, TypeId, TypeKind};

/// JVM primitive types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveType {
    pub fn from_descriptor(c: char) -> Option<Self> {
        Some(match c {
            'Z' => PrimitiveType::Boolean,
            'B' => PrimitiveType::Byte,
            'C' => PrimitiveType::Char,
            'S' => PrimitiveType::Short,
            'I' => PrimitiveType::Int,
            'J' => PrimitiveType::Long,
            'F' => PrimitiveType::Float,
            'D' => PrimitiveType::Double,
            _ => return None,
        })
    }

    /// Represented as a 32-bit integer at runtime.
    pub fn is_int_like(self) -> bool {
        matches!(
            self,
            PrimitiveType::Boolean
                | PrimitiveType::Byte
                | PrimitiveType::Char
                | PrimitiveType::Short
                | PrimitiveType::Int
        )
    }
}

/// Nullability of a reference value.
///
/// ```text
///        Maybe
///       /     \
/// DefinitelyNull  DefinitelyNotNull
///       \     /
///        Bottom
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Nullability {
    Bottom,
    DefinitelyNull,
    DefinitelyNotNull,
    Maybe,
}

impl Nullability {
    pub fn less_than_or_equal(self, other: Nullability) -> bool {
        self == other || self == Nullability::Bottom || other == Nullability::Maybe
    }

    pub fn join(self, other: Nullability) -> Nullability {
        match (self, other) {
            (a, b) if a == b => a,
            (Nullability::Bottom, x) | (x, Nullability::Bottom) => x,
            _ => Nullability::Maybe,
        }
    }

    #[inline]
    pub fn is_nullable(self) -> bool {
        matches!(self, Nullability::DefinitelyNull | Nullability::Maybe)
    }
}

/// The reference part of a [`TypeElement`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReferenceKind {
    /// The type of the `null` constant.
    Null,
    Class(TypeId),
    Array(TypeId),
}

/// A point in the type lattice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeElement {
    Bottom,
    Top,
    Primitive(PrimitiveType),
    Reference {
        kind: ReferenceKind,
        nullability: Nullability,
    },
}

impl TypeElement {
    /// The type of a declared `ty`, with `nullability` for reference types.
    pub fn from_type(ty: TypeId, nullability: Nullability, app: &AppView) -> TypeElement {
        match app.type_kind(ty) {
            TypeKind::Primitive(p) => TypeElement::Primitive(p),
            TypeKind::Void => TypeElement::Top,
            TypeKind::Class => TypeElement::Reference {
                kind: ReferenceKind::Class(ty),
                nullability,
            },
            TypeKind::Array => TypeElement::Reference {
                kind: ReferenceKind::Array(ty),
                nullability,
            },
        }
    }

    pub fn null() -> TypeElement {
        TypeElement::Reference {
            kind: ReferenceKind::Null,
            nullability: Nullability::DefinitelyNull,
        }
    }

    pub fn less_than_or_equal(self, other: TypeElement, app: &AppView) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (TypeElement::Bottom, _) | (_, TypeElement::Top) => true,
            (TypeElement::Primitive(a), TypeElement::Primitive(b)) => a == b,
            (
                TypeElement::Reference {
                    kind: a,
                    nullability: na,
                },
                TypeElement::Reference {
                    kind: b,
                    nullability: nb,
                },
            ) => {
                if !na.less_than_or_equal(nb) {
                    return false;
                }
                match (a, b) {
                    (ReferenceKind::Null, _) => true,
                    (_, ReferenceKind::Null) => false,
                    (
                        ReferenceKind::Class(x) | ReferenceKind::Array(x),
                        ReferenceKind::Class(y) | ReferenceKind::Array(y),
                    ) => app.is_subtype(x, y),
                }
            }
            _ => false,
        }
    }

    pub fn strictly_less_than(self, other: TypeElement, app: &AppView) -> bool {
        self != other && self.less_than_or_equal(other, app)
    }

    pub fn nullability(self) -> Nullability {
        match self {
            TypeElement::Reference { nullability, .. } => nullability,
            TypeElement::Bottom => Nullability::Bottom,
            TypeElement::Top | TypeElement::Primitive(_) => Nullability::DefinitelyNotNull,
        }
    }

    pub fn with_nullability(self, nullability: Nullability) -> TypeElement {
        match self {
            TypeElement::Reference { kind, .. } => TypeElement::Reference { kind, nullability },
            other => other,
        }
    }

    #[inline]
    pub fn is_nullable(self) -> bool {
        matches!(self, TypeElement::Reference { nullability, .. } if nullability.is_nullable())
    }

    #[inline]
    pub fn is_definitely_not_null(self) -> bool {
        matches!(
            self,
            TypeElement::Reference {
                nullability: Nullability::DefinitelyNotNull,
                ..
            }
        )
    }

    #[inline]
    pub fn is_reference(self) -> bool {
        matches!(self, TypeElement::Reference { .. })
    }

    #[inline]
    pub fn is_boolean(self) -> bool {
        self == TypeElement::Primitive(PrimitiveType::Boolean)
    }

    #[inline]
    pub fn is_primitive(self) -> bool {
        matches!(self, TypeElement::Primitive(_))
    }

    /// The class or array type, if this is a non-null-literal reference.
    pub fn class_type(self) -> Option<TypeId> {
        match self {
            TypeElement::Reference {
                kind: ReferenceKind::Class(t) | ReferenceKind::Array(t),
                ..
            } => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests;
