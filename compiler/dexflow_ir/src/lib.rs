//! Program model and SSA IR for the dexflow analyses.
//!
//! This crate provides everything the analysis core consumes but does not
//! compute itself:
//!
//! - **Program model** ([`AppView`], [`ClassDef`], [`FieldDef`], [`MethodDef`]):
//!   whole-program knowledge: the class hierarchy, liveness facts such as
//!   "this field is only written in that method", pinning, resolved call
//!   targets, and the optimization info recorded by earlier passes.
//!
//! - **Type lattice** ([`TypeElement`], [`Nullability`]): static types of IR
//!   values with nullability, shared by the type checker and the dynamic-type
//!   facts of the field-value analysis.
//!
//! - **IR** ([`IrCode`], [`BasicBlock`], [`Instruction`], [`Opcode`], [`Value`]):
//!   one method body in SSA form. Blocks, instructions and values live in
//!   arenas and are referred to by [`BlockId`], [`InstrId`] and [`ValueId`],
//!   so two structurally equal instructions are never confused.
//!
//! - **CFG utilities** ([`DominatorTree`], [`PredecessorMarks`]) and
//!   instruction effect predicates ([`effects`]).
//!
//! # Design
//!
//! The IR is read-only for the analyses. The surrounding optimization
//! driver owns its lifecycle; the few mutation entry points on [`IrCode`]
//! bump a modification counter that caches (dominator trees, block marks)
//! use to detect staleness in debug builds.

/// Defines a `u32` index newtype with `new`/`raw`/`index` accessors.
macro_rules! index_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Create an ID from a raw index.
            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw `u32` value.
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Get the index as `usize` (for indexing into `Vec`s).
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub(crate) fn from_usize(index: usize) -> Self {
                Self(u32::try_from(index).unwrap_or_else(|_| {
                    panic!(concat!(stringify!($name), " count exceeds u32::MAX"))
                }))
            }
        }
    };
}

pub mod app;
pub mod builder;
pub mod code;
pub mod effects;
pub mod graph;
pub mod optimization;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use app::{
    AppView, ClassDef, ClassFlags, FieldDef, FieldFlags, FieldId, MethodDef, MethodFlags,
    MethodId, TypeId, TypeKind, WellKnown,
};
pub use builder::{IrCodeBuilder, IrError};
pub use code::{
    BasicBlock, BinopKind, BlockId, CatchGuard, CatchHandler, IfKind, InstrId, Instruction,
    InvokeKind, IrCode, Opcode, Value, ValueDefinition, ValueId,
};
pub use effects::ThrownExceptions;
pub use graph::{DominatorTree, Inclusive, PredecessorMarks};
pub use optimization::{
    AbstractValue, FieldOptimizationInfo, InstanceFieldInitializationInfo,
    InstanceFieldInitializationInfoCollection, InstanceInitializerInfo, MethodOptimizationInfo,
    ObjectState, SingleValue,
};
pub use types::{Nullability, PrimitiveType, ReferenceKind, TypeElement};
