//! Dataflow analyses over [`dexflow_ir`] method bodies.
//!
//! Each analysis answers one kind of question about a single method's IR
//! and degrades to the conservative answer (`false`, `Never`, `Unknown`)
//! whenever it cannot prove a fact:
//!
//! - [`ClassInitializationAnalysis`]: is a class guaranteed initialized
//!   before an instruction?
//! - [`EscapeAnalysis`]: where can a value leave the method?
//! - [`ValueMayDependOnEnvironmentAnalysis`]: are these values computed
//!   from constants alone and never mutated afterwards?
//! - [`StaticFieldValueAnalysis`] / [`InstanceFieldValueAnalysis`]: what
//!   does each field hold once an initializer returns?
//! - [`SimpleInliningConstraintAnalysis`]: for which call-site arguments
//!   does a callee become trivial after inlining?
//! - [`TypeChecker`]: is optimized code still type-safe enough to keep?
//!
//! The analyses never mutate the IR. Facts about fields and methods are
//! reported through an [`OptimizationFeedback`] sink owned by the caller.

mod abstract_value;
pub mod class_init;
pub mod environment;
pub mod escape;
pub mod feedback;
pub mod field_value;
pub mod inlining;
mod options;
mod stack;
pub mod type_checker;

#[cfg(test)]
mod test_helpers;

use std::sync::Once;

pub use class_init::{AnalysisAssumption, ClassInitializationAnalysis, Query};
pub use environment::ValueMayDependOnEnvironmentAnalysis;
pub use escape::{DefaultEscapeAnalysisConfiguration, EscapeAnalysis, EscapeAnalysisConfiguration};
pub use feedback::{OptimizationFeedback, OptimizationFeedbackSimple};
pub use field_value::{
    AbstractFieldSet, ClassInitializerDefaults, InstanceFieldValueAnalysis,
    StaticFieldValueAnalysis,
};
pub use inlining::{
    ArgumentChanges, ArgumentConstraintKind, SimpleInliningArgumentConstraint,
    SimpleInliningConstraint, SimpleInliningConstraintAnalysis,
    SimpleInliningConstraintWithDepth,
};
pub use options::AnalysisOptions;
pub use type_checker::{TypeChecker, VerifyTypesHelper};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=dexflow_analysis=debug` or `RUST_LOG=dexflow_analysis=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
