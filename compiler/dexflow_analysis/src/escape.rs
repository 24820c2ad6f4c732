//! Escape analysis.
//!
//! Computes the instructions through which a value leaves the method:
//! returned, thrown, stored into static state, passed to a call, or stored
//! into an array the caller can see. Values the tracked value flows into
//! (aliases, phis, arrays and objects it is stored in, elements read back
//! out of them) are tracked as well.
//!
//! A freshly allocated object always escapes through its constructor call.

use dexflow_ir::{AppView, InstrId, IrCode, Opcode, ValueId};
use rustc_hash::FxHashSet;

/// Lets callers declare some escape routes harmless.
pub trait EscapeAnalysisConfiguration {
    /// Should `instr`, through which `value` escapes, be ignored?
    fn is_legitimate_escape_route(
        &self,
        code: &IrCode,
        app: &AppView,
        value: ValueId,
        instr: InstrId,
    ) -> bool;
}

/// Every escape route counts.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultEscapeAnalysisConfiguration;

impl EscapeAnalysisConfiguration for DefaultEscapeAnalysisConfiguration {
    fn is_legitimate_escape_route(
        &self,
        _code: &IrCode,
        _app: &AppView,
        _value: ValueId,
        _instr: InstrId,
    ) -> bool {
        false
    }
}

pub struct EscapeAnalysis<'a, C = DefaultEscapeAnalysisConfiguration> {
    app: &'a AppView,
    configuration: C,
}

impl<'a> EscapeAnalysis<'a> {
    pub fn new(app: &'a AppView) -> Self {
        Self::with_configuration(app, DefaultEscapeAnalysisConfiguration)
    }
}

impl<'a, C: EscapeAnalysisConfiguration> EscapeAnalysis<'a, C> {
    pub fn with_configuration(app: &'a AppView, configuration: C) -> Self {
        EscapeAnalysis { app, configuration }
    }

    /// Does `value` escape anywhere?
    pub fn is_escaping(&self, code: &IrCode, value: ValueId) -> bool {
        !self.escape(code, value).is_empty()
    }

    /// The instructions through which `value_of_interest` escapes.
    pub fn escape(&self, code: &IrCode, value_of_interest: ValueId) -> FxHashSet<InstrId> {
        let arguments = code.arguments();
        let mut escaping = FxHashSet::default();
        let mut seen = FxHashSet::default();
        let mut worklist = vec![value_of_interest];
        seen.insert(value_of_interest);

        while let Some(value) = worklist.pop() {
            let mut enqueue = |next: ValueId, worklist: &mut Vec<ValueId>| {
                if seen.insert(next) {
                    worklist.push(next);
                }
            };
            for &phi in code.phi_users(value) {
                enqueue(phi, &mut worklist);
            }

            let definition = code.value(value).definition_instr();
            for &user in code.users(value) {
                // A user earlier in the defining block reads an older
                // incarnation of the value (a loop-carried use).
                if let Some(def) = definition {
                    if code.instr(def).block == code.instr(user).block
                        && code.precedes_in_block(user, def)
                    {
                        continue;
                    }
                }

                if is_directly_escaping(code, user, &arguments) {
                    if !self
                        .configuration
                        .is_legitimate_escape_route(code, self.app, value, user)
                    {
                        escaping.insert(user);
                    }
                    continue;
                }

                let instr = code.instr(user);
                if instr.opcode.could_introduce_an_alias() {
                    if let Some(out) = instr.out {
                        enqueue(out, &mut worklist);
                    }
                    continue;
                }

                if let Some(propagated) = propagated_subject(code, user) {
                    if propagated != value {
                        enqueue(propagated, &mut worklist);
                    }
                }
            }
        }

        tracing::debug!(
            method = ?code.context(),
            value = ?value_of_interest,
            tracked = seen.len(),
            escaping = escaping.len(),
            "escape analysis"
        );
        escaping
    }
}

fn is_directly_escaping(code: &IrCode, instr: InstrId, arguments: &[ValueId]) -> bool {
    match code.opcode(instr) {
        Opcode::Return { .. } | Opcode::Throw { .. } | Opcode::StaticPut { .. } => true,
        // Recursing with the very same arguments adds no escape route.
        Opcode::Invoke { method, args, .. } => {
            *method != code.context() || args.as_slice() != arguments
        }
        Opcode::ArrayPut { array, .. } => code.argument_index(code.aliased_value(*array)).is_some(),
        _ => false,
    }
}

/// The value a tracked operand of `instr` flows into, if any.
fn propagated_subject(code: &IrCode, instr: InstrId) -> Option<ValueId> {
    match code.opcode(instr) {
        Opcode::ArrayGet { .. } => code.instr(instr).out,
        Opcode::ArrayPut { array, .. } => Some(*array),
        Opcode::InstancePut { object, .. } => Some(*object),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
