//! Field-value analysis.
//!
//! Given a class initializer ([`StaticFieldValueAnalysis`]) or an instance
//! initializer ([`InstanceFieldValueAnalysis`]), find the value each field
//! of the holder has when the initializer returns. A field qualifies when
//! it is written exactly once, the write executes on every path to a normal
//! exit, and no earlier read can observe a different value.
//!
//! Results are reported through an [`OptimizationFeedback`] sink.
//!
//! [`OptimizationFeedback`]: crate::OptimizationFeedback

mod field_set;
mod instance;
mod static_fields;

use std::collections::BTreeMap;

use dexflow_ir::{AppView, DominatorTree, FieldId, InstrId, IrCode, SingleValue};

pub use field_set::{read_set, AbstractFieldSet};
pub use instance::InstanceFieldValueAnalysis;
pub use static_fields::StaticFieldValueAnalysis;

/// Constant static values assigned through the class file's default-value
/// mechanism rather than by an explicit put in the class initializer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassInitializerDefaults {
    values: BTreeMap<FieldId, SingleValue>,
}

impl ClassInitializerDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, field: FieldId, value: SingleValue) -> Self {
        self.values.insert(field, value);
        self
    }

    pub fn has_static_value(&self, field: FieldId) -> bool {
        self.values.contains_key(&field)
    }

    pub fn static_value(&self, field: FieldId) -> Option<&SingleValue> {
        self.values.get(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &SingleValue)> {
        self.values.iter().map(|(&f, v)| (f, v))
    }
}

/// How a field's single write relates to the rest of the method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PutVisibility {
    /// Every normal exit sees the written value, and any earlier read sees
    /// the same value.
    Exact,
    /// Every normal exit sees the written value, but an earlier read may
    /// observe the value the field held before.
    AfterPriorRead,
    /// Some path reaches a normal exit without executing the write.
    Partial,
}

/// Control-flow facts shared by both variants, computed on first use.
struct FieldWriteScan<'a> {
    app: &'a AppView,
    code: &'a IrCode,
    is_straight_line: bool,
    dominator_tree: Option<DominatorTree>,
    fields_read_before_block: Option<Vec<AbstractFieldSet>>,
}

impl<'a> FieldWriteScan<'a> {
    fn new(app: &'a AppView, code: &'a IrCode) -> Self {
        FieldWriteScan {
            app,
            code,
            is_straight_line: code.is_straight_line(),
            dominator_tree: None,
            fields_read_before_block: None,
        }
    }

    /// Classify the only write `put` to `field`.
    ///
    /// `prior_reads_see_same_value` is set when a read before the write
    /// would observe the value being written.
    fn classify_put(
        &mut self,
        field: FieldId,
        put: InstrId,
        prior_reads_see_same_value: bool,
    ) -> PutVisibility {
        if !self.is_straight_line && !self.put_dominates_normal_exits(put) {
            return PutVisibility::Partial;
        }
        if !prior_reads_see_same_value && self.field_maybe_read_before_instruction(field, put) {
            return PutVisibility::AfterPriorRead;
        }
        PutVisibility::Exact
    }

    fn put_dominates_normal_exits(&mut self, put: InstrId) -> bool {
        let code = self.code;
        let block = code.instr(put).block;
        let exits = code.normal_exit_blocks();
        self.dominator_tree
            .get_or_insert_with(|| DominatorTree::build(code))
            .dominates_all_of(block, &exits)
    }

    fn field_maybe_read_before_instruction(&mut self, field: FieldId, instr: InstrId) -> bool {
        let (app, code) = (self.app, self.code);
        let block = code.instr(instr).block;
        let read_before = self
            .fields_read_before_block
            .get_or_insert_with(|| fields_read_before_block_inclusive(code, app));
        if code
            .predecessors(block)
            .iter()
            .any(|pred| read_before[pred.index()].contains(field))
        {
            return true;
        }
        code.block(block)
            .instructions
            .iter()
            .take_while(|&&i| i != instr)
            .any(|&i| read_set(code, app, i).contains(field))
    }
}

/// For every block, the fields that may be read on some path from the
/// entry up to and including the block.
fn fields_read_before_block_inclusive(code: &IrCode, app: &AppView) -> Vec<AbstractFieldSet> {
    let mut result = vec![AbstractFieldSet::Bottom; code.num_blocks()];
    let mut visited = vec![false; code.num_blocks()];
    let mut worklist = std::collections::VecDeque::from([code.entry()]);
    let mut iterations = 0usize;

    while let Some(block) = worklist.pop_front() {
        iterations += 1;
        let index = block.index();
        if visited[index] && result[index].is_top() {
            continue;
        }

        let mut state = result[index].clone();
        for &pred in code.predecessors(block) {
            state = state.join(&result[pred.index()]);
            if state.is_top() {
                break;
            }
        }
        // A block's own reads only need to be added once.
        if !visited[index] && !state.is_top() {
            for &instr in &code.block(block).instructions {
                state = state.join(&read_set(code, app, instr));
                if state.is_top() {
                    break;
                }
            }
        }

        if !visited[index] || state != result[index] {
            debug_assert!(result[index].less_than_or_equal(&state));
            visited[index] = true;
            result[index] = state;
            worklist.extend(code.successors(block));
        }
    }
    tracing::trace!(
        method = ?code.context(),
        iterations,
        "fields read before block fixpoint"
    );
    result
}
