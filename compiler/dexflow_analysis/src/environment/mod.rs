//! Environment-independence analysis.
//!
//! Decides whether a set of values is computed purely from constants: no
//! reads of arguments or of the heap, and no mutation afterwards that other
//! code could observe. A class initializer whose static fields only
//! receive such values can be evaluated at compile time.
//!
//! # Algorithm
//!
//! 1. Build a [`ValueGraph`](value_graph::ValueGraph) from the queried values,
//!    explaining each alias-resolved value by one of a fixed set of rules.
//!    A value no rule explains depends on the environment.
//! 2. Merge strongly connected components and run a descending fixpoint.
//! 3. Check that no array or object marked mutable in step 1 is modified
//!    before the method returns.

mod mutation;
mod value_graph;

use dexflow_ir::effects::may_have_side_effects;
use dexflow_ir::{
    AppView, ClassFlags, FieldFlags, InstrId, InvokeKind, IrCode, Opcode, SingleValue, ValueId,
};
use rustc_hash::FxHashSet;

use crate::abstract_value::compute_abstract_value;
use value_graph::ValueGraph;

pub struct ValueMayDependOnEnvironmentAnalysis<'a> {
    app: &'a AppView,
    code: &'a IrCode,
}

impl<'a> ValueMayDependOnEnvironmentAnalysis<'a> {
    pub fn new(app: &'a AppView, code: &'a IrCode) -> Self {
        ValueMayDependOnEnvironmentAnalysis { app, code }
    }

    pub fn value_may_depend_on_environment(&self, value: ValueId) -> bool {
        self.any_value_may_depend_on_environment(&[value])
    }

    /// `false` only if every value in `values` is proven independent of the
    /// environment and unmutated until the method returns.
    pub fn any_value_may_depend_on_environment(&self, values: &[ValueId]) -> bool {
        tracing::debug!(
            method = ?self.code.context(),
            values = values.len(),
            "checking environment independence"
        );
        let mut builder = GraphBuilder::new(self.app, self.code);
        for &value in values {
            builder.enqueue(value);
        }
        while let Some(value) = builder.worklist.pop() {
            if !builder.add_value(value) {
                tracing::debug!(?value, "value may depend on the environment");
                return true;
            }
        }

        if !builder.graph.is_environment_independent() {
            tracing::debug!(nodes = builder.graph.len(), "unresolved value graph");
            return true;
        }

        for &value in &builder.mutable {
            if mutation::may_be_mutated(self.code, self.app, value, &builder.consumed) {
                tracing::debug!(?value, "value may be mutated before exit");
                return true;
            }
        }
        tracing::debug!(nodes = builder.graph.len(), "values are environment independent");
        false
    }
}

/// State shared by the graph-construction rules.
struct GraphBuilder<'a> {
    app: &'a AppView,
    code: &'a IrCode,
    graph: ValueGraph,
    /// Instructions explained as part of building some value.
    consumed: FxHashSet<InstrId>,
    /// Values whose contents must also be checked for later mutation.
    mutable: Vec<ValueId>,
    worklist: Vec<ValueId>,
    seen: FxHashSet<ValueId>,
}

impl<'a> GraphBuilder<'a> {
    fn new(app: &'a AppView, code: &'a IrCode) -> Self {
        GraphBuilder {
            app,
            code,
            graph: ValueGraph::new(),
            consumed: FxHashSet::default(),
            mutable: Vec::new(),
            worklist: Vec::new(),
            seen: FxHashSet::default(),
        }
    }

    fn enqueue(&mut self, value: ValueId) {
        if self.seen.insert(value) {
            self.worklist.push(value);
        }
    }

    fn depends_on(&mut self, value: ValueId, dependency: ValueId) {
        self.graph.add_edge(value, dependency);
        self.enqueue(dependency);
    }

    fn mark_mutable(&mut self, value: ValueId) {
        if !self.mutable.contains(&value) {
            self.mutable.push(value);
        }
    }

    /// Explain `value`, adding its dependencies. `false` if no rule applies.
    fn add_value(&mut self, value: ValueId) -> bool {
        let root = self.code.aliased_value(value);
        if root != value {
            self.depends_on(value, root);
            return true;
        }
        self.graph.node(value);

        self.is_constant(value)
            || self.add_array(value)
            || self.is_desired_assertion_status(value)
            || self.add_logical_binop(value)
            || self.add_new_instance(value)
    }

    /// Constants, values known to be a single constant, enum instances.
    fn is_constant(&self, value: ValueId) -> bool {
        if self.code.is_constant(value) {
            return true;
        }
        let abstract_value = compute_abstract_value(self.code, self.app, value);
        if abstract_value.is_single_constant() {
            return true;
        }
        matches!(
            abstract_value.as_single(),
            Some(SingleValue::Field { field, .. })
                if self.app.field(*field).flags.contains(FieldFlags::ENUM)
        )
    }

    /// A fixed-size array filled right after its allocation.
    fn add_array(&mut self, array: ValueId) -> bool {
        let code = self.code;
        let Some(definition) = code.value(array).definition_instr() else {
            return false;
        };
        let length = match code.opcode(definition) {
            Opcode::NewArrayEmpty { size, .. } => match code.const_number(*size) {
                Some(length) if length >= 0 => length,
                _ => return false,
            },
            Opcode::NewArrayFilled { elements, .. } => {
                for &element in elements {
                    self.depends_on(array, element);
                }
                i64::try_from(elements.len()).unwrap_or(i64::MAX)
            }
            _ => return false,
        };

        let block = &code.block(code.instr(definition).block).instructions;
        for &instr in &block[code.index_in_block(definition) + 1..] {
            match code.opcode(instr) {
                Opcode::ArrayPut {
                    array: target,
                    index,
                    value,
                } if code.aliased_value(*target) == array => {
                    match code.const_number(*index) {
                        Some(i) if (0..length).contains(&i) => {}
                        _ => return false,
                    }
                    self.depends_on(array, *value);
                    self.consumed.insert(instr);
                }
                Opcode::FillArrayData { array: target, .. }
                    if code.aliased_value(*target) == array =>
                {
                    self.consumed.insert(instr);
                }
                _ if !may_have_side_effects(code, self.app, instr) => {}
                _ => break,
            }
        }
        self.mark_mutable(array);
        true
    }

    /// `SomeProgramClass.class.desiredAssertionStatus()`.
    fn is_desired_assertion_status(&self, value: ValueId) -> bool {
        let Some(Opcode::Invoke {
            kind: InvokeKind::Virtual,
            method,
            args,
        }) = self.code.definition_opcode(value)
        else {
            return false;
        };
        if *method != self.app.well_known().desired_assertion_status {
            return false;
        }
        let Some(&receiver) = args.first() else {
            return false;
        };
        let Some(Opcode::ConstClass { class }) =
            self.code.definition_opcode(self.code.aliased_value(receiver))
        else {
            return false;
        };
        self.app
            .class(*class)
            .is_some_and(|c| !c.flags.contains(ClassFlags::LIBRARY))
            && !self.app.is_pinned_class(*class)
    }

    fn add_logical_binop(&mut self, value: ValueId) -> bool {
        let Some(&Opcode::Binop { kind, left, right }) = self.code.definition_opcode(value) else {
            return false;
        };
        if !kind.is_logical() {
            return false;
        }
        self.depends_on(value, left);
        self.depends_on(value, right);
        true
    }

    /// A program class instance built by a constructor that only assigns
    /// its fields.
    fn add_new_instance(&mut self, value: ValueId) -> bool {
        let code = self.code;
        let app = self.app;
        let Some(definition) = code.value(value).definition_instr() else {
            return false;
        };
        let Opcode::NewInstance { class } = *code.opcode(definition) else {
            return false;
        };
        let Some(class_def) = app.class(class) else {
            return false;
        };
        if class_def.flags.contains(ClassFlags::LIBRARY)
            || app.class_initialization_may_have_side_effects(class, Some(code.context()))
        {
            return false;
        }

        let mut constructor_call = None;
        for &user in code.users(value) {
            if let Opcode::Invoke {
                kind: InvokeKind::Direct,
                method,
                args,
            } = code.opcode(user)
            {
                let is_receiver = args.first().map(|&r| code.aliased_value(r)) == Some(value);
                if is_receiver && app.method(*method).is_instance_initializer() {
                    if constructor_call.is_some() {
                        return false;
                    }
                    constructor_call = Some(user);
                }
            }
        }
        let Some(call) = constructor_call else {
            return false;
        };
        if code.instr(call).block != code.instr(definition).block {
            return false;
        }
        let Opcode::Invoke { method, args, .. } = code.opcode(call) else {
            return false;
        };
        let trivial = app
            .method(*method)
            .optimization_info
            .instance_initializer_info
            .as_ref()
            .is_some_and(|info| info.is_trivial());
        if !trivial {
            return false;
        }

        for &arg in args.iter().skip(1) {
            self.depends_on(value, arg);
        }
        if app
            .instance_fields(class)
            .iter()
            .any(|&f| !app.field(f).is_final())
        {
            self.mark_mutable(value);
        }
        self.consumed.insert(call);
        true
    }
}
