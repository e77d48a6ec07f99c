use std::collections::HashMap;
use std::sync::Arc;

use crate::control::{ControlDef, ControlStore};
use crate::core::ArcStr;
use crate::dataset::Dataset;
use crate::engine::graph::DependencyGraph;
use crate::engine::node::{DerivationNode, FnDerive};
use crate::engine::{Engine, Inputs, NodeRef};
use crate::error::{DeriveError, EngineError};
use crate::output::{Adapter, OutputBinding, Typed};

/// The blueprint for a dashboard.
///
/// `Blueprint` is used to declare the controls, the derivations and the
/// output slots of a dashboard. Derivations are wired together by name, and
/// each registration hands back a typed [`NodeRef`] which can later be bound
/// to a slot or read from the finished [`Engine`].
///
/// Inputs may name things that are registered later; they only have to
/// exist by the time [`finish`](Self::finish) is called.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tdash::{Blueprint, ControlDef, Dataset, Text};
///
/// let dataset = Arc::new(Dataset::penguins_sample().unwrap());
/// let mut blueprint = Blueprint::new(dataset);
///
/// blueprint.control(&ControlDef::range("mass", 2000.0, 6000.0, 6000.0)).unwrap();
///
/// let limit = blueprint
///     .node("limit")
///     .depends_on(["mass"])
///     .run(|inputs| inputs.number("mass"))
///     .unwrap();
///
/// blueprint.bind("limit", limit, Text(|mass: &f64| format!("{mass} g"))).unwrap();
///
/// let mut engine = blueprint.finish().unwrap();
/// assert_eq!(*engine.value(limit).unwrap().unwrap(), 6000.0);
/// ```
pub struct Blueprint {
    dataset: Arc<Dataset>,
    controls: ControlStore,
    graph: DependencyGraph,
    bindings: Vec<OutputBinding>,
    slots: HashMap<ArcStr, usize>,
}

impl Blueprint {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self {
            dataset,
            controls: ControlStore::new(),
            graph: DependencyGraph::new(),
            bindings: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// Registers a control with its domain and default value.
    pub fn control(&mut self, def: &ControlDef) -> Result<(), EngineError> {
        if self.graph.is_declared(&def.name) {
            return Err(EngineError::DuplicateName(Arc::from(def.name.as_str())));
        }

        let name = self.controls.register(def)?;
        self.graph.add_control(name)?;

        Ok(())
    }

    /// The entry point for a derivation. Starts without inputs.
    pub fn node(&mut self, name: impl AsRef<str>) -> NodeDef<'_> {
        NodeDef {
            blueprint: self,
            name: Arc::from(name.as_ref()),
        }
    }

    /// Associates a derivation with an output slot.
    pub fn bind<T, A>(
        &mut self,
        slot: impl AsRef<str>,
        node: NodeRef<T>,
        adapter: A,
    ) -> Result<(), EngineError>
    where
        T: Send + Sync + 'static,
        A: Adapter<T>,
    {
        let slot: ArcStr = Arc::from(slot.as_ref());

        if self.slots.contains_key(&slot) {
            return Err(EngineError::DuplicateName(slot));
        }

        self.slots.insert(slot.clone(), self.bindings.len());
        self.bindings.push(OutputBinding {
            slot,
            node: node.index(),
            adapter: Box::new(Typed::<T, A>::new(adapter)),
        });

        Ok(())
    }

    /// Checks that every referenced input exists and produces the engine.
    pub fn finish(self) -> Result<Engine, EngineError> {
        if let Some(err) = self.graph.unresolved() {
            return Err(err);
        }

        tracing::debug!(
            controls = self.controls.entries().count(),
            nodes = self.graph.nodes().count(),
            slots = self.bindings.len(),
            "engine ready"
        );

        Ok(Engine {
            dataset: self.dataset,
            controls: self.controls,
            graph: self.graph,
            bindings: self.bindings,
            slots: self.slots,
        })
    }

    fn add_node<F, R>(
        &mut self,
        name: ArcStr,
        inputs: Vec<ArcStr>,
        callback: F,
    ) -> Result<NodeRef<R>, EngineError>
    where
        F: Fn(&Inputs<'_>) -> Result<R, DeriveError> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        let node = DerivationNode::new(name, inputs, Arc::new(FnDerive::new(callback)));
        let index = self.graph.register(node)?;

        Ok(NodeRef::new(index))
    }
}

pub struct NodeDef<'a> {
    blueprint: &'a mut Blueprint,
    name: ArcStr,
}

impl<'a> NodeDef<'a> {
    pub fn depends_on<I, S>(self, inputs: I) -> NodeBinder<'a>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        NodeBinder {
            blueprint: self.blueprint,
            name: self.name,
            inputs: inputs.into_iter().map(|s| Arc::from(s.as_ref())).collect(),
        }
    }

    /// Registers a derivation that reads nothing, i.e. a constant.
    pub fn run<F, R>(self, callback: F) -> Result<NodeRef<R>, EngineError>
    where
        F: Fn(&Inputs<'_>) -> Result<R, DeriveError> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.blueprint.add_node(self.name, Vec::new(), callback)
    }
}

pub struct NodeBinder<'a> {
    blueprint: &'a mut Blueprint,
    name: ArcStr,
    inputs: Vec<ArcStr>,
}

impl NodeBinder<'_> {
    pub fn run<F, R>(self, callback: F) -> Result<NodeRef<R>, EngineError>
    where
        F: Fn(&Inputs<'_>) -> Result<R, DeriveError> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.blueprint.add_node(self.name, self.inputs, callback)
    }
}
