mod diagnostics;
pub(crate) mod graph;
mod inputs;
pub(crate) mod node;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use petgraph::graph::NodeIndex;
use tracing::Level;

use crate::control::{ControlStore, ControlValue};
use crate::core::{ArcStr, Derived, DynamicResult};
use crate::dataset::Dataset;
use crate::engine::graph::DependencyGraph;
use crate::error::EngineError;
use crate::output::{Artifact, OutputBinding};

pub use crate::engine::inputs::Inputs;
pub use crate::engine::node::NodeRef;

/// The process-scoped owner of the dashboard state.
///
/// An `Engine` is built once by a [`Blueprint`](crate::Blueprint) and owns the
/// dataset, the control store, the dependency graph and every output
/// binding. UI events come in through [`set`](Self::set); renderers pull
/// through [`refresh`](Self::refresh). Both take `&mut self`, so the
/// invalidate step and the stale-check-then-recompute step can never
/// interleave.
///
/// Derivations are pulled, never pushed: changing a control only marks the
/// dependent nodes stale, and a node is recomputed the first time somebody
/// asks for its value afterwards.
pub struct Engine {
    pub(crate) dataset: Arc<Dataset>,
    pub(crate) controls: ControlStore,
    pub(crate) graph: DependencyGraph,
    pub(crate) bindings: Vec<OutputBinding>,
    pub(crate) slots: HashMap<ArcStr, usize>,
}

impl Engine {
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn controls(&self) -> &ControlStore {
        &self.controls
    }

    pub fn bindings(&self) -> &[OutputBinding] {
        &self.bindings
    }

    /// Applies a UI update. Returns whether the value changed; when it did,
    /// every derivation that transitively reads the control becomes stale.
    pub fn set(&mut self, name: &str, value: impl Into<ControlValue>) -> Result<bool, EngineError> {
        let value = value.into();
        let shown = value.to_string();

        let changed = match self.controls.set(name, value) {
            Ok(changed) => changed,
            Err(err) => {
                tracing::warn!(control = name, value = %shown, "rejected update: {err}");
                return Err(err);
            }
        };

        if changed {
            let stale = self.graph.mark_changed(name)?;
            tracing::info!(control = name, value = %shown, stale, "control changed");
        } else {
            tracing::trace!(control = name, "value unchanged");
        }

        Ok(changed)
    }

    /// Restores a control to its configured default.
    pub fn reset(&mut self, name: &str) -> Result<bool, EngineError> {
        let default = self.controls.entry(name)?.default_value().clone();
        self.set(name, default)
    }

    /// The current value of a node, recomputed first if it is stale.
    pub fn value<T>(&mut self, node: NodeRef<T>) -> Result<Derived<T>, EngineError>
    where
        T: Send + Sync + 'static,
    {
        self.fetch(node.index)
    }

    /// Like [`value`](Self::value), but looks the node up by name.
    pub fn value_of<T>(&mut self, name: &str) -> Result<Derived<T>, EngineError>
    where
        T: Send + Sync + 'static,
    {
        let index = self.node_index(name)?;
        self.fetch(index)
    }

    /// How many times the node has been computed so far.
    pub fn version(&self, name: &str) -> Result<u64, EngineError> {
        let index = self.node_index(name)?;
        Ok(self.graph.node(index).map_or(0, |node| node.version()))
    }

    pub fn is_stale(&self, name: &str) -> Result<bool, EngineError> {
        let index = self.node_index(name)?;
        Ok(self.graph.node(index).is_some_and(|node| !node.is_fresh()))
    }

    /// Pulls the value bound to `slot` and renders it.
    pub fn refresh(&mut self, slot: &str) -> Result<Artifact, EngineError> {
        let binding = *self
            .slots
            .get(slot)
            .ok_or_else(|| EngineError::UnknownSlot(Arc::from(slot)))?;
        let index = self.bindings[binding].node;

        self.freshen(index)?;

        let result = self.cached(index)?;
        Ok(self.bindings[binding].render(result))
    }

    /// Refreshes every slot in binding order.
    pub fn refresh_all(&mut self) -> Result<Vec<(ArcStr, Artifact)>, EngineError> {
        let slots: Vec<ArcStr> = self.bindings.iter().map(|b| b.slot.clone()).collect();

        slots
            .into_iter()
            .map(|slot| {
                let artifact = self.refresh(&slot)?;
                Ok((slot, artifact))
            })
            .collect()
    }

    /// Wraps the engine for hosts that deliver events from several threads.
    pub fn into_shared(self) -> SharedEngine {
        SharedEngine(Arc::new(Mutex::new(self)))
    }

    fn node_index(&self, name: &str) -> Result<NodeIndex, EngineError> {
        self.graph
            .index_of(name)
            .filter(|&index| self.graph.node(index).is_some())
            .ok_or_else(|| EngineError::UnknownNode(Arc::from(name)))
    }

    fn cached(&self, index: NodeIndex) -> Result<&DynamicResult, EngineError> {
        let node = self
            .graph
            .node(index)
            .ok_or_else(|| EngineError::UnknownNode(Arc::from(index.index().to_string())))?;

        node.cached()
            .ok_or_else(|| EngineError::UnknownNode(node.name.clone()))
    }

    fn fetch<T>(&mut self, index: NodeIndex) -> Result<Derived<T>, EngineError>
    where
        T: Send + Sync + 'static,
    {
        self.freshen(index)?;

        let node = self
            .graph
            .node(index)
            .ok_or_else(|| EngineError::UnknownNode(Arc::from(index.index().to_string())))?;
        let result = self.cached(index)?;

        crate::engine::node::downcast::<T>(result).ok_or_else(|| EngineError::TypeMismatch {
            node: node.name.clone(),
            expected: std::any::type_name::<T>(),
            found: node.output_type_name(),
        })
    }

    /// Brings a node up to date, recomputing its stale upstream nodes first.
    fn freshen(&mut self, index: NodeIndex) -> Result<(), EngineError> {
        let node = self
            .graph
            .node(index)
            .ok_or_else(|| EngineError::UnknownNode(Arc::from(index.index().to_string())))?;

        if node.is_fresh() {
            tracing::trace!(node = %node.name, "cache hit");
            return Ok(());
        }

        for upstream in self.graph.upstream_nodes(index) {
            self.freshen(upstream)?;
        }

        let Some(node) = self.graph.node(index) else {
            return Ok(());
        };

        let span = tracing::span!(Level::DEBUG, "derive", name = %node.name);
        let _enter = span.enter();

        let result = node.compute(&Inputs::new(node, &self.graph, &self.controls));

        if let Err(err) = &result {
            tracing::debug!("produced marker: {err}");
        }

        if let Some(node) = self.graph.node_mut(index) {
            node.store(result);
            tracing::debug!(version = node.version(), "recomputed");
        }

        Ok(())
    }
}

/// An [`Engine`] behind a mutex.
///
/// Each call holds the lock for its whole duration, so a reader never sees
/// a half-invalidated graph.
#[derive(Clone)]
pub struct SharedEngine(Arc<Mutex<Engine>>);

impl SharedEngine {
    pub fn set(&self, name: &str, value: impl Into<ControlValue>) -> Result<bool, EngineError> {
        self.with(|engine| engine.set(name, value))?
    }

    pub fn refresh(&self, slot: &str) -> Result<Artifact, EngineError> {
        self.with(|engine| engine.refresh(slot))?
    }

    /// Runs `f` with exclusive access to the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> Result<R, EngineError> {
        let mut engine = self.0.lock().map_err(|_| EngineError::Poisoned)?;
        Ok(f(&mut engine))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::blueprint::Blueprint;
    use crate::control::ControlDef;
    use crate::error::DeriveError;
    use crate::output::Text;

    fn blueprint() -> Blueprint {
        let dataset = Arc::new(Dataset::penguins_sample().unwrap());
        let mut blueprint = Blueprint::new(dataset);
        blueprint
            .control(&ControlDef::range("a", 0.0, 100.0, 1.0))
            .unwrap();
        blueprint
            .control(&ControlDef::range("b", 0.0, 100.0, 2.0))
            .unwrap();
        blueprint
    }

    #[test]
    fn test_pull_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut blueprint = blueprint();

        let counter = calls.clone();
        let sum = blueprint
            .node("sum")
            .depends_on(["a", "b"])
            .run(move |inputs| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(inputs.number("a")? + inputs.number("b")?)
            })
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(*engine.value(sum).unwrap().unwrap(), 3.0);
        assert_eq!(*engine.value(sum).unwrap().unwrap(), 3.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        engine.set("a", 10.0).unwrap();
        engine.set("b", 20.0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(engine.is_stale("sum").unwrap());

        assert_eq!(*engine.value(sum).unwrap().unwrap(), 30.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.version("sum").unwrap(), 2);
    }

    #[test]
    fn test_unchanged_value_keeps_cache() {
        let mut blueprint = blueprint();
        let a = blueprint
            .node("double")
            .depends_on(["a"])
            .run(|inputs| Ok(inputs.number("a")? * 2.0))
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        engine.value(a).unwrap().unwrap();

        assert!(!engine.set("a", 1.0).unwrap());
        assert!(!engine.is_stale("double").unwrap());
        assert_eq!(engine.version("double").unwrap(), 1);
    }

    #[test]
    fn test_independent_node_untouched() {
        let mut blueprint = blueprint();
        let from_a = blueprint
            .node("from_a")
            .depends_on(["a"])
            .run(|inputs| inputs.number("a"))
            .unwrap();
        let from_b = blueprint
            .node("from_b")
            .depends_on(["b"])
            .run(|inputs| inputs.number("b"))
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        engine.value(from_a).unwrap().unwrap();
        engine.value(from_b).unwrap().unwrap();

        engine.set("a", 50.0).unwrap();
        engine.value(from_a).unwrap().unwrap();
        engine.value(from_b).unwrap().unwrap();

        assert_eq!(engine.version("from_a").unwrap(), 2);
        assert_eq!(engine.version("from_b").unwrap(), 1);
    }

    #[test]
    fn test_diamond_computes_shared_input_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut blueprint = blueprint();

        let counter = calls.clone();
        blueprint
            .node("base")
            .depends_on(["a"])
            .run(move |inputs| {
                counter.fetch_add(1, Ordering::SeqCst);
                inputs.number("a")
            })
            .unwrap();
        blueprint
            .node("left")
            .depends_on(["base"])
            .run(|inputs| Ok(*inputs.node::<f64>("base")? + 1.0))
            .unwrap();
        blueprint
            .node("right")
            .depends_on(["base"])
            .run(|inputs| Ok(*inputs.node::<f64>("base")? * 2.0))
            .unwrap();
        let join = blueprint
            .node("join")
            .depends_on(["left", "right"])
            .run(|inputs| Ok(*inputs.node::<f64>("left")? + *inputs.node::<f64>("right")?))
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        engine.set("a", 4.0).unwrap();

        assert_eq!(*engine.value(join).unwrap().unwrap(), 13.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_propagates_and_is_cached() {
        let mut blueprint = blueprint();
        blueprint
            .node("maybe")
            .depends_on(["a"])
            .run(|inputs| {
                let a = inputs.number("a")?;
                if a == 0.0 { Err(DeriveError::Empty) } else { Ok(a) }
            })
            .unwrap();
        let downstream = blueprint
            .node("downstream")
            .depends_on(["maybe"])
            .run(|inputs| Ok(*inputs.node::<f64>("maybe")? + 1.0))
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        engine.set("a", 0.0).unwrap();

        assert!(matches!(engine.value(downstream).unwrap(), Err(DeriveError::Empty)));
        assert!(matches!(engine.value(downstream).unwrap(), Err(DeriveError::Empty)));
        assert_eq!(engine.version("downstream").unwrap(), 1);

        engine.set("a", 2.0).unwrap();
        assert_eq!(*engine.value(downstream).unwrap().unwrap(), 3.0);
    }

    #[test]
    fn test_panic_becomes_failure() {
        let mut blueprint = blueprint();
        let boom = blueprint
            .node("boom")
            .depends_on(["a"])
            .run(|inputs| -> Result<f64, DeriveError> {
                if inputs.number("a")? > 50.0 {
                    panic!("too large");
                }
                inputs.number("a")
            })
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        engine.set("a", 60.0).unwrap();

        match engine.value(boom).unwrap() {
            Err(DeriveError::Failed(err)) => assert!(err.to_string().contains("too large")),
            other => panic!("unexpected {other:?}"),
        }

        engine.set("a", 5.0).unwrap();
        assert_eq!(*engine.value(boom).unwrap().unwrap(), 5.0);
    }

    #[test]
    fn test_undeclared_read_fails() {
        let mut blueprint = blueprint();
        let sneaky = blueprint
            .node("sneaky")
            .depends_on(["a"])
            .run(|inputs| inputs.number("b"))
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        assert!(matches!(engine.value(sneaky).unwrap(), Err(DeriveError::Failed(_))));
    }

    #[test]
    fn test_rejected_update_keeps_state() {
        let mut blueprint = blueprint();
        let a = blueprint
            .node("copy")
            .depends_on(["a"])
            .run(|inputs| inputs.number("a"))
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        engine.value(a).unwrap().unwrap();

        let err = engine.set("a", 1000.0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidValue { .. }));
        assert!(!engine.is_stale("copy").unwrap());

        let err = engine.set("missing", 1.0).unwrap_err();
        assert!(matches!(err, EngineError::UnknownControl(_)));
    }

    #[test]
    fn test_value_of_checks_type() {
        let mut blueprint = blueprint();
        blueprint
            .node("copy")
            .depends_on(["a"])
            .run(|inputs| inputs.number("a"))
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        assert_eq!(*engine.value_of::<f64>("copy").unwrap().unwrap(), 1.0);
        assert!(matches!(
            engine.value_of::<usize>("copy"),
            Err(EngineError::TypeMismatch { .. })
        ));
        assert!(matches!(
            engine.value_of::<f64>("nothing"),
            Err(EngineError::UnknownNode(_))
        ));
        assert!(matches!(engine.version("a"), Err(EngineError::UnknownNode(_))));
    }

    #[test]
    fn test_refresh_and_reset() {
        let mut blueprint = blueprint();
        let copy = blueprint
            .node("copy")
            .depends_on(["a"])
            .run(|inputs| inputs.number("a"))
            .unwrap();
        blueprint
            .bind("copy", copy, Text(|a: &f64| format!("{a:.1}")))
            .unwrap();

        let mut engine = blueprint.finish().unwrap();
        engine.set("a", 7.0).unwrap();
        assert_eq!(engine.refresh("copy").unwrap(), Artifact::Text("7.0".into()));

        assert!(engine.reset("a").unwrap());
        assert_eq!(engine.refresh("copy").unwrap(), Artifact::Text("1.0".into()));

        assert!(matches!(engine.refresh("nope"), Err(EngineError::UnknownSlot(_))));
    }

    #[test]
    fn test_shared_engine() {
        let mut blueprint = blueprint();
        let copy = blueprint
            .node("copy")
            .depends_on(["b"])
            .run(|inputs| inputs.number("b"))
            .unwrap();
        blueprint
            .bind("copy", copy, Text(|b: &f64| b.to_string()))
            .unwrap();

        let shared = blueprint.finish().unwrap().into_shared();
        let handle = shared.clone();

        std::thread::spawn(move || handle.set("b", 42.0).unwrap())
            .join()
            .unwrap();

        assert_eq!(shared.refresh("copy").unwrap(), Artifact::Text("42".into()));
    }

    #[test]
    fn test_render_mermaid() {
        let mut blueprint = blueprint();
        let copy = blueprint
            .node("copy")
            .depends_on(["a"])
            .run(|inputs| inputs.number("a"))
            .unwrap();
        blueprint
            .bind("out", copy, Text(|a: &f64| a.to_string()))
            .unwrap();

        let engine = blueprint.finish().unwrap();
        let diagram = engine.render_mermaid();

        assert!(diagram.starts_with("graph LR"));
        assert!(diagram.contains("copy\\nv0"));
        assert!(diagram.contains("-- \"control\" -->"));
        assert!(diagram.contains("((\"out\"))"));
    }
}
