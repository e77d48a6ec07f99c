use std::collections::BTreeSet;

use anyhow::anyhow;

use crate::control::{ControlStore, ControlValue};
use crate::core::ArcStr;
use crate::engine::graph::DependencyGraph;
use crate::engine::node::DerivationNode;
use crate::error::DeriveError;

/// Read access to the current values of a derivation's declared inputs.
///
/// Every accessor refuses names the node did not declare, so a derivation
/// can't quietly depend on something the graph doesn't know about. Reading
/// an upstream node that holds a marker returns that same marker, which
/// lets `?` carry `Empty` down the graph.
pub struct Inputs<'a> {
    node: &'a DerivationNode,
    graph: &'a DependencyGraph,
    controls: &'a ControlStore,
}

impl<'a> Inputs<'a> {
    pub(crate) fn new(
        node: &'a DerivationNode,
        graph: &'a DependencyGraph,
        controls: &'a ControlStore,
    ) -> Self {
        Self {
            node,
            graph,
            controls,
        }
    }

    /// Name of the derivation being computed.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    fn declared(&self, input: &str) -> Result<(), DeriveError> {
        if self.node.inputs.iter().any(|declared| &**declared == input) {
            Ok(())
        } else {
            Err(anyhow!("'{}' read undeclared input '{input}'", self.node.name).into())
        }
    }

    pub fn control(&self, name: &str) -> Result<&'a ControlValue, DeriveError> {
        self.declared(name)?;
        self.controls
            .get(name)
            .map_err(|err| DeriveError::from(anyhow::Error::from(err)))
    }

    pub fn number(&self, name: &str) -> Result<f64, DeriveError> {
        match self.control(name)? {
            ControlValue::Number(n) => Ok(*n),
            other => Err(anyhow!("control '{name}' holds {other}, not a number").into()),
        }
    }

    pub fn labels(&self, name: &str) -> Result<&'a BTreeSet<ArcStr>, DeriveError> {
        match self.control(name)? {
            ControlValue::Labels(labels) => Ok(labels),
            other => Err(anyhow!("control '{name}' holds {other}, not a label set").into()),
        }
    }

    pub fn choice(&self, name: &str) -> Result<&'a str, DeriveError> {
        match self.control(name)? {
            ControlValue::Choice(option) => Ok(&**option),
            other => Err(anyhow!("control '{name}' holds {other}, not a choice").into()),
        }
    }

    /// The current value of an upstream derivation.
    pub fn node<T>(&self, name: &str) -> Result<&'a T, DeriveError>
    where
        T: Send + Sync + 'static,
    {
        self.declared(name)?;

        let node = self
            .graph
            .index_of(name)
            .and_then(|index| self.graph.node(index))
            .ok_or_else(|| anyhow!("'{name}' is not a derivation"))?;

        match node.cached() {
            Some(Ok(value)) => value.downcast_ref::<T>().ok_or_else(|| {
                anyhow!(
                    "'{name}' produces {}, not {}",
                    node.output_type_name(),
                    std::any::type_name::<T>()
                )
                .into()
            }),
            Some(Err(err)) => Err(err.clone()),
            None => Err(anyhow!("'{name}' has not been computed").into()),
        }
    }
}
