//! Output slots and the adapters that turn derived values into artifacts.
//!
//! This is the only place that talks to the rendering side. A binding holds
//! no cache of its own: two slots bound to the same node read the same
//! memoized value.

use std::fmt::Debug;
use std::marker::PhantomData;

use petgraph::graph::NodeIndex;
use serde::Serialize;

use crate::core::{ArcStr, DynamicResult};
use crate::error::DeriveError;
use crate::views::{ChartSeries, Histogram, TableRows};

/// Message shown in a slot whose derivation ran over zero rows.
pub const NO_DATA: &str = "No data available";

/// The kind of widget a slot feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Text,
    Chart,
    Histogram,
    Table,
}

/// Structured data handed to the external renderer. The core never produces
/// markup or pixels itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Artifact {
    Text(String),
    Chart(ChartSeries),
    Histogram(Histogram),
    Table(TableRows),
    /// The derivation produced `Empty`.
    NoData(String),
    /// The derivation failed.
    Error(String),
}

/// Converts the value of a node into an [`Artifact`] for one kind of slot.
pub trait Adapter<T>: Send + Sync + 'static {
    fn kind(&self) -> SlotKind;

    fn render(&self, value: &T) -> Artifact;
}

/// Formats a value into a line of text, e.g. a value box.
pub struct Text<F>(pub F);

impl<T, F> Adapter<T> for Text<F>
where
    F: Fn(&T) -> String + Send + Sync + 'static,
{
    fn kind(&self) -> SlotKind {
        SlotKind::Text
    }

    fn render(&self, value: &T) -> Artifact {
        Artifact::Text((self.0)(value))
    }
}

/// Passes chart columns through to the chart library.
pub struct Chart;

impl Adapter<ChartSeries> for Chart {
    fn kind(&self) -> SlotKind {
        SlotKind::Chart
    }

    fn render(&self, value: &ChartSeries) -> Artifact {
        Artifact::Chart(value.clone())
    }
}

/// Passes bucketed counts through to the chart library.
pub struct Buckets;

impl Adapter<Histogram> for Buckets {
    fn kind(&self) -> SlotKind {
        SlotKind::Histogram
    }

    fn render(&self, value: &Histogram) -> Artifact {
        Artifact::Histogram(value.clone())
    }
}

/// Passes projected rows through to the table widget.
pub struct Table;

impl Adapter<TableRows> for Table {
    fn kind(&self) -> SlotKind {
        SlotKind::Table
    }

    fn render(&self, value: &TableRows) -> Artifact {
        Artifact::Table(value.clone())
    }
}

pub(crate) trait ErasedAdapter: Send + Sync {
    fn kind(&self) -> SlotKind;

    fn render(&self, result: &DynamicResult) -> Artifact;
}

pub(crate) struct Typed<T, A> {
    adapter: A,
    _phantom: PhantomData<fn(&T)>,
}

impl<T, A> Typed<T, A> {
    pub(crate) fn new(adapter: A) -> Self {
        Self {
            adapter,
            _phantom: PhantomData,
        }
    }
}

impl<T, A> ErasedAdapter for Typed<T, A>
where
    T: Send + Sync + 'static,
    A: Adapter<T>,
{
    fn kind(&self) -> SlotKind {
        self.adapter.kind()
    }

    fn render(&self, result: &DynamicResult) -> Artifact {
        match result {
            Ok(value) => match value.downcast_ref::<T>() {
                Some(value) => self.adapter.render(value),
                None => Artifact::Error(format!(
                    "slot expects {}",
                    std::any::type_name::<T>()
                )),
            },
            Err(DeriveError::Empty) => Artifact::NoData(NO_DATA.into()),
            Err(DeriveError::Failed(err)) => Artifact::Error(err.to_string()),
        }
    }
}

/// Associates a derivation with an external rendering slot.
pub struct OutputBinding {
    pub(crate) slot: ArcStr,
    pub(crate) node: NodeIndex,
    pub(crate) adapter: Box<dyn ErasedAdapter>,
}

impl OutputBinding {
    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn kind(&self) -> SlotKind {
        self.adapter.kind()
    }

    pub(crate) fn render(&self, result: &DynamicResult) -> Artifact {
        self.adapter.render(result)
    }
}

impl Debug for OutputBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBinding")
            .field("slot", &self.slot)
            .field("kind", &self.kind())
            .field("node", &self.node)
            .finish()
    }
}
