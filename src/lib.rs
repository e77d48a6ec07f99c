#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod control;
mod core;
pub mod dashboard;
mod dataset;
mod engine;
mod error;
pub mod output;
pub mod utils;
pub mod views;

pub use crate::blueprint::{Blueprint, NodeBinder, NodeDef};
pub use crate::control::{ControlDef, ControlEntry, ControlKind, ControlStore, ControlValue};
pub use crate::core::{ArcStr, Derived};
pub use crate::dashboard::DashboardConfig;
pub use crate::dataset::{Cell, Dataset, Field, FieldKind, Row, Schema};
pub use crate::engine::{Engine, Inputs, NodeRef, SharedEngine};
pub use crate::error::{ComputationError, DeriveError, EngineError, SchemaError};
pub use crate::output::{Adapter, Artifact, Buckets, Chart, OutputBinding, SlotKind, Table, Text};
pub use crate::views::{ChartSeries, Histogram, Selection, TableRows};
