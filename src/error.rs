use std::sync::Arc;

use thiserror::Error;

use crate::core::ArcStr;

/// A failure raised by a node function, shared between every reader of the
/// cached marker.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct ComputationError(#[from] pub(crate) Arc<anyhow::Error>);

impl ComputationError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for ComputationError {
    fn from(e: anyhow::Error) -> Self {
        ComputationError(Arc::new(e))
    }
}

/// Marker produced in place of a value by a derivation.
///
/// Both variants are cached exactly like values, so a derivation over an
/// empty selection is computed once per control state, not once per reader.
#[derive(Debug, Error, Clone)]
pub enum DeriveError {
    /// The derivation ran over zero matching rows.
    #[error("no data available")]
    Empty,

    #[error("computation failed: {0}")]
    Failed(#[from] ComputationError),
}

impl From<anyhow::Error> for DeriveError {
    fn from(e: anyhow::Error) -> Self {
        DeriveError::Failed(e.into())
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Dataset is missing field '{0}'")]
    MissingField(String),

    #[error("Row {row}: field '{field}' should be {expected}, found {found}")]
    WrongType {
        row: usize,
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("Row {row} has {found} cells, the schema has {expected} fields")]
    Arity {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Row {0} is not a JSON object")]
    NotAnObject(usize),

    #[error("Dataset must be a JSON array of records")]
    NotAnArray,

    #[error("Field '{0}' is not part of the schema")]
    UnknownField(String),

    #[error("Field '{field}' is {found}, expected {expected}")]
    FieldKind {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Couldn't parse dataset.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Couldn't read dataset.\n{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown control '{0}'")]
    UnknownControl(ArcStr),

    #[error("Unknown node '{0}'")]
    UnknownNode(ArcStr),

    #[error("Unknown output slot '{0}'")]
    UnknownSlot(ArcStr),

    #[error("Input '{input}' of node '{node}' was never registered")]
    UnknownInput { node: ArcStr, input: ArcStr },

    #[error("Invalid value for control '{control}': {reason}")]
    InvalidValue { control: ArcStr, reason: String },

    #[error("Registering '{node}' would create a cycle through '{input}'")]
    CyclicDependency { node: ArcStr, input: ArcStr },

    #[error("Name '{0}' is already registered")]
    DuplicateName(ArcStr),

    #[error("Node '{node}' produces {found}, not {expected}")]
    TypeMismatch {
        node: ArcStr,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Schema error:\n{0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid configuration:\n{0}")]
    Config(String),

    #[error("Engine lock was poisoned by a panicking thread")]
    Poisoned,
}

impl EngineError {
    pub(crate) fn invalid(control: &ArcStr, reason: impl Into<String>) -> Self {
        EngineError::InvalidValue {
            control: control.clone(),
            reason: reason.into(),
        }
    }
}
