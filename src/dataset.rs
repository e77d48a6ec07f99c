//! The immutable table every derivation reads from.
//!
//! A [`Dataset`] is loaded once at startup, validated against a [`Schema`],
//! and then shared behind an `Arc` for the lifetime of the process. Nothing
//! mutates it afterwards, which is what allows derivations to capture it
//! without declaring it as an input.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ArcStr;
use crate::error::SchemaError;

const SAMPLE: &str = include_str!("../data/penguins.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Categorical,
    Numeric,
}

impl FieldKind {
    fn describe(self) -> &'static str {
        match self {
            FieldKind::Categorical => "categorical",
            FieldKind::Numeric => "numeric",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn categorical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Categorical,
        }
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Numeric,
        }
    }
}

/// Ordered list of named, typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// The Palmer penguins table.
    pub fn penguins() -> Self {
        Self::new([
            Field::categorical("species"),
            Field::categorical("island"),
            Field::numeric("bill_length_mm"),
            Field::numeric("bill_depth_mm"),
            Field::numeric("flipper_length_mm"),
            Field::numeric("body_mass_g"),
            Field::categorical("sex"),
            Field::numeric("year"),
        ])
    }

    /// Position of `name` in every row.
    pub fn index(&self, name: &str) -> Result<usize, SchemaError> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))
    }

    /// Like [`index`](Self::index), but also checks the field kind.
    pub fn expect(&self, name: &str, kind: FieldKind) -> Result<usize, SchemaError> {
        let index = self.index(name)?;
        let found = self.fields[index].kind;

        if found != kind {
            return Err(SchemaError::FieldKind {
                field: name.to_string(),
                expected: kind.describe(),
                found: found.describe(),
            });
        }

        Ok(index)
    }
}

/// A single value in the table. `Missing` stands for `NA` in the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Label(ArcStr),
    Number(f64),
    Missing,
}

impl Cell {
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Cell::Label(label) => Some(&**label),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(number) => Some(*number),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    cells: Vec<Cell>,
}

impl Row {
    pub fn get(&self, column: usize) -> &Cell {
        &self.cells[column]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

#[derive(Debug)]
pub struct Dataset {
    schema: Schema,
    rows: Vec<Row>,
}

impl Dataset {
    /// Builds a dataset from already typed rows, checking arity and cell kinds.
    pub fn new(schema: Schema, rows: Vec<Vec<Cell>>) -> Result<Self, SchemaError> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, mut cells)| {
                if cells.len() > schema.fields.len() {
                    return Err(SchemaError::Arity {
                        row: i,
                        expected: schema.fields.len(),
                        found: cells.len(),
                    });
                }

                // Non-finite numbers carry no value for any aggregate.
                for cell in &mut cells {
                    if matches!(cell, Cell::Number(n) if !n.is_finite()) {
                        *cell = Cell::Missing;
                    }
                }

                for (index, field) in schema.fields.iter().enumerate() {
                    let found = match cells.get(index) {
                        Some(Cell::Missing) => continue,
                        Some(Cell::Label(_)) if field.kind == FieldKind::Categorical => continue,
                        Some(Cell::Number(_)) if field.kind == FieldKind::Numeric => continue,
                        Some(Cell::Label(label)) => format!("label {label:?}"),
                        Some(Cell::Number(number)) => format!("number {number}"),
                        None => return Err(SchemaError::MissingField(field.name.clone())),
                    };

                    return Err(SchemaError::WrongType {
                        row: i,
                        field: field.name.clone(),
                        expected: field.kind.describe(),
                        found,
                    });
                }

                Ok(Row { cells })
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { schema, rows })
    }

    /// Parses a JSON array of records. `null` and `"NA"` are read as missing.
    pub fn from_json(schema: Schema, text: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(records) = value else {
            return Err(SchemaError::NotAnArray);
        };

        // Labels repeat a lot, so they share one allocation per distinct value.
        let mut interned: HashMap<String, ArcStr> = HashMap::new();
        let mut rows = Vec::with_capacity(records.len());

        for (i, record) in records.into_iter().enumerate() {
            let Value::Object(mut record) = record else {
                return Err(SchemaError::NotAnObject(i));
            };

            let mut cells = Vec::with_capacity(schema.fields.len());

            for field in &schema.fields {
                let value = record
                    .remove(&field.name)
                    .ok_or_else(|| SchemaError::MissingField(field.name.clone()))?;

                let cell = match (field.kind, value) {
                    (_, Value::Null) => Cell::Missing,
                    (_, Value::String(s)) if s == "NA" => Cell::Missing,
                    (FieldKind::Numeric, Value::Number(n)) => match n.as_f64() {
                        Some(n) => Cell::Number(n),
                        None => Cell::Missing,
                    },
                    (FieldKind::Categorical, Value::String(s)) => {
                        let label = interned
                            .entry(s)
                            .or_insert_with_key(|s| Arc::from(s.as_str()))
                            .clone();
                        Cell::Label(label)
                    }
                    (kind, other) => {
                        return Err(SchemaError::WrongType {
                            row: i,
                            field: field.name.clone(),
                            expected: kind.describe(),
                            found: other.to_string(),
                        });
                    }
                };

                cells.push(cell);
            }

            rows.push(Row { cells });
        }

        Ok(Self { schema, rows })
    }

    /// Reads and parses a JSON dataset from disk.
    pub fn load(schema: Schema, path: impl AsRef<Utf8Path>) -> Result<Self, SchemaError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json(schema, &text)
    }

    /// A bundled excerpt of the Palmer penguins dataset.
    pub fn penguins_sample() -> Result<Self, SchemaError> {
        Self::from_json(Schema::penguins(), SAMPLE)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &Row {
        &self.rows[index]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All distinct labels of a categorical field, in first-seen order.
    pub fn labels(&self, field: &str) -> Result<Vec<ArcStr>, SchemaError> {
        let column = self.schema.expect(field, FieldKind::Categorical)?;
        let mut labels: Vec<ArcStr> = Vec::new();

        for row in &self.rows {
            if let Cell::Label(label) = row.get(column)
                && !labels.contains(label)
            {
                labels.push(label.clone());
            }
        }

        Ok(labels)
    }
}
