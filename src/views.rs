//! The values the dashboard derives from the dataset.
//!
//! Only [`filter`] looks at the raw [`Dataset`]; everything else works on
//! the [`Selection`] it produces.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde::ser::{SerializeSeq, Serializer};

use crate::core::ArcStr;
use crate::dataset::{Cell, Dataset, Row};
use crate::error::DeriveError;

/// The rows of the dataset that pass the current filter, by position.
#[derive(Debug, Clone)]
pub struct Selection {
    dataset: Arc<Dataset>,
    indices: Vec<usize>,
}

impl Selection {
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.indices.iter().map(|&i| self.dataset.row(i))
    }

    /// Present values of a numeric column; missing cells are skipped.
    pub fn numbers(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows().filter_map(move |row| row.get(column).as_number())
    }
}

impl PartialEq for Selection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.dataset, &other.dataset) && self.indices == other.indices
    }
}

/// Keeps the rows whose `category` cell is one of `labels` and whose
/// `numeric` cell is strictly below `threshold`.
pub fn filter(
    dataset: &Arc<Dataset>,
    category: usize,
    numeric: usize,
    labels: &BTreeSet<ArcStr>,
    threshold: f64,
) -> Selection {
    let indices = dataset
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            let label = row.get(category).as_label();
            let value = row.get(numeric).as_number();

            match (label, value) {
                (Some(label), Some(value)) => labels.contains(label) && value < threshold,
                _ => false,
            }
        })
        .map(|(i, _)| i)
        .collect();

    Selection {
        dataset: dataset.clone(),
        indices,
    }
}

/// Arithmetic mean of a numeric column, `Empty` when no value is present.
pub fn mean(selection: &Selection, column: usize) -> Result<f64, DeriveError> {
    let (sum, count) = selection
        .numbers(column)
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

    if count == 0 {
        return Err(DeriveError::Empty);
    }

    Ok(sum / count as f64)
}

/// The columns a scatter chart needs: one point per row with both
/// coordinates present, colored by a categorical field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub x_label: String,
    pub y_label: String,
    pub color_label: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(serialize_with = "serialize_labels")]
    pub color: Vec<Option<ArcStr>>,
}

pub fn chart_series(
    selection: &Selection,
    (x_label, x): (&str, usize),
    (y_label, y): (&str, usize),
    (color_label, color): (&str, usize),
) -> Result<ChartSeries, DeriveError> {
    let mut series = ChartSeries {
        x_label: x_label.to_string(),
        y_label: y_label.to_string(),
        color_label: color_label.to_string(),
        x: Vec::new(),
        y: Vec::new(),
        color: Vec::new(),
    };

    for row in selection.rows() {
        if let (Some(px), Some(py)) = (row.get(x).as_number(), row.get(y).as_number()) {
            series.x.push(px);
            series.y.push(py);
            series.color.push(match row.get(color) {
                Cell::Label(label) => Some(label.clone()),
                _ => None,
            });
        }
    }

    if series.x.is_empty() {
        return Err(DeriveError::Empty);
    }

    Ok(series)
}

/// Equal-width bucketed counts of a numeric field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub field: String,
    /// `counts.len() + 1` bucket boundaries, ascending.
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

pub fn histogram(
    selection: &Selection,
    field: &str,
    column: usize,
    bins: usize,
) -> Result<Histogram, DeriveError> {
    let bins = bins.max(1);
    let values: Vec<f64> = selection.numbers(column).collect();

    let (min, max) = values
        .iter()
        .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .ok_or(DeriveError::Empty)?;

    let max = if max > min { max } else { min + 1.0 };

    // Halved so that the span of any two finite values stays finite.
    let half_span = max / 2.0 - min / 2.0;

    let mut counts = vec![0; bins];
    for value in values {
        let position = (value / 2.0 - min / 2.0) / half_span;
        let bucket = (position * bins as f64) as usize;
        counts[bucket.min(bins - 1)] += 1;
    }

    let edges = (0..=bins)
        .map(|i| {
            let t = i as f64 / bins as f64;
            min * (1.0 - t) + max * t
        })
        .collect();

    Ok(Histogram {
        field: field.to_string(),
        edges,
        counts,
    })
}

/// A projection of the selected rows onto a fixed list of columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRows {
    pub columns: Vec<String>,
    #[serde(serialize_with = "serialize_rows")]
    pub rows: Vec<Vec<Cell>>,
}

pub fn table_rows(selection: &Selection, columns: &[(String, usize)]) -> TableRows {
    TableRows {
        columns: columns.iter().map(|(name, _)| name.clone()).collect(),
        rows: selection
            .rows()
            .map(|row| columns.iter().map(|&(_, i)| row.get(i).clone()).collect())
            .collect(),
    }
}

fn serialize_labels<S: Serializer>(labels: &[Option<ArcStr>], s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(labels.len()))?;
    for label in labels {
        seq.serialize_element(&label.as_deref())?;
    }
    seq.end()
}

fn serialize_rows<S: Serializer>(rows: &[Vec<Cell>], s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(rows.len()))?;
    for row in rows {
        let row: Vec<serde_json::Value> = row
            .iter()
            .map(|cell| match cell {
                Cell::Label(label) => serde_json::Value::from(&**label),
                Cell::Number(n) => serde_json::Value::from(*n),
                Cell::Missing => serde_json::Value::Null,
            })
            .collect();
        seq.serialize_element(&row)?;
    }
    seq.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlValue;
    use crate::dataset::{Field, Schema};

    fn dataset() -> Arc<Dataset> {
        let schema = Schema::new([
            Field::categorical("species"),
            Field::numeric("body_mass_g"),
            Field::numeric("bill_length_mm"),
        ]);

        let row = |species: &str, mass: f64, bill: f64| {
            vec![Cell::Label(species.into()), Cell::Number(mass), Cell::Number(bill)]
        };

        let rows = vec![
            row("A", 3000.0, 10.0),
            row("A", 5000.0, 20.0),
            row("B", 4000.0, 15.0),
            vec![Cell::Label("B".into()), Cell::Missing, Cell::Number(99.0)],
            vec![Cell::Label("A".into()), Cell::Number(3500.0), Cell::Missing],
        ];

        Arc::new(Dataset::new(schema, rows).unwrap())
    }

    fn labels(labels: &[&str]) -> BTreeSet<ArcStr> {
        match ControlValue::labels(labels) {
            ControlValue::Labels(set) => set,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_filter_strictly_below() {
        let data = dataset();
        let selection = filter(&data, 0, 1, &labels(&["A"]), 5000.0);
        assert_eq!(selection.indices(), &[0, 4]);

        let selection = filter(&data, 0, 1, &labels(&["A", "B"]), 5000.01);
        assert_eq!(selection.indices(), &[0, 1, 2, 4]);
    }

    #[test]
    fn test_filter_empty_labels() {
        let data = dataset();
        assert!(filter(&data, 0, 1, &BTreeSet::new(), 1e9).is_empty());
    }

    #[test]
    fn test_filter_monotonic_in_threshold() {
        let data = dataset();
        let all = labels(&["A", "B"]);
        let mut previous = usize::MAX;

        for threshold in [6000.0, 5000.0, 4000.0, 3500.0, 3000.0, 2000.0] {
            let len = filter(&data, 0, 1, &all, threshold).len();
            assert!(len <= previous);
            previous = len;
        }
    }

    #[test]
    fn test_mean_skips_missing() {
        let data = dataset();
        let selection = filter(&data, 0, 1, &labels(&["A"]), 6000.0);
        assert_eq!(mean(&selection, 2).unwrap(), 15.0);

        let selection = filter(&data, 0, 1, &labels(&[]), 6000.0);
        assert!(matches!(mean(&selection, 2), Err(DeriveError::Empty)));
    }

    #[test]
    fn test_chart_series() {
        let data = dataset();
        let selection = filter(&data, 0, 1, &labels(&["A", "B"]), 6000.0);
        let series =
            chart_series(&selection, ("mass", 1), ("bill", 2), ("species", 0)).unwrap();

        assert_eq!(series.x, [3000.0, 5000.0, 4000.0]);
        assert_eq!(series.y, [10.0, 20.0, 15.0]);
        assert_eq!(series.color.len(), 3);

        let none = filter(&data, 0, 1, &labels(&["A"]), 0.0);
        assert!(matches!(
            chart_series(&none, ("mass", 1), ("bill", 2), ("species", 0)),
            Err(DeriveError::Empty)
        ));
    }

    #[test]
    fn test_histogram() {
        let data = dataset();
        let selection = filter(&data, 0, 1, &labels(&["A", "B"]), 6000.0);
        let hist = histogram(&selection, "body_mass_g", 1, 2).unwrap();

        assert_eq!(hist.edges, [3000.0, 4000.0, 5000.0]);
        assert_eq!(hist.counts, [2, 2]);
        assert_eq!(hist.counts.iter().sum::<usize>(), selection.len());
    }

    #[test]
    fn test_histogram_single_value() {
        let data = dataset();
        let selection = filter(&data, 0, 1, &labels(&["B"]), 6000.0);
        let hist = histogram(&selection, "body_mass_g", 1, 4).unwrap();

        assert_eq!(hist.counts, [1, 0, 0, 0]);
        assert_eq!(hist.edges.first(), Some(&4000.0));
        assert_eq!(hist.edges.last(), Some(&4001.0));
    }

    #[test]
    fn test_histogram_extreme_span() {
        let schema = Schema::new([Field::categorical("species"), Field::numeric("x")]);
        let rows = [-1e308, 0.0, 1e308]
            .into_iter()
            .map(|x| vec![Cell::Label("A".into()), Cell::Number(x)])
            .collect();
        let data = Arc::new(Dataset::new(schema, rows).unwrap());
        let selection = filter(&data, 0, 1, &labels(&["A"]), f64::MAX);

        let hist = histogram(&selection, "x", 1, 4).unwrap();

        assert!(hist.edges.iter().all(|edge| edge.is_finite()));
        assert_eq!(hist.edges.first(), Some(&-1e308));
        assert_eq!(hist.edges.last(), Some(&1e308));
        assert_eq!(hist.counts, [1, 0, 1, 1]);
    }

    #[test]
    fn test_mean_skips_non_finite() {
        let schema = Schema::new([
            Field::categorical("species"),
            Field::numeric("body_mass_g"),
            Field::numeric("bill_length_mm"),
        ]);
        let rows = [10.0, f64::NAN, f64::INFINITY]
            .into_iter()
            .map(|bill| vec![Cell::Label("A".into()), Cell::Number(3000.0), Cell::Number(bill)])
            .collect();
        let data = Arc::new(Dataset::new(schema, rows).unwrap());
        let selection = filter(&data, 0, 1, &labels(&["A"]), 6000.0);

        assert_eq!(selection.len(), 3);
        assert_eq!(mean(&selection, 2).unwrap(), 10.0);
    }

    #[test]
    fn test_table_rows() {
        let data = dataset();
        let selection = filter(&data, 0, 1, &labels(&["B"]), 6000.0);
        let table = table_rows(&selection, &[("species".into(), 0), ("bill".into(), 2)]);

        assert_eq!(table.columns, ["species", "bill"]);
        assert_eq!(
            table.rows,
            vec![vec![Cell::Label("B".into()), Cell::Number(15.0)]]
        );

        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"{"columns":["species","bill"],"rows":[["B",15.0]]}"#);
    }
}
