//! The penguins dashboard, assembled from configuration.
//!
//! [`DashboardConfig`] names the controls, which fields they filter on and
//! which slots to produce. [`build`] turns it into an [`Engine`] with one
//! `filtered_view` node at the root of every derived view.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;

use anyhow::anyhow;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::blueprint::Blueprint;
use crate::control::{ControlDef, ControlKind};
use crate::dataset::{Dataset, FieldKind, Schema};
use crate::engine::{Engine, NodeRef};
use crate::error::EngineError;
use crate::output::{Buckets, Chart, Table, Text};
use crate::views::{self, Selection};

/// Name of the node every other dashboard node reads from.
pub const FILTERED_VIEW: &str = "filtered_view";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub controls: Vec<ControlDef>,
    pub filter: FilterConfig,
    /// Slot showing the number of rows left after filtering.
    pub count: Option<String>,
    pub summaries: Vec<SummaryConfig>,
    pub chart: Option<ChartConfig>,
    pub histogram: Option<HistogramConfig>,
    pub table: Option<TableConfig>,
}

/// Which fields the two filter controls act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub category_field: String,
    pub category_control: String,
    pub threshold_field: String,
    pub threshold_control: String,
}

/// A value box with the mean of a numeric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub slot: String,
    pub field: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_precision")]
    pub precision: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    pub slot: String,
    pub x: String,
    pub y: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramConfig {
    pub slot: String,
    /// A `choice` control whose options are numeric fields.
    pub control: String,
    #[serde(default = "default_bins")]
    pub bins: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub slot: String,
    pub columns: Vec<String>,
}

fn default_precision() -> usize {
    1
}

fn default_bins() -> usize {
    10
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            controls: vec![
                ControlDef::range("mass", 2000.0, 6000.0, 6000.0),
                ControlDef::labels(
                    "species",
                    ["Adelie", "Gentoo", "Chinstrap"],
                    ["Adelie", "Gentoo", "Chinstrap"],
                ),
                ControlDef::choice(
                    "hist_field",
                    [
                        "bill_length_mm",
                        "bill_depth_mm",
                        "flipper_length_mm",
                        "body_mass_g",
                    ],
                    "bill_length_mm",
                ),
            ],
            filter: FilterConfig {
                category_field: "species".into(),
                category_control: "species".into(),
                threshold_field: "body_mass_g".into(),
                threshold_control: "mass".into(),
            },
            count: Some("count".into()),
            summaries: vec![
                SummaryConfig {
                    slot: "bill_length".into(),
                    field: "bill_length_mm".into(),
                    unit: "mm".into(),
                    precision: 1,
                },
                SummaryConfig {
                    slot: "bill_depth".into(),
                    field: "bill_depth_mm".into(),
                    unit: "mm".into(),
                    precision: 1,
                },
            ],
            chart: Some(ChartConfig {
                slot: "length_depth".into(),
                x: "bill_length_mm".into(),
                y: "bill_depth_mm".into(),
                color: "species".into(),
            }),
            histogram: Some(HistogramConfig {
                slot: "histogram".into(),
                control: "hist_field".into(),
                bins: default_bins(),
            }),
            table: Some(TableConfig {
                slot: "summary_statistics".into(),
                columns: vec![
                    "species".into(),
                    "island".into(),
                    "bill_length_mm".into(),
                    "bill_depth_mm".into(),
                    "body_mass_g".into(),
                ],
            }),
        }
    }
}

impl DashboardConfig {
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|err| EngineError::Config(err.to_string()))
    }

    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("couldn't read {path}: {err}")))?;

        Self::from_json(&text)
    }

    fn control(&self, name: &str) -> Result<&ControlDef, EngineError> {
        self.controls
            .iter()
            .find(|def| def.name == name)
            .ok_or_else(|| EngineError::Config(format!("control '{name}' is not declared")))
    }
}

/// Formats a summary value the way the value boxes show it, e.g. `38.8 mm`.
pub fn format_measure(value: f64, precision: usize, unit: &str) -> String {
    if unit.is_empty() {
        format!("{value:.precision$}")
    } else {
        format!("{value:.precision$} {unit}")
    }
}

/// Builds the dashboard engine over `dataset`.
///
/// Field names are checked against the dataset schema and control kinds
/// against their use, so a bad configuration fails here rather than on the
/// first refresh.
pub fn build(dataset: Arc<Dataset>, config: &DashboardConfig) -> Result<Engine, EngineError> {
    let schema = dataset.schema().clone();
    let filter = &config.filter;

    let category = schema.expect(&filter.category_field, FieldKind::Categorical)?;
    let threshold = schema.expect(&filter.threshold_field, FieldKind::Numeric)?;

    if !matches!(config.control(&filter.category_control)?.kind, ControlKind::Labels { .. }) {
        return Err(EngineError::Config(format!(
            "control '{}' filters a category and must be 'labels'",
            filter.category_control
        )));
    }
    if !matches!(config.control(&filter.threshold_control)?.kind, ControlKind::Range { .. }) {
        return Err(EngineError::Config(format!(
            "control '{}' is a threshold and must be 'range'",
            filter.threshold_control
        )));
    }

    let mut blueprint = Blueprint::new(dataset.clone());
    for def in &config.controls {
        blueprint.control(def)?;
    }

    let category_control = filter.category_control.clone();
    let threshold_control = filter.threshold_control.clone();
    blueprint
        .node(FILTERED_VIEW)
        .depends_on([&filter.category_control, &filter.threshold_control])
        .run(move |inputs| {
            let labels = inputs.labels(&category_control)?;
            let limit = inputs.number(&threshold_control)?;
            Ok(views::filter(&dataset, category, threshold, labels, limit))
        })?;

    let count = blueprint
        .node("row_count")
        .depends_on([FILTERED_VIEW])
        .run(|inputs| Ok(inputs.node::<Selection>(FILTERED_VIEW)?.len()))?;

    if let Some(slot) = &config.count {
        blueprint.bind(slot, count, Text(|count: &usize| count.to_string()))?;
    }

    let mut means: HashMap<&str, NodeRef<f64>> = HashMap::new();
    for summary in &config.summaries {
        let column = schema.expect(&summary.field, FieldKind::Numeric)?;

        let mean = match means.get(summary.field.as_str()) {
            Some(&mean) => mean,
            None => {
                let mean = blueprint
                    .node(format!("mean_{}", summary.field))
                    .depends_on([FILTERED_VIEW])
                    .run(move |inputs| views::mean(inputs.node(FILTERED_VIEW)?, column))?;
                means.insert(&summary.field, mean);
                mean
            }
        };

        let (precision, unit) = (summary.precision, summary.unit.clone());
        blueprint.bind(
            &summary.slot,
            mean,
            Text(move |mean: &f64| format_measure(*mean, precision, &unit)),
        )?;
    }

    if let Some(chart) = &config.chart {
        let x = schema.expect(&chart.x, FieldKind::Numeric)?;
        let y = schema.expect(&chart.y, FieldKind::Numeric)?;
        let color = schema.expect(&chart.color, FieldKind::Categorical)?;
        let labels = (chart.x.clone(), chart.y.clone(), chart.color.clone());

        let series = blueprint
            .node("chart_series")
            .depends_on([FILTERED_VIEW])
            .run(move |inputs| {
                let (x_label, y_label, color_label) = &labels;
                views::chart_series(
                    inputs.node(FILTERED_VIEW)?,
                    (x_label.as_str(), x),
                    (y_label.as_str(), y),
                    (color_label.as_str(), color),
                )
            })?;

        blueprint.bind(&chart.slot, series, Chart)?;
    }

    if let Some(histogram) = &config.histogram {
        if histogram.bins == 0 {
            return Err(EngineError::Config(format!(
                "histogram '{}' needs at least one bin",
                histogram.slot
            )));
        }

        let fields = histogram_fields(config, &schema, histogram)?;
        let control = histogram.control.clone();
        let bins = histogram.bins;

        let buckets = blueprint
            .node("histogram")
            .depends_on([FILTERED_VIEW, histogram.control.as_str()])
            .run(move |inputs| {
                let field = inputs.choice(&control)?;
                let column = *fields
                    .get(field)
                    .ok_or_else(|| anyhow!("'{field}' is not a numeric field"))?;
                views::histogram(inputs.node(FILTERED_VIEW)?, field, column, bins)
            })?;

        blueprint.bind(&histogram.slot, buckets, Buckets)?;
    }

    if let Some(table) = &config.table {
        let columns = table
            .columns
            .iter()
            .map(|name| -> Result<_, EngineError> { Ok((name.clone(), schema.index(name)?)) })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let rows = blueprint
            .node("table_rows")
            .depends_on([FILTERED_VIEW])
            .run(move |inputs| Ok(views::table_rows(inputs.node(FILTERED_VIEW)?, &columns)))?;

        blueprint.bind(&table.slot, rows, Table)?;
    }

    blueprint.finish()
}

/// Column indices of the numeric fields the histogram control can pick.
fn histogram_fields(
    config: &DashboardConfig,
    schema: &Schema,
    histogram: &HistogramConfig,
) -> Result<HashMap<String, usize>, EngineError> {
    let ControlKind::Choice { options, .. } = &config.control(&histogram.control)?.kind else {
        return Err(EngineError::Config(format!(
            "control '{}' picks the histogram field and must be 'choice'",
            histogram.control
        )));
    };

    let mut seen = HashSet::new();
    options
        .iter()
        .filter(|option| seen.insert(option.as_str()))
        .map(|option| -> Result<_, EngineError> {
            Ok((option.clone(), schema.expect(option, FieldKind::Numeric)?))
        })
        .collect()
}
