use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use console::style;
use tdash::{Artifact, DashboardConfig, Dataset, Engine, Schema};

/// Evaluate a dashboard once and print every output slot.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// JSON array of records; defaults to the bundled penguins sample.
    #[arg(long)]
    data: Option<Utf8PathBuf>,

    /// Dashboard configuration; defaults to the penguins dashboard.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Update a control before rendering, e.g. `--set mass=4500`.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_update)]
    updates: Vec<(String, String)>,

    /// Print artifacts as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Print the dependency graph as a Mermaid diagram after rendering.
    #[arg(long)]
    mermaid: bool,
}

fn parse_update(text: &str) -> Result<(String, String), String> {
    text.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{text}'"))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tdash::utils::init_logging()?;

    let dataset = match &args.data {
        Some(path) => Dataset::load(Schema::penguins(), path)
            .with_context(|| format!("loading dataset from {path}"))?,
        None => Dataset::penguins_sample()?,
    };

    let config = match &args.config {
        Some(path) => DashboardConfig::load(path)?,
        None => DashboardConfig::default(),
    };

    eprintln!(
        "Running {} over {} rows.",
        style("tdash").red(),
        style(dataset.len()).blue()
    );

    let mut engine = tdash::dashboard::build(Arc::new(dataset), &config)?;

    for (name, text) in &args.updates {
        apply(&mut engine, name, text)?;
    }

    let artifacts = engine.refresh_all()?;

    if args.json {
        let map: serde_json::Map<String, serde_json::Value> = artifacts
            .iter()
            .map(|(slot, artifact)| -> Result<_, serde_json::Error> {
                Ok((slot.to_string(), serde_json::to_value(artifact)?))
            })
            .collect::<Result<_, serde_json::Error>>()?;
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (slot, artifact) in &artifacts {
            println!("{} {}", style(format!("{slot}:")).bold(), describe(artifact));
        }
    }

    if args.mermaid {
        println!("{}", engine.render_mermaid());
    }

    Ok(())
}

fn apply(engine: &mut Engine, name: &str, text: &str) -> anyhow::Result<()> {
    let entry = engine.controls().entry(name)?;
    let value = entry.parse(text)?;

    let changed = engine
        .set(name, value)
        .with_context(|| format!("--set {name}={text}"))?;

    if !changed {
        eprintln!("{} {name} already is {text}", style("note:").yellow());
    }

    Ok(())
}

fn describe(artifact: &Artifact) -> String {
    match artifact {
        Artifact::Text(text) => text.clone(),
        Artifact::NoData(message) => style(message).dim().to_string(),
        Artifact::Error(message) => style(message).red().to_string(),
        Artifact::Chart(series) => format!(
            "{} points of {} against {} by {}",
            series.x.len(),
            series.y_label,
            series.x_label,
            series.color_label
        ),
        Artifact::Histogram(histogram) => {
            let buckets: Vec<String> = histogram
                .counts
                .iter()
                .zip(&histogram.edges)
                .map(|(count, edge)| format!("{edge:.1}:{count}"))
                .collect();
            format!("{} [{}]", histogram.field, buckets.join(" "))
        }
        Artifact::Table(table) => {
            format!("{} rows of {}", table.rows.len(), table.columns.join(", "))
        }
    }
}
