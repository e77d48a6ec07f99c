use std::fmt::{Display, Formatter};

use crate::engine::Engine;
use crate::engine::graph::Vertex;

const FRESH: &str = "#ADD8E6";
const STALE: &str = "#FFB347";
const CONTROL: &str = "#E0E0E0";

impl Engine {
    /// Renders the dependency graph as a Mermaid diagram.
    ///
    /// * **Grey**: control
    /// * **Blue**: derivation with a fresh cached value
    /// * **Orange**: derivation that will recompute on the next read
    ///
    /// Bound slots hang off the derivation they read.
    pub fn render_mermaid(&self) -> String {
        Mermaid(self).to_string()
    }
}

struct Mermaid<'a>(&'a Engine);

impl Display for Mermaid<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let engine = self.0;
        let graph = &engine.graph.graph;

        writeln!(f, "graph LR")?;

        for index in graph.node_indices() {
            let id = index.index();

            match &graph[index] {
                Vertex::Control(name) => {
                    let value = engine
                        .controls
                        .get(name)
                        .map(|value| value.to_string())
                        .unwrap_or_default();
                    writeln!(f, "    {id}[/\"{}\\n{}\"/]", Escape(name), Escape(&value))?;
                    writeln!(f, "    style {id} fill:{CONTROL}")?;
                }
                Vertex::Node(node) => {
                    let color = if node.is_fresh() { FRESH } else { STALE };
                    writeln!(f, "    {id}[\"{}\\nv{}\"]", Escape(&node.name), node.version())?;
                    writeln!(f, "    style {id} fill:{color}")?;
                }
                Vertex::Pending(name) => {
                    writeln!(f, "    {id}[\"{}\\n?\"]", Escape(name))?;
                }
            }
        }

        for edge in graph.raw_edges() {
            let (source, target) = (edge.source(), edge.target());
            let label = match &graph[source] {
                Vertex::Node(node) => node.output_type_name(),
                Vertex::Control(_) => "control",
                Vertex::Pending(_) => "?",
            };

            writeln!(
                f,
                "    {} -- \"{}\" --> {}",
                source.index(),
                Escape(label),
                target.index()
            )?;
        }

        for (i, binding) in engine.bindings.iter().enumerate() {
            writeln!(f, "    slot{i}((\"{}\"))", Escape(&binding.slot))?;
            writeln!(f, "    {} --> slot{i}", binding.node.index())?;
        }

        Ok(())
    }
}

struct Escape<'a>(&'a str);

impl Display for Escape<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '"' => f.write_str("&quot;")?,
                _ => write!(f, "{c}")?,
            }
        }
        Ok(())
    }
}
