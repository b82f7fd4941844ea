use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as FmtWrite;
use tracing::debug;

#[cfg(feature = "png")]
use anyhow::{anyhow, bail};
#[cfg(feature = "png")]
use tiny_skia::{Pixmap, Transform};

use crate::*;

const EDGE_COLOR: &str = "#6366f1";
const EDGE_LABEL_COLOR: &str = "#4f46e5";
const INITIAL_FILL: &str = "#dbeafe";
const INITIAL_STROKE: &str = "#3b82f6";
const STATE_FILL: &str = "#f3f4f6";
const STATE_STROKE: &str = "#9ca3af";
const EMPTY_MESSAGE: &str = "No states to display";

#[derive(Debug, Clone, Serialize)]
pub struct RoutedEdge {
    pub key: String,
    pub from: StateId,
    pub to: StateId,
    pub label: String,
    pub route: EdgeRoute,
}

/// The fully derived scene for one build: positioned states plus the edges
/// that could be routed between them.
#[derive(Debug, Clone, Serialize)]
pub struct StateGraph {
    pub layout: AutomatonLayout,
    pub edges: Vec<RoutedEdge>,
}

impl StateGraph {
    pub fn from_states(states: &[State]) -> Self {
        let layout = layout_states(states);
        let by_id: HashMap<StateId, &PositionedNode> =
            layout.nodes.iter().map(|node| (node.id, node)).collect();

        let mut routed = Vec::new();
        for edge in aggregate_edges(states) {
            let key = edge.key();
            let (Some(from), Some(to)) = (by_id.get(&edge.from), by_id.get(&edge.to)) else {
                debug!(edge = %key, "skipping edge that references an unknown state");
                continue;
            };
            let Some(route) = route_between(from, to) else {
                debug!(edge = %key, "skipping edge between coincident states");
                continue;
            };
            routed.push(RoutedEdge {
                label: edge.label(),
                from: edge.from,
                to: edge.to,
                key,
                route,
            });
        }

        Self {
            layout,
            edges: routed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn size(&self) -> CanvasSize {
        self.layout.size
    }

    pub fn render_svg(&self, background: &str, viewport: Option<&ViewportState>) -> Result<String> {
        let size = self.layout.size;
        let mut svg = String::new();
        write!(
            svg,
            r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}" font-family="Inter, system-ui, sans-serif">
  <defs>
    <marker id="arrowhead" markerWidth="10" markerHeight="10" refX="9" refY="3" orient="auto">
      <polygon points="0 0, 10 3, 0 6" fill="{}" />
    </marker>
  </defs>
  <rect width="100%" height="100%" fill="{}" />
"##,
            size.width,
            size.height,
            size.width,
            size.height,
            EDGE_COLOR,
            escape_xml(background)
        )?;

        if self.is_empty() {
            write!(
                svg,
                "  <text x=\"{:.1}\" y=\"{:.1}\" fill=\"#6b7280\" font-size=\"16\" text-anchor=\"middle\" dominant-baseline=\"middle\">{}</text>\n</svg>\n",
                size.width / 2.0,
                size.height / 2.0,
                EMPTY_MESSAGE
            )?;
            return Ok(svg);
        }

        match viewport {
            Some(view) => writeln!(svg, "  <g transform=\"{}\">", view.transform())?,
            None => svg.push_str("  <g>\n"),
        }

        for edge in &self.edges {
            write!(
                svg,
                "    <path d=\"{}\" stroke=\"{}\" stroke-width=\"2\" fill=\"none\" marker-end=\"url(#arrowhead)\" data-edge=\"{}\" />\n",
                edge.route.svg_path(),
                EDGE_COLOR,
                edge.key
            )?;
            if !edge.label.is_empty() {
                write!(
                    svg,
                    "    <text x=\"{:.1}\" y=\"{:.1}\" fill=\"{}\" font-size=\"12\" font-weight=\"600\" text-anchor=\"middle\" dominant-baseline=\"middle\">{}</text>\n",
                    edge.route.label.x,
                    edge.route.label.y,
                    EDGE_LABEL_COLOR,
                    escape_xml(&edge.label)
                )?;
            }
        }

        for node in &self.layout.nodes {
            self.write_node(&mut svg, node)?;
        }

        svg.push_str("  </g>\n</svg>\n");
        Ok(svg)
    }

    fn write_node(&self, svg: &mut String, node: &PositionedNode) -> Result<()> {
        let (fill, stroke) = if node.is_initial {
            (INITIAL_FILL, INITIAL_STROKE)
        } else {
            (STATE_FILL, STATE_STROKE)
        };

        write!(
            svg,
            "    <g data-state=\"{}\">\n      <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" rx=\"4\" fill=\"{}\" stroke=\"{}\" stroke-width=\"2\" />\n",
            node.id, node.x, node.y, node.width, node.height, fill, stroke
        )?;
        write!(
            svg,
            "      <text x=\"{:.1}\" y=\"{:.1}\" fill=\"#111827\" font-size=\"12\" font-weight=\"700\">State {}</text>\n",
            node.x + 10.0,
            node.y + NODE_TITLE_BASELINE,
            node.id
        )?;
        write!(
            svg,
            "      <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#d1d5db\" stroke-width=\"1\" />\n",
            node.x,
            node.y + NODE_TITLE_RULE,
            node.x + node.width,
            node.y + NODE_TITLE_RULE
        )?;

        for (idx, item) in node.items.iter().enumerate() {
            let baseline = node.y + NODE_ITEMS_TOP + ITEM_LINE_HEIGHT * (idx as f32 + 1.0) - 4.0;
            write!(
                svg,
                "      <text x=\"{:.1}\" y=\"{:.1}\" fill=\"#374151\" font-size=\"12\" xml:space=\"preserve\">{}</text>\n",
                node.x + NODE_ITEMS_INSET_X,
                baseline,
                escape_xml(item)
            )?;
        }

        write!(
            svg,
            "      <text x=\"{:.1}\" y=\"{:.1}\" fill=\"{}\" font-size=\"12\" font-weight=\"600\" text-anchor=\"middle\">Transitions: {}</text>\n    </g>\n",
            node.x + node.width / 2.0,
            node.y + node.height + NODE_CAPTION_OFFSET,
            EDGE_LABEL_COLOR,
            escape_xml(&node.transitions)
        )?;

        Ok(())
    }

    #[cfg(feature = "png")]
    pub fn render_png(
        &self,
        background: &str,
        viewport: Option<&ViewportState>,
        scale: f32,
    ) -> Result<Vec<u8>> {
        if scale <= 0.0 {
            bail!("scale must be greater than zero when rendering PNG output");
        }

        let svg = self.render_svg(background, viewport)?;

        let mut options = resvg::usvg::Options::default();
        options.font_family = "Inter".to_string();
        options.fontdb_mut().load_system_fonts();

        let tree = resvg::usvg::Tree::from_str(&svg, &options)
            .map_err(|err| anyhow!("failed to parse generated SVG for PNG export: {err}"))?;

        let size = tree.size().to_int_size();
        let scaled_width = ((size.width() as f32) * scale).ceil();
        let scaled_height = ((size.height() as f32) * scale).ceil();

        if !scaled_width.is_finite() || !scaled_height.is_finite() {
            bail!("scaled dimensions are not finite; try a smaller scale factor");
        }
        if scaled_width < 1.0 || scaled_height < 1.0 {
            bail!("scaled dimensions collapsed below 1px; try a larger scale factor");
        }
        if scaled_width > u32::MAX as f32 || scaled_height > u32::MAX as f32 {
            bail!("scaled dimensions exceed supported limits; try a smaller scale factor");
        }

        let scaled_width = scaled_width as u32;
        let scaled_height = scaled_height as u32;

        let mut pixmap = Pixmap::new(scaled_width, scaled_height).ok_or_else(|| {
            anyhow!("failed to allocate {scaled_width}x{scaled_height} surface for PNG export")
        })?;

        resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());

        pixmap
            .encode_png()
            .map_err(|err| anyhow!("failed to encode PNG output: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: StateId, items: &[&str], transitions: &[(&str, StateId)]) -> State {
        State {
            id,
            items: items.iter().map(|item| Item::Text(item.to_string())).collect(),
            transitions: transitions
                .iter()
                .map(|(symbol, to)| Transition {
                    symbol: symbol.to_string(),
                    to: *to,
                })
                .collect(),
        }
    }

    #[test]
    fn three_state_automaton_has_three_distinct_edges() {
        let states = vec![
            state(0, &["S' -> . E, $"], &[("id", 1), ("(", 2)]),
            state(1, &["E -> id ., $"], &[("+", 2)]),
            state(2, &["E -> ( . E ), $"], &[]),
        ];
        let graph = StateGraph::from_states(&states);

        assert_eq!(graph.layout.nodes.len(), 3);
        let keys: Vec<&str> = graph.edges.iter().map(|edge| edge.key.as_str()).collect();
        assert_eq!(keys, vec!["0-1", "0-2", "1-2"]);
    }

    #[test]
    fn unknown_targets_are_dropped_not_fatal() {
        let states = vec![state(0, &[], &[("a", 1), ("b", 7)]), state(1, &[], &[])];
        let graph = StateGraph::from_states(&states);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].key, "0-1");
        assert!(graph.render_svg("white", None).is_ok());
    }

    #[test]
    fn self_loops_are_rendered() {
        let states = vec![state(0, &[], &[("a", 0)])];
        let graph = StateGraph::from_states(&states);
        assert_eq!(graph.edges.len(), 1);
        assert!(matches!(graph.edges[0].route.curve, Curve::Cubic { .. }));
    }

    #[test]
    fn empty_graph_renders_placeholder() {
        let graph = StateGraph::from_states(&[]);
        let svg = graph.render_svg("white", None).unwrap();
        assert!(svg.contains(EMPTY_MESSAGE));
        assert!(!svg.contains("<path"));
    }

    #[test]
    fn svg_marks_initial_state_and_escapes_items() {
        let states = vec![
            state(0, &["S -> . <expr>, $"], &[("<expr>", 1)]),
            state(1, &[], &[]),
        ];
        let svg = StateGraph::from_states(&states)
            .render_svg("white", None)
            .unwrap();

        assert!(svg.contains(INITIAL_FILL));
        assert!(svg.contains(STATE_FILL));
        assert!(svg.contains("S -&gt; . &lt;expr&gt;, $"));
        assert!(svg.contains("Transitions: &lt;expr&gt; → 1"));
        assert!(svg.contains("data-edge=\"0-1\""));
    }

    #[test]
    fn viewport_wraps_scene_in_transform() {
        let states = vec![state(0, &[], &[])];
        let view = ViewportState::at(2.0, Point::new(50.0, 20.0));
        let svg = StateGraph::from_states(&states)
            .render_svg("white", Some(&view))
            .unwrap();
        assert!(svg.contains("<g transform=\"translate(50, 20) scale(2)\">"));
    }
}
