use serde::Serialize;

use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Curve {
    Quadratic { control: Point },
    Cubic { first: Point, second: Point },
}

/// A routed edge: boundary anchors, the bend, and where its label goes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EdgeRoute {
    pub start: Point,
    pub end: Point,
    pub curve: Curve,
    pub label: Point,
}

impl EdgeRoute {
    pub fn svg_path(&self) -> String {
        match self.curve {
            Curve::Quadratic { control } => format!(
                "M {:.1} {:.1} Q {:.1} {:.1} {:.1} {:.1}",
                self.start.x, self.start.y, control.x, control.y, self.end.x, self.end.y
            ),
            Curve::Cubic { first, second } => format!(
                "M {:.1} {:.1} C {:.1} {:.1} {:.1} {:.1} {:.1} {:.1}",
                self.start.x,
                self.start.y,
                first.x,
                first.y,
                second.x,
                second.y,
                self.end.x,
                self.end.y
            ),
        }
    }

    /// Every point that shapes the curve, endpoints included.
    pub fn points(&self) -> Vec<Point> {
        match self.curve {
            Curve::Quadratic { control } => vec![self.start, control, self.end],
            Curve::Cubic { first, second } => vec![self.start, first, second, self.end],
        }
    }
}

/// Curves from the boundary of `from` to the boundary of `to`, bent
/// [`EDGE_CURVE_OFFSET`] units to the left of the travel direction.
///
/// Returns `None` when both centers coincide.
pub fn route_edge(from: &PositionedNode, to: &PositionedNode) -> Option<EdgeRoute> {
    let from_center = from.center();
    let to_center = to.center();

    let dx = to_center.x - from_center.x;
    let dy = to_center.y - from_center.y;
    let distance = (dx * dx + dy * dy).sqrt();
    if distance <= f32::EPSILON {
        return None;
    }

    let ux = dx / distance;
    let uy = dy / distance;

    let start = Point {
        x: from_center.x + ux * (from.width / 2.0),
        y: from_center.y + uy * (from.height / 2.0),
    };
    let end = Point {
        x: to_center.x - ux * (to.width / 2.0),
        y: to_center.y - uy * (to.height / 2.0),
    };

    let mid = Point {
        x: (start.x + end.x) / 2.0,
        y: (start.y + end.y) / 2.0,
    };
    let control = Point {
        x: mid.x - uy * EDGE_CURVE_OFFSET,
        y: mid.y + ux * EDGE_CURVE_OFFSET,
    };

    Some(EdgeRoute {
        start,
        end,
        curve: Curve::Quadratic { control },
        label: control,
    })
}

/// A small loop above the node's top edge for transitions back into the same
/// state.
pub fn route_self_loop(node: &PositionedNode) -> EdgeRoute {
    let center_x = node.x + node.width / 2.0;
    let top = node.y;
    let half = SELF_LOOP_SPREAD / 2.0;

    EdgeRoute {
        start: Point::new(center_x - half, top),
        end: Point::new(center_x + half, top),
        curve: Curve::Cubic {
            first: Point::new(center_x - SELF_LOOP_SPREAD, top - SELF_LOOP_HEIGHT),
            second: Point::new(center_x + SELF_LOOP_SPREAD, top - SELF_LOOP_HEIGHT),
        },
        label: Point::new(center_x, top - SELF_LOOP_HEIGHT * 0.75),
    }
}

/// Routes any edge, sending self transitions to [`route_self_loop`].
pub fn route_between(from: &PositionedNode, to: &PositionedNode) -> Option<EdgeRoute> {
    if from.id == to.id {
        return Some(route_self_loop(from));
    }
    route_edge(from, to)
}
