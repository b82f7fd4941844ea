use serde::Serialize;
use tracing::debug;

use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridCell {
    pub col: usize,
    pub row: usize,
}

/// A state placed on the canvas. `x`/`y` is the top-left corner of its box.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedNode {
    pub id: StateId,
    pub cell: GridCell,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub items: Vec<String>,
    pub transitions: String,
    pub is_initial: bool,
}

impl PositionedNode {
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect {
            min_x: self.x,
            max_x: self.x + self.width,
            min_y: self.y,
            max_y: self.y + self.height,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatonLayout {
    pub nodes: Vec<PositionedNode>,
    pub columns: usize,
    pub rows: usize,
    pub pitch_x: f32,
    pub pitch_y: f32,
    pub size: CanvasSize,
}

impl AutomatonLayout {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: StateId) -> Option<&PositionedNode> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl Rect {
    /// Interiors overlap; boxes that only touch along an edge do not count.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    pub fn contains(&self, point: Point) -> bool {
        let eps = 1e-3_f32;
        point.x >= self.min_x - eps
            && point.x <= self.max_x + eps
            && point.y >= self.min_y - eps
            && point.y <= self.max_y + eps
    }
}

/// `ceil(sqrt(count))`, computed without trusting float rounding on perfect
/// squares.
pub fn grid_columns(count: usize) -> usize {
    if count == 0 {
        return 0;
    }

    let mut cols = (count as f64).sqrt().ceil() as usize;
    while cols * cols < count {
        cols += 1;
    }
    while cols > 1 && (cols - 1) * (cols - 1) >= count {
        cols -= 1;
    }
    cols
}

pub fn node_height(item_count: usize) -> f32 {
    (item_count as f32 * ITEM_LINE_HEIGHT + NODE_HEADER_HEIGHT).max(NODE_MIN_HEIGHT)
}

/// One `symbol → to` entry per distinct symbol, in first-seen order. A symbol
/// listed twice keeps the last target.
pub fn transition_summary(transitions: &[Transition]) -> String {
    let mut entries: Vec<(&str, StateId)> = Vec::with_capacity(transitions.len());
    for transition in transitions {
        match entries
            .iter_mut()
            .find(|(symbol, _)| *symbol == transition.symbol)
        {
            Some(entry) => entry.1 = transition.to,
            None => entries.push((&transition.symbol, transition.to)),
        }
    }

    entries
        .iter()
        .map(|(symbol, to)| format!("{symbol} → {to}"))
        .collect::<Vec<_>>()
        .join(EDGE_SYMBOL_SEPARATOR)
}

/// Places states on a square-ish grid in input order.
///
/// Every cell has the same pitch. The vertical pitch starts at
/// [`NODE_SPACING_Y`] and grows for the whole grid when the tallest node
/// would reach into the next row.
pub fn layout_states(states: &[State]) -> AutomatonLayout {
    if states.is_empty() {
        return AutomatonLayout {
            nodes: Vec::new(),
            columns: 0,
            rows: 0,
            pitch_x: NODE_SPACING_X,
            pitch_y: NODE_SPACING_Y,
            size: CanvasSize {
                width: CANVAS_MIN_WIDTH,
                height: CANVAS_MIN_HEIGHT,
            },
        };
    }

    let columns = grid_columns(states.len());
    let rows = states.len().div_ceil(columns);

    let tallest = states
        .iter()
        .map(|state| node_height(state.items.len()))
        .fold(NODE_MIN_HEIGHT, f32::max);
    let pitch_x = NODE_SPACING_X;
    let pitch_y = NODE_SPACING_Y.max(tallest + NODE_ROW_GAP);

    let nodes = states
        .iter()
        .enumerate()
        .map(|(idx, state)| {
            let cell = GridCell {
                col: idx % columns,
                row: idx / columns,
            };

            PositionedNode {
                id: state.id,
                cell,
                x: cell.col as f32 * pitch_x + LAYOUT_MARGIN,
                y: cell.row as f32 * pitch_y + LAYOUT_MARGIN,
                width: NODE_WIDTH,
                height: node_height(state.items.len()),
                items: state.items.iter().map(Item::display_text).collect(),
                transitions: transition_summary(&state.transitions),
                is_initial: state.id == INITIAL_STATE_ID,
            }
        })
        .collect::<Vec<_>>();

    let size = CanvasSize {
        width: CANVAS_MIN_WIDTH.max(columns as f32 * pitch_x + CANVAS_PADDING_X),
        height: CANVAS_MIN_HEIGHT.max(rows as f32 * pitch_y + CANVAS_PADDING_Y),
    };

    debug!(
        states = states.len(),
        columns, rows, pitch_y, "laid out automaton states"
    );

    AutomatonLayout {
        nodes,
        columns,
        rows,
        pitch_x,
        pitch_y,
        size,
    }
}
