use serde::{Deserialize, Serialize};

pub mod client;
pub mod edges;
pub mod graph;
pub mod layout;
pub mod model;
pub mod report;
pub mod routing;
#[cfg(feature = "server")]
pub mod serve;
pub mod session;
pub mod utils;
pub mod viewport;

pub use client::*;
pub use edges::*;
pub use graph::*;
pub use layout::*;
pub use model::*;
pub use routing::*;
pub use session::*;
pub use utils::*;
pub use viewport::*;

pub const NODE_WIDTH: f32 = 280.0;
pub const NODE_MIN_HEIGHT: f32 = 120.0;
pub const NODE_HEADER_HEIGHT: f32 = 40.0;
pub const NODE_TITLE_BASELINE: f32 = 18.0;
pub const NODE_TITLE_RULE: f32 = 25.0;
pub const NODE_ITEMS_TOP: f32 = 30.0;
pub const NODE_ITEMS_INSET_X: f32 = 5.0;
pub const ITEM_LINE_HEIGHT: f32 = 18.0;
pub const NODE_SPACING_X: f32 = 380.0;
pub const NODE_SPACING_Y: f32 = 300.0;
pub const NODE_ROW_GAP: f32 = 60.0;
pub const NODE_CAPTION_OFFSET: f32 = 20.0;
pub const LAYOUT_MARGIN: f32 = 50.0;
pub const CANVAS_MIN_WIDTH: f32 = 1000.0;
pub const CANVAS_MIN_HEIGHT: f32 = 600.0;
pub const CANVAS_PADDING_X: f32 = 100.0;
pub const CANVAS_PADDING_Y: f32 = 200.0;
pub const EDGE_CURVE_OFFSET: f32 = 60.0;
pub const EDGE_SYMBOL_SEPARATOR: &str = ", ";
pub const SELF_LOOP_SPREAD: f32 = 40.0;
pub const SELF_LOOP_HEIGHT: f32 = 56.0;
pub const ZOOM_MIN: f32 = 0.5;
pub const ZOOM_MAX: f32 = 3.0;
pub const ZOOM_STEP: f32 = 0.2;
pub const ZOOM_DEFAULT: f32 = 1.0;
pub const INITIAL_STATE_ID: u32 = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CanvasSize {
    pub width: f32,
    pub height: f32,
}
