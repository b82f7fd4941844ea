//! Pan and zoom for the rendered state graph.
//!
//! [`ViewportController`] is a plain state machine driven by button and
//! pointer events. [`ViewportHandle`] moves one controller into a tokio task
//! so that a server can share it while the task stays its only writer.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::*;

/// DOM numbering for `MouseEvent.button`.
pub const PRIMARY_BUTTON: u16 = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanMode {
    #[default]
    Idle,
    Panning,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportState {
    pub zoom: f32,
    pub pan: Point,
    pub is_panning: bool,
    pub pan_anchor: Point,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            zoom: ZOOM_DEFAULT,
            pan: Point::ORIGIN,
            is_panning: false,
            pan_anchor: Point::ORIGIN,
        }
    }
}

impl ViewportState {
    /// A resting viewport at the given zoom (clamped) and pan.
    pub fn at(zoom: f32, pan: Point) -> Self {
        Self {
            zoom: clamp_zoom(zoom),
            pan,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> PanMode {
        if self.is_panning {
            PanMode::Panning
        } else {
            PanMode::Idle
        }
    }

    /// SVG transform: translate first, then scale.
    pub fn transform(&self) -> String {
        format!(
            "translate({}, {}) scale({})",
            self.pan.x, self.pan.y, self.zoom
        )
    }

    pub fn zoom_percent(&self) -> u32 {
        (self.zoom * 100.0).round() as u32
    }

    pub fn is_identity(&self) -> bool {
        self.zoom == ZOOM_DEFAULT && self.pan == Point::ORIGIN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewportEvent {
    ZoomIn,
    ZoomOut,
    Reset,
    PointerDown {
        x: f32,
        y: f32,
        #[serde(default)]
        button: u16,
    },
    PointerMove {
        x: f32,
        y: f32,
    },
    PointerUp,
    PointerLeave,
}

fn clamp_zoom(zoom: f32) -> f32 {
    let snapped = (zoom * 1000.0).round() / 1000.0;
    snapped.clamp(ZOOM_MIN, ZOOM_MAX)
}

#[derive(Debug, Clone, Default)]
pub struct ViewportController {
    state: ViewportState,
}

impl ViewportController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn apply(&mut self, event: ViewportEvent) -> ViewportState {
        match event {
            ViewportEvent::ZoomIn => self.zoom_in(),
            ViewportEvent::ZoomOut => self.zoom_out(),
            ViewportEvent::Reset => self.reset(),
            ViewportEvent::PointerDown { x, y, button } => self.pointer_down(Point { x, y }, button),
            ViewportEvent::PointerMove { x, y } => self.pointer_move(Point { x, y }),
            ViewportEvent::PointerUp | ViewportEvent::PointerLeave => self.pointer_release(),
        }
        self.state
    }

    pub fn zoom_in(&mut self) {
        self.state.zoom = clamp_zoom(self.state.zoom + ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.state.zoom = clamp_zoom(self.state.zoom - ZOOM_STEP);
    }

    /// Back to 100% at the origin. An active drag keeps going.
    pub fn reset(&mut self) {
        self.state.zoom = ZOOM_DEFAULT;
        self.state.pan = Point::ORIGIN;
    }

    pub fn pointer_down(&mut self, pointer: Point, button: u16) {
        if button != PRIMARY_BUTTON {
            return;
        }
        self.state.is_panning = true;
        self.state.pan_anchor = Point {
            x: pointer.x - self.state.pan.x,
            y: pointer.y - self.state.pan.y,
        };
    }

    /// Pan follows the pointer absolutely relative to the anchor, so repeated
    /// moves never accumulate drift.
    pub fn pointer_move(&mut self, pointer: Point) {
        if !self.state.is_panning {
            return;
        }
        self.state.pan = Point {
            x: pointer.x - self.state.pan_anchor.x,
            y: pointer.y - self.state.pan_anchor.y,
        };
    }

    pub fn pointer_release(&mut self) {
        self.state.is_panning = false;
    }
}

#[derive(Debug, Error)]
#[error("viewport task has stopped")]
pub struct ViewportClosed;

struct ViewportCommand {
    event: ViewportEvent,
    reply: oneshot::Sender<ViewportState>,
}

/// Cloneable handle to a controller owned by its own task.
#[derive(Debug, Clone)]
pub struct ViewportHandle {
    commands: mpsc::Sender<ViewportCommand>,
    snapshots: watch::Receiver<ViewportState>,
}

impl std::fmt::Debug for ViewportCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportCommand")
            .field("event", &self.event)
            .finish()
    }
}

impl ViewportHandle {
    /// Starts the owning task. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (commands, mut inbox) = mpsc::channel::<ViewportCommand>(64);
        let (publisher, snapshots) = watch::channel(ViewportState::default());

        tokio::spawn(async move {
            let mut controller = ViewportController::new();
            while let Some(command) = inbox.recv().await {
                let state = controller.apply(command.event);
                debug!(event = ?command.event, zoom = state.zoom, "viewport event applied");
                publisher.send_replace(state);
                let _ = command.reply.send(state);
            }
        });

        Self {
            commands,
            snapshots,
        }
    }

    pub async fn send(&self, event: ViewportEvent) -> Result<ViewportState, ViewportClosed> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ViewportCommand { event, reply })
            .await
            .map_err(|_| ViewportClosed)?;
        response.await.map_err(|_| ViewportClosed)
    }

    pub fn current(&self) -> ViewportState {
        *self.snapshots.borrow()
    }
}
