use serde::{Deserialize, Serialize};

use crate::display::DisplaySet;
use crate::events::{ConnectionState, ParticipantId, Role};
use crate::participants::ParticipantRegistry;
use crate::surfaces::{RenderElementCache, SurfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Geometry of the picture-in-picture layout, in pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_overlay_width")]
    pub overlay_width: u32,
    #[serde(default = "default_overlay_height")]
    pub overlay_height: u32,
    #[serde(default = "default_overlay_margin")]
    pub overlay_margin: u32,
    #[serde(default = "default_overlay_corner")]
    pub overlay_corner: Corner,
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_overlay_width() -> u32 {
    320
}

fn default_overlay_height() -> u32 {
    180
}

fn default_overlay_margin() -> u32 {
    16
}

fn default_overlay_corner() -> Corner {
    Corner::BottomRight
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            overlay_width: default_overlay_width(),
            overlay_height: default_overlay_height(),
            overlay_margin: default_overlay_margin(),
            overlay_corner: default_overlay_corner(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKind {
    /// Channel not joined (yet, or any more).
    Offline,
    Connecting,
    /// Connected but nobody is publishing video.
    NoSignal,
    /// Secondary slot while only one feed is live.
    Waiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "slot", rename_all = "snake_case")]
pub enum Slot {
    Feed {
        participant: ParticipantId,
        surface: SurfaceId,
        role: Role,
        rect: Rect,
        /// Clicking this slot swaps primary and secondary.
        swap_target: bool,
    },
    Placeholder {
        kind: PlaceholderKind,
        rect: Rect,
    },
}

impl Slot {
    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            Slot::Feed { participant, .. } => Some(*participant),
            Slot::Placeholder { .. } => None,
        }
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        match self {
            Slot::Feed { surface, .. } => Some(*surface),
            Slot::Placeholder { .. } => None,
        }
    }
}

/// Concrete on-screen arrangement for one layout pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub status: ConnectionState,
    pub primary: Slot,
    pub secondary: Slot,
}

impl Layout {
    pub fn swap_enabled(&self) -> bool {
        matches!(self.secondary, Slot::Feed { swap_target: true, .. })
    }
}

/// Turns the display set into full-frame + corner-overlay geometry.
#[derive(Debug, Clone, Default)]
pub struct CompositeLayoutRenderer {
    config: LayoutConfig,
}

impl CompositeLayoutRenderer {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn full_frame(&self) -> Rect {
        Rect {
            x: 0,
            y: 0,
            width: self.config.viewport_width,
            height: self.config.viewport_height,
        }
    }

    pub fn overlay(&self) -> Rect {
        let c = &self.config;
        let width = c.overlay_width.min(c.viewport_width);
        let height = c.overlay_height.min(c.viewport_height);
        // Settings are user-editable; keep the overlay inside the viewport.
        let margin_x = c.overlay_margin.min(c.viewport_width - width);
        let margin_y = c.overlay_margin.min(c.viewport_height - height);
        let right = c.viewport_width.saturating_sub(width.saturating_add(margin_x));
        let bottom = c.viewport_height.saturating_sub(height.saturating_add(margin_y));
        let (x, y) = match c.overlay_corner {
            Corner::TopLeft => (margin_x, margin_y),
            Corner::TopRight => (right, margin_y),
            Corner::BottomLeft => (margin_x, bottom),
            Corner::BottomRight => (right, bottom),
        };
        Rect { x, y, width, height }
    }

    /// Layout with no feeds at all.
    pub fn empty(&self, status: &ConnectionState) -> Layout {
        Layout {
            status: status.clone(),
            primary: self.primary_placeholder(status),
            secondary: Slot::Placeholder {
                kind: PlaceholderKind::Waiting,
                rect: self.overlay(),
            },
        }
    }

    fn primary_placeholder(&self, status: &ConnectionState) -> Slot {
        let kind = match status {
            ConnectionState::Connected => PlaceholderKind::NoSignal,
            ConnectionState::Connecting => PlaceholderKind::Connecting,
            ConnectionState::Disconnected | ConnectionState::Closed => PlaceholderKind::Offline,
        };
        Slot::Placeholder {
            kind,
            rect: self.full_frame(),
        }
    }

    /// Lay out the display set, reusing each participant's cached surface and
    /// attaching its current video track if it is not already playing.
    pub fn render(
        &self,
        status: &ConnectionState,
        set: &DisplaySet,
        registry: &ParticipantRegistry,
        cache: &mut RenderElementCache,
    ) -> Layout {
        let primary_id = set.primary();
        let secondary_id = set.secondary();

        let primary = match primary_id {
            Some(id) => self.feed_slot(id, self.full_frame(), false, registry, cache),
            None => self.primary_placeholder(status),
        };

        let secondary = match secondary_id {
            Some(id) => self.feed_slot(id, self.overlay(), true, registry, cache),
            None => Slot::Placeholder {
                kind: PlaceholderKind::Waiting,
                rect: self.overlay(),
            },
        };

        Layout {
            status: status.clone(),
            primary,
            secondary,
        }
    }

    fn feed_slot(
        &self,
        id: ParticipantId,
        rect: Rect,
        swap_target: bool,
        registry: &ParticipantRegistry,
        cache: &mut RenderElementCache,
    ) -> Slot {
        let Some(participant) = registry.get(id) else {
            return Slot::Placeholder {
                kind: PlaceholderKind::Waiting,
                rect,
            };
        };
        let surface = cache.get_or_create_surface(id).id;
        if let Some(track) = &participant.video_track {
            if let Err(e) = cache.attach_if_new(track) {
                tracing::warn!(participant = %id, "attach failed, showing placeholder: {e}");
                return Slot::Placeholder {
                    kind: PlaceholderKind::Waiting,
                    rect,
                };
            }
        }
        Slot::Feed {
            participant: id,
            surface,
            role: participant.role,
            rect,
            swap_target,
        }
    }
}
