//! Overlay placement for the post editor.
//!
//! Six elements can be positioned on top of the uploaded media. Positions are
//! percentages of the canvas box so a layout renders the same at any scale.

use serde::{Deserialize, Serialize};

/// Applied to every text overlay's `x` when a post is saved. Corrects the
/// horizontal drift between the editor canvas and the app's renderer.
pub const SAVE_X_CALIBRATION: f64 = -5.0;

const MIN_PERCENT: f64 = 0.0;
const MAX_PERCENT: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayElement {
    Username,
    Address,
    Phone,
    BusinessName,
    Designation,
    Profile,
}

impl OverlayElement {
    pub const ALL: [OverlayElement; 6] = [
        OverlayElement::Username,
        OverlayElement::Address,
        OverlayElement::Phone,
        OverlayElement::BusinessName,
        OverlayElement::Designation,
        OverlayElement::Profile,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    Square,
    Portrait,
}

impl FrameSize {
    pub fn dimensions(&self) -> FrameDimensions {
        match self {
            FrameSize::Square => FrameDimensions {
                width: 1080,
                height: 1080,
            },
            FrameSize::Portrait => FrameDimensions {
                width: 1080,
                height: 1350,
            },
        }
    }
}

impl std::str::FromStr for FrameSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "square" => Ok(FrameSize::Square),
            "portrait" => Ok(FrameSize::Portrait),
            other => Err(format!("unknown frame size: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOverlay {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font: String,
    pub font_size: u32,
    pub color: String,
    pub has_background: bool,
    pub background_color: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileShape {
    Circle,
    Square,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileOverlay {
    pub x: f64,
    pub y: f64,
    pub shape: ProfileShape,
    pub size: u32,
    pub has_background: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayLayout {
    pub username: TextOverlay,
    pub address: TextOverlay,
    pub phone: TextOverlay,
    pub business_name: TextOverlay,
    pub designation: TextOverlay,
    pub profile: ProfileOverlay,
}

fn text_preset(x: f64, y: f64, font_size: u32, enabled: bool) -> TextOverlay {
    TextOverlay {
        text: String::new(),
        x,
        y,
        font: "Poppins".to_string(),
        font_size,
        color: "#FFFFFF".to_string(),
        has_background: false,
        background_color: "#000000".to_string(),
        enabled,
    }
}

impl OverlayLayout {
    /// Default layout for a frame size. Username and profile start enabled.
    pub fn preset(frame: FrameSize) -> Self {
        match frame {
            FrameSize::Square => Self {
                username: text_preset(50.0, 86.0, 28, true),
                business_name: text_preset(50.0, 80.0, 28, false),
                designation: text_preset(50.0, 90.0, 28, false),
                address: text_preset(50.0, 94.0, 28, false),
                phone: text_preset(50.0, 98.0, 28, false),
                profile: ProfileOverlay {
                    x: 12.0,
                    y: 86.0,
                    shape: ProfileShape::Circle,
                    size: 120,
                    has_background: false,
                    enabled: true,
                },
            },
            FrameSize::Portrait => Self {
                username: text_preset(50.0, 88.0, 32, true),
                business_name: text_preset(50.0, 83.0, 32, false),
                designation: text_preset(50.0, 91.5, 32, false),
                address: text_preset(50.0, 95.0, 32, false),
                phone: text_preset(50.0, 98.0, 32, false),
                profile: ProfileOverlay {
                    x: 12.0,
                    y: 88.0,
                    shape: ProfileShape::Circle,
                    size: 140,
                    has_background: false,
                    enabled: true,
                },
            },
        }
    }

    pub fn position(&self, element: OverlayElement) -> (f64, f64) {
        match element {
            OverlayElement::Username => (self.username.x, self.username.y),
            OverlayElement::Address => (self.address.x, self.address.y),
            OverlayElement::Phone => (self.phone.x, self.phone.y),
            OverlayElement::BusinessName => (self.business_name.x, self.business_name.y),
            OverlayElement::Designation => (self.designation.x, self.designation.y),
            OverlayElement::Profile => (self.profile.x, self.profile.y),
        }
    }

    pub fn is_enabled(&self, element: OverlayElement) -> bool {
        match self.text(element) {
            Some(text) => text.enabled,
            None => self.profile.enabled,
        }
    }

    pub fn set_enabled(&mut self, element: OverlayElement, enabled: bool) {
        match self.text_mut(element) {
            Some(text) => text.enabled = enabled,
            None => self.profile.enabled = enabled,
        }
    }

    fn set_position(&mut self, element: OverlayElement, x: f64, y: f64) {
        let (x, y) = (clamp_percent(x), clamp_percent(y));
        match self.text_mut(element) {
            Some(text) => {
                text.x = x;
                text.y = y;
            }
            None => {
                self.profile.x = x;
                self.profile.y = y;
            }
        }
    }

    fn text(&self, element: OverlayElement) -> Option<&TextOverlay> {
        match element {
            OverlayElement::Username => Some(&self.username),
            OverlayElement::Address => Some(&self.address),
            OverlayElement::Phone => Some(&self.phone),
            OverlayElement::BusinessName => Some(&self.business_name),
            OverlayElement::Designation => Some(&self.designation),
            OverlayElement::Profile => None,
        }
    }

    fn text_mut(&mut self, element: OverlayElement) -> Option<&mut TextOverlay> {
        match element {
            OverlayElement::Username => Some(&mut self.username),
            OverlayElement::Address => Some(&mut self.address),
            OverlayElement::Phone => Some(&mut self.phone),
            OverlayElement::BusinessName => Some(&mut self.business_name),
            OverlayElement::Designation => Some(&mut self.designation),
            OverlayElement::Profile => None,
        }
    }

    /// First element whose coordinates fall outside the canvas, if any.
    pub fn out_of_bounds(&self) -> Option<OverlayElement> {
        OverlayElement::ALL.into_iter().find(|element| {
            let (x, y) = self.position(*element);
            !in_range(x) || !in_range(y)
        })
    }

    /// Layout as written to storage: text overlays shifted by
    /// [`SAVE_X_CALIBRATION`], profile untouched.
    pub fn calibrated_for_save(&self) -> Self {
        let mut saved = self.clone();
        for element in OverlayElement::ALL {
            if let Some(text) = saved.text_mut(element) {
                text.x = clamp_percent(text.x + SAVE_X_CALIBRATION);
            }
        }
        saved
    }
}

fn in_range(value: f64) -> bool {
    value.is_finite() && (MIN_PERCENT..=MAX_PERCENT).contains(&value)
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_PERCENT;
    }
    value.clamp(MIN_PERCENT, MAX_PERCENT)
}

/// Canvas bounding box in client pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CanvasRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Converts an absolute pointer position to canvas percentages, clamped to
/// `[0, 100]`. Returns `None` for a collapsed canvas.
pub fn pointer_to_percent(rect: &CanvasRect, client_x: f64, client_y: f64) -> Option<(f64, f64)> {
    if rect.width <= 0.0 || rect.height <= 0.0 {
        return None;
    }
    let x = (client_x - rect.left) / rect.width * 100.0;
    let y = (client_y - rect.top) / rect.height * 100.0;
    Some((clamp_percent(x), clamp_percent(y)))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DragError {
    #[error("{0:?} is already being dragged")]
    AlreadyDragging(OverlayElement),
    #[error("{0:?} is disabled")]
    Disabled(OverlayElement),
    #[error("canvas has no area")]
    CollapsedCanvas,
}

/// One editor interaction, as sent by the console.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum EditorAction {
    SetFrame {
        frame: FrameSize,
    },
    Toggle {
        element: OverlayElement,
        enabled: bool,
    },
    /// A complete drag: grab `element`, release it at the pointer.
    #[serde(rename_all = "camelCase")]
    Drag {
        element: OverlayElement,
        rect: CanvasRect,
        client_x: f64,
        client_y: f64,
    },
}

/// Editor state: the active frame, its layout and at most one dragged element.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEditor {
    frame: FrameSize,
    layout: OverlayLayout,
    dragging: Option<OverlayElement>,
}

impl OverlayEditor {
    pub fn new(frame: FrameSize) -> Self {
        Self {
            frame,
            layout: OverlayLayout::preset(frame),
            dragging: None,
        }
    }

    /// Picks up editing of a layout the console already holds.
    pub fn resume(frame: FrameSize, layout: OverlayLayout) -> Self {
        Self {
            frame,
            layout,
            dragging: None,
        }
    }

    pub fn frame(&self) -> FrameSize {
        self.frame
    }

    pub fn layout(&self) -> &OverlayLayout {
        &self.layout
    }

    /// Switching frames discards manual placement and any drag in progress.
    pub fn set_frame_size(&mut self, frame: FrameSize) {
        self.frame = frame;
        self.layout = OverlayLayout::preset(frame);
        self.dragging = None;
    }

    pub fn set_enabled(&mut self, element: OverlayElement, enabled: bool) {
        self.layout.set_enabled(element, enabled);
        if !enabled && self.dragging == Some(element) {
            self.dragging = None;
        }
    }

    pub fn begin_drag(&mut self, element: OverlayElement) -> Result<(), DragError> {
        match self.dragging {
            Some(active) if active != element => return Err(DragError::AlreadyDragging(active)),
            _ => {}
        }
        if !self.layout.is_enabled(element) {
            return Err(DragError::Disabled(element));
        }
        self.dragging = Some(element);
        Ok(())
    }

    /// Moves the dragged element to the pointer. Ignored when nothing is dragged.
    pub fn drag_to(&mut self, rect: &CanvasRect, client_x: f64, client_y: f64) -> Option<(f64, f64)> {
        let element = self.dragging?;
        let (x, y) = pointer_to_percent(rect, client_x, client_y)?;
        self.layout.set_position(element, x, y);
        Some((x, y))
    }

    pub fn end_drag(&mut self) {
        self.dragging = None;
    }

    pub fn apply(&mut self, action: EditorAction) -> Result<(), DragError> {
        match action {
            EditorAction::SetFrame { frame } => self.set_frame_size(frame),
            EditorAction::Toggle { element, enabled } => self.set_enabled(element, enabled),
            EditorAction::Drag {
                element,
                rect,
                client_x,
                client_y,
            } => {
                self.begin_drag(element)?;
                let moved = self.drag_to(&rect, client_x, client_y);
                self.end_drag();
                moved.ok_or(DragError::CollapsedCanvas)?;
            }
        }
        Ok(())
    }
}
